//! Review/improve loops built from ordinary nodes, advancers and a counter
//! in the `RunContext`.
//!
//! ```text
//! Write ──► Review ──approve──► next stage
//!   ▲          │
//!   └─improve──┤
//!              └──fail────► failure terminal
//! ```
//!
//! Only the improve advancer's converter calls
//! [`RefinePolicy::record_improvement`], so the counter equals the number of
//! improve transitions taken. Once it reaches `max_iterations`, a review that
//! is not approved is force-approved through the normal approve edge, unless
//! it is critical, in which case it fails.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use skein_core::config::RefineConfig;
use skein_core::error::{Result, SkeinError};

use crate::context::{keys, RunContext};

/// A review result a refinement loop can route on.
pub trait Reviewed {
    fn approved(&self) -> bool;

    fn critical(&self) -> bool {
        false
    }
}

/// Structured review verdict, as typically parsed from a model response.
///
/// The default (an unparseable review) is "not approved, not critical".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl Reviewed for ReviewOutcome {
    fn approved(&self) -> bool {
        self.approved
    }

    fn critical(&self) -> bool {
        self.critical
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineDecision {
    Approve,
    Improve,
    Fail,
}

#[derive(Debug, Clone)]
pub struct RefinePolicy {
    max_iterations: u32,
    counter_key: String,
}

impl RefinePolicy {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            counter_key: keys::REFINE_ITERATIONS.to_string(),
        }
    }

    pub fn from_config(config: &RefineConfig) -> Self {
        Self::new(config.max_iterations).with_counter_key(config.counter_key.clone())
    }

    /// Use a separate counter, e.g. for a second loop in the same graph.
    pub fn with_counter_key(mut self, key: impl Into<String>) -> Self {
        self.counter_key = key.into();
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn counter_key(&self) -> &str {
        &self.counter_key
    }

    /// Improve transitions taken so far in this run.
    pub fn iterations(&self, context: &RunContext) -> u32 {
        context.counter(&self.counter_key).min(u32::MAX as u64) as u32
    }

    pub fn exhausted(&self, context: &RunContext) -> bool {
        self.iterations(context) >= self.max_iterations
    }

    /// Route a review. Pure: reads the counter but never changes it.
    pub fn decide<R: Reviewed + ?Sized>(&self, review: &R, context: &RunContext) -> RefineDecision {
        if review.approved() {
            return RefineDecision::Approve;
        }
        if !self.exhausted(context) {
            return RefineDecision::Improve;
        }
        if review.critical() {
            RefineDecision::Fail
        } else {
            RefineDecision::Approve
        }
    }

    /// Count one improve transition. Refuses once the cap is reached.
    pub fn record_improvement(&self, context: &RunContext) -> Result<u32> {
        if self.exhausted(context) {
            warn!(
                counter = %self.counter_key,
                max_iterations = self.max_iterations,
                "Improve requested after the refinement cap"
            );
            return Err(SkeinError::RefineCapExceeded {
                max_iterations: self.max_iterations,
            });
        }
        let iteration = context.increment(self.counter_key.clone()) as u32;
        info!(iteration, max_iterations = self.max_iterations, "Refinement iteration");
        Ok(iteration)
    }

    /// Predicate for the approve advancer.
    pub fn approves<R>(&self) -> impl Fn(&R, &RunContext) -> bool + Send + Sync + 'static
    where
        R: Reviewed + 'static,
    {
        let policy = self.clone();
        move |review, context| policy.decide(review, context) == RefineDecision::Approve
    }

    /// Predicate for the improve advancer.
    pub fn improves<R>(&self) -> impl Fn(&R, &RunContext) -> bool + Send + Sync + 'static
    where
        R: Reviewed + 'static,
    {
        let policy = self.clone();
        move |review, context| policy.decide(review, context) == RefineDecision::Improve
    }

    /// Predicate for the fail advancer.
    pub fn fails<R>(&self) -> impl Fn(&R, &RunContext) -> bool + Send + Sync + 'static
    where
        R: Reviewed + 'static,
    {
        let policy = self.clone();
        move |review, context| policy.decide(review, context) == RefineDecision::Fail
    }
}
