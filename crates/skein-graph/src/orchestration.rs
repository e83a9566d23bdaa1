use std::any::Any;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use skein_core::error::{Result, SkeinError};
use skein_core::event::EventBus;
use skein_core::types::{GraphEvent, RunId};

use crate::builder::NodeSlot;
use crate::context::{keys, RunContext};
use crate::process::{AuxiliaryRegistry, ProcessScope};
use crate::runnable::Value;

/// Value produced by a result node, tagged with the node that produced it.
#[derive(Debug, Clone)]
pub struct TerminalResult<Out> {
    pub terminal: String,
    pub value: Out,
}

/// Record of one node invocation.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// 1-based position in the traversal.
    pub step: usize,
    pub node: String,
    pub elapsed_ms: u64,
    /// Node the traversal moved to, if an advancer fired.
    pub advanced_to: Option<String>,
    /// Label of the advancer that fired.
    pub advancer: Option<String>,
}

/// Everything a finished traversal produced.
#[derive(Debug)]
pub struct RunOutcome<Out> {
    pub run_id: RunId,
    /// Terminal outputs; empty when the run ended at a dead end.
    pub results: Vec<TerminalResult<Out>>,
    /// Per-node records in execution order.
    pub steps: Vec<StepRecord>,
    /// Dead-end node that ended the run without a result.
    pub dead_end: Option<String>,
    /// `node: description` of every registered auxiliary.
    pub auxiliaries: Vec<String>,
    /// The run's context after the last node returned.
    pub context: RunContext,
    pub total_elapsed_ms: u64,
}

impl<Out> RunOutcome<Out> {
    pub fn into_values(self) -> Vec<Out> {
        self.results.into_iter().map(|r| r.value).collect()
    }

    /// Output of the named terminal, if it produced one.
    pub fn from_terminal(&self, terminal: &str) -> Option<&Out> {
        self.results
            .iter()
            .find(|r| r.terminal == terminal)
            .map(|r| &r.value)
    }

    /// Number of times `node` was invoked.
    pub fn visits(&self, node: &str) -> usize {
        self.steps.iter().filter(|s| s.node == node).count()
    }
}

enum WalkEnd<Out> {
    Result(TerminalResult<Out>),
    DeadEnd(String),
}

/// Executes a graph of runnables.
///
/// Starting from the entry node, each step invokes the current node,
/// evaluates its advancers in declared order and follows the first match.
/// A result node with no matching advancer ends the run with its output; a
/// dead-end node ends it with none; any other node with no match is a
/// configuration error. Exceeding the step cap is also a configuration error.
///
/// The graph is immutable once built, so one instance can serve concurrent
/// requests. Each run gets its own `RunContext`; node `initialize` state is
/// shared between runs.
pub struct Orchestration<In, Out> {
    nodes: Vec<NodeSlot>,
    entry: usize,
    is_result: Vec<bool>,
    max_steps: usize,
    events: Arc<EventBus>,
    _types: PhantomData<fn(In) -> Out>,
}

impl<In, Out> Orchestration<In, Out>
where
    In: Send + 'static,
    Out: Send + Debug + 'static,
{
    pub(crate) fn new(
        nodes: Vec<NodeSlot>,
        entry: usize,
        is_result: Vec<bool>,
        max_steps: usize,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            nodes,
            entry,
            is_result,
            max_steps,
            events,
            _types: PhantomData,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<GraphEvent> {
        self.events.subscribe()
    }

    /// Fire-and-forget event callback; see `EventBus::on_event`.
    pub fn on_event<F>(&self, callback: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(GraphEvent) + Send + 'static,
    {
        self.events.on_event(callback)
    }

    pub fn entry_name(&self) -> &str {
        self.nodes[self.entry].runnable.name()
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.runnable.name()).collect()
    }

    pub fn result_names(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .zip(&self.is_result)
            .filter(|(_, is_result)| **is_result)
            .map(|(n, _)| n.runnable.name())
            .collect()
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run once with a fresh context and return the terminal outputs.
    pub async fn invoke(&self, input: In) -> Result<Vec<Out>> {
        Ok(self.run(input, RunContext::new()).await?.into_values())
    }

    /// Run once with a caller-supplied context.
    pub async fn run(&self, input: In, context: RunContext) -> Result<RunOutcome<Out>> {
        self.run_with_cancel(input, context, CancellationToken::new())
            .await
    }

    /// Run once; every node invocation receives a child of `cancel`.
    ///
    /// The orchestration itself never stops on `cancel`: nodes observe it and
    /// route a cancellation output like any other business outcome.
    pub async fn run_with_cancel(
        &self,
        input: In,
        context: RunContext,
        cancel: CancellationToken,
    ) -> Result<RunOutcome<Out>> {
        let run_id = RunId::new();
        let span = info_span!("orchestration", run_id = %run_id);
        self.traverse(run_id, input, context, cancel)
            .instrument(span)
            .await
    }

    async fn traverse(
        &self,
        run_id: RunId,
        input: In,
        context: RunContext,
        cancel: CancellationToken,
    ) -> Result<RunOutcome<Out>> {
        let start = Instant::now();
        context.set_str(keys::RUN_ID, run_id.to_string());
        self.events.publish(GraphEvent::RunStarted {
            run_id: run_id.clone(),
            entry: self.entry_name().to_string(),
            started_at: Utc::now(),
        });
        info!(entry = %self.entry_name(), "Starting orchestration run");

        let auxiliaries = AuxiliaryRegistry::default();
        let mut steps = Vec::new();
        let walked = self
            .walk(&run_id, input, &context, &auxiliaries, &cancel, &mut steps)
            .await;

        match walked {
            Ok(end) => {
                let (results, dead_end) = match end {
                    WalkEnd::Result(result) => (vec![result], None),
                    WalkEnd::DeadEnd(node) => (Vec::new(), Some(node)),
                };
                let total_elapsed_ms = start.elapsed().as_millis() as u64;
                self.events.publish(GraphEvent::RunCompleted {
                    run_id: run_id.clone(),
                    steps: steps.len(),
                    results: results.len(),
                });
                info!(
                    steps = steps.len(),
                    results = results.len(),
                    total_elapsed_ms,
                    "Orchestration run complete"
                );
                Ok(RunOutcome {
                    run_id,
                    results,
                    steps,
                    dead_end,
                    auxiliaries: auxiliaries.descriptions(),
                    context,
                    total_elapsed_ms,
                })
            }
            Err(e) => {
                auxiliaries.cancel_all();
                error!(error = %e, steps = steps.len(), "Orchestration run failed");
                self.events.publish(GraphEvent::RunFailed {
                    run_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn walk(
        &self,
        run_id: &RunId,
        input: In,
        context: &RunContext,
        auxiliaries: &AuxiliaryRegistry,
        cancel: &CancellationToken,
        steps: &mut Vec<StepRecord>,
    ) -> Result<WalkEnd<Out>> {
        let mut current = self.entry;
        let mut value: Value = Box::new(input);

        loop {
            let slot = &self.nodes[current];
            let name = slot.runnable.name().to_string();

            if steps.len() >= self.max_steps {
                error!(node = %name, limit = self.max_steps, "Step limit exceeded");
                return Err(SkeinError::StepLimitExceeded {
                    limit: self.max_steps,
                    node: name,
                });
            }
            let step = steps.len() + 1;

            self.events.publish(GraphEvent::NodeStarted {
                run_id: run_id.clone(),
                node: name.clone(),
                step,
            });
            info!(node = %name, step, "Executing graph node");

            if let Err(e) = slot.runnable.ensure_initialized().await {
                return Err(self.crashed(run_id, &name, e, true));
            }

            let scope = ProcessScope::new(
                run_id.clone(),
                name.clone(),
                step,
                context.clone(),
                self.events.clone(),
                auxiliaries.clone(),
                cancel.child_token(),
            );
            let node_start = Instant::now();
            let (output, rendered) = match slot.runnable.invoke_erased(value, scope).await {
                Ok(produced) => produced,
                Err(e) => return Err(self.crashed(run_id, &name, e, false)),
            };
            let elapsed_ms = node_start.elapsed().as_millis() as u64;

            self.events.publish(GraphEvent::NodeFinished {
                run_id: run_id.clone(),
                node: name.clone(),
                step,
                output: rendered,
                elapsed_ms,
            });
            debug!(node = %name, step, elapsed_ms, "Node execution complete");

            // First matching advancer wins.
            let borrowed: &dyn Any = &*output;
            let mut chosen = None;
            for advancer in &slot.advancers {
                if advancer.matches(borrowed, context)? {
                    chosen = Some(advancer);
                    break;
                }
            }

            let mut record = StepRecord {
                step,
                node: name.clone(),
                elapsed_ms,
                advanced_to: None,
                advancer: None,
            };

            let Some(advancer) = chosen else {
                steps.push(record);
                if self.is_result[current] {
                    let value = output.downcast::<Out>().map_err(|_| SkeinError::TypeMismatch {
                        expected: std::any::type_name::<Out>(),
                    })?;
                    debug!(node = %name, "Result node reached, graph complete");
                    return Ok(WalkEnd::Result(TerminalResult {
                        terminal: name,
                        value: *value,
                    }));
                }
                if slot.runnable.allows_dead_end() {
                    info!(node = %name, "No advancer matched at dead-end node, stopping");
                    self.events.publish(GraphEvent::DeadEnd {
                        run_id: run_id.clone(),
                        node: name.clone(),
                    });
                    return Ok(WalkEnd::DeadEnd(name));
                }
                error!(node = %name, "No advancer matched and dead ends are not permitted");
                return Err(SkeinError::NoMatchingAdvancer { node: name });
            };

            let target = self.nodes[advancer.target].runnable.name().to_string();
            value = match advancer.convert(output, context) {
                Ok(converted) => converted,
                Err(e) => return Err(self.crashed(run_id, &name, e, false)),
            };

            debug!(
                from = %name,
                to = %target,
                advancer = advancer.label.as_deref().unwrap_or("-"),
                "Advancing"
            );
            self.events.publish(GraphEvent::AdvancerTaken {
                run_id: run_id.clone(),
                from: name,
                to: target.clone(),
                label: advancer.label.clone(),
            });

            record.advanced_to = Some(target);
            record.advancer = advancer.label.clone();
            steps.push(record);
            current = advancer.target;
        }
    }

    fn crashed(&self, run_id: &RunId, node: &str, cause: SkeinError, during_init: bool) -> SkeinError {
        error!(node = %node, error = %cause, during_init, "Graph node failed");
        self.events.publish(GraphEvent::NodeError {
            run_id: run_id.clone(),
            node: node.to_string(),
            error: cause.to_string(),
        });
        let node = node.to_string();
        let source = Box::new(cause);
        if during_init {
            SkeinError::Initialize { node, source }
        } else {
            SkeinError::NodeCrashed { node, source }
        }
    }
}
