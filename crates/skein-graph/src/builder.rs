use std::collections::{HashSet, VecDeque};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use skein_core::config::OrchestrationConfig;
use skein_core::error::{Result, SkeinError};
use skein_core::event::EventBus;

use crate::advancer::{Advancer, AdvancerConfig};
use crate::orchestration::Orchestration;
use crate::runnable::{ErasedRunnable, NodeCell, Runnable, TypeInfo};

static NEXT_BUILDER_ID: AtomicU64 = AtomicU64::new(1);

/// Typed reference to a node added to a `GraphBuilder`.
///
/// `I` and `O` are the node's input and output types, so wiring an entry,
/// a result, or an identity advancer between incompatible nodes fails to
/// compile where the types are visible.
pub struct NodeHandle<I, O> {
    index: usize,
    builder: u64,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O> NodeHandle<I, O> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<I, O> Clone for NodeHandle<I, O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I, O> Copy for NodeHandle<I, O> {}

impl<I, O> Debug for NodeHandle<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("index", &self.index)
            .field("builder", &self.builder)
            .finish()
    }
}

/// A node together with its ordered outbound advancers.
pub(crate) struct NodeSlot {
    pub(crate) runnable: Arc<dyn ErasedRunnable>,
    pub(crate) advancers: Vec<Advancer>,
}

/// Builds an `Orchestration` whose entry accepts `In` and whose result
/// nodes produce `Out`.
///
/// Wiring mistakes are collected and reported by `build`, which also checks
/// that every advancer delivers the type its target expects, that every node
/// is reachable from the entry, and that every reachable node can still reach
/// a result or dead-end node.
pub struct GraphBuilder<In, Out> {
    id: u64,
    nodes: Vec<NodeSlot>,
    entry: Option<usize>,
    results: Vec<usize>,
    errors: Vec<SkeinError>,
    // Advancers registered against a foreign handle; never part of the graph.
    rejected: Vec<Advancer>,
    config: OrchestrationConfig,
    events: Option<Arc<EventBus>>,
    _types: PhantomData<fn(In) -> Out>,
}

impl<In, Out> Default for GraphBuilder<In, Out>
where
    In: Send + 'static,
    Out: Send + Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<In, Out> GraphBuilder<In, Out>
where
    In: Send + 'static,
    Out: Send + Debug + 'static,
{
    pub fn new() -> Self {
        Self {
            id: NEXT_BUILDER_ID.fetch_add(1, Ordering::Relaxed),
            nodes: Vec::new(),
            entry: None,
            results: Vec::new(),
            errors: Vec::new(),
            rejected: Vec::new(),
            config: OrchestrationConfig::default(),
            events: None,
            _types: PhantomData,
        }
    }

    pub fn with_config(mut self, config: OrchestrationConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the step cap from the configuration.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.config.max_steps = max_steps.max(1);
        self
    }

    /// Publish events on an existing bus instead of a private one.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn add_node<R: Runnable>(&mut self, runnable: R) -> NodeHandle<R::Input, R::Output> {
        let name = runnable.name().to_string();
        if self.nodes.iter().any(|n| n.runnable.name() == name) {
            self.errors.push(SkeinError::DuplicateNodeName(name));
        }
        let index = self.nodes.len();
        self.nodes.push(NodeSlot {
            runnable: Arc::new(NodeCell::new(runnable)),
            advancers: Vec::new(),
        });
        NodeHandle {
            index,
            builder: self.id,
            _types: PhantomData,
        }
    }

    /// Designate the entry node. A later call replaces an earlier one.
    pub fn set_entry<O>(&mut self, node: &NodeHandle<In, O>) -> &mut Self {
        if self.owns(node) {
            self.entry = Some(node.index);
        }
        self
    }

    /// Mark a node as a result (terminal) node.
    pub fn add_result<I>(&mut self, node: &NodeHandle<I, Out>) -> &mut Self {
        if self.owns(node) && !self.results.contains(&node.index) {
            self.results.push(node.index);
        }
        self
    }

    /// Append an advancer from `from` to `to`.
    ///
    /// Advancers are evaluated in the order they were added. Unless
    /// `convert` is configured, the source output is passed through as is,
    /// which `build` rejects when `O` and `N` differ.
    pub fn advance<I, O, N, P>(
        &mut self,
        from: &NodeHandle<I, O>,
        to: &NodeHandle<N, P>,
    ) -> AdvancerConfig<'_, O, N>
    where
        O: Send + 'static,
        N: Send + 'static,
    {
        let valid = self.owns(from) && self.owns(to);
        let advancers = if valid {
            &mut self.nodes[from.index].advancers
        } else {
            &mut self.rejected
        };
        advancers.push(Advancer::identity(to.index, TypeInfo::of::<O>()));
        let last = advancers.len() - 1;
        AdvancerConfig::new(&mut advancers[last])
    }

    /// Shorthand for an unconditional identity advancer.
    pub fn connect<I, T, P>(&mut self, from: &NodeHandle<I, T>, to: &NodeHandle<T, P>) -> &mut Self
    where
        T: Send + 'static,
    {
        self.advance(from, to);
        self
    }

    fn owns<I, O>(&mut self, node: &NodeHandle<I, O>) -> bool {
        if node.builder == self.id && node.index < self.nodes.len() {
            true
        } else {
            self.errors
                .push(SkeinError::ForeignNode(format!("#{}", node.index)));
            false
        }
    }

    pub fn build(mut self) -> Result<Orchestration<In, Out>> {
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }
        let entry = self.entry.ok_or(SkeinError::MissingEntry)?;
        if self.results.is_empty() {
            return Err(SkeinError::NoResultNodes);
        }

        for slot in &self.nodes {
            for advancer in &slot.advancers {
                let target = &self.nodes[advancer.target];
                let expected = target.runnable.input_type();
                if advancer.delivers.id != expected.id {
                    return Err(SkeinError::EdgeTypeMismatch {
                        from: slot.runnable.name().to_string(),
                        to: target.runnable.name().to_string(),
                        produced: advancer.delivers.name,
                        expected: expected.name,
                    });
                }
            }
        }

        let reachable = self.reachable_from(entry);
        if let Some(orphan) = (0..self.nodes.len()).find(|i| !reachable.contains(i)) {
            return Err(SkeinError::Unreachable(
                self.nodes[orphan].runnable.name().to_string(),
            ));
        }

        let can_stop = self.can_reach_stop();
        if let Some(trap) = (0..self.nodes.len()).find(|i| !can_stop.contains(i)) {
            return Err(SkeinError::NoTerminalPath(
                self.nodes[trap].runnable.name().to_string(),
            ));
        }

        let mut is_result = vec![false; self.nodes.len()];
        for index in &self.results {
            is_result[*index] = true;
        }

        debug!(
            nodes = self.nodes.len(),
            results = self.results.len(),
            entry = %self.nodes[entry].runnable.name(),
            "Graph built"
        );

        let events = self
            .events
            .unwrap_or_else(|| Arc::new(EventBus::new(self.config.event_capacity)));
        Ok(Orchestration::new(
            self.nodes,
            entry,
            is_result,
            self.config.max_steps,
            events,
        ))
    }

    fn reachable_from(&self, start: usize) -> HashSet<usize> {
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(index) = queue.pop_front() {
            for advancer in &self.nodes[index].advancers {
                if seen.insert(advancer.target) {
                    queue.push_back(advancer.target);
                }
            }
        }
        seen
    }

    /// Nodes from which some result or dead-end node is reachable.
    fn can_reach_stop(&self) -> HashSet<usize> {
        let mut seen: HashSet<usize> = (0..self.nodes.len())
            .filter(|i| self.results.contains(i) || self.nodes[*i].runnable.allows_dead_end())
            .collect();
        let mut queue: VecDeque<usize> = seen.iter().copied().collect();
        while let Some(target) = queue.pop_front() {
            for (index, slot) in self.nodes.iter().enumerate() {
                if slot.advancers.iter().any(|a| a.target == target) && seen.insert(index) {
                    queue.push_back(index);
                }
            }
        }
        seen
    }
}
