use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use skein_core::event::EventBus;
use skein_core::types::{GraphEvent, RunId};

use crate::context::RunContext;

/// A long-lived object a node wants traced alongside the run, such as a model
/// conversation. Registration never influences routing.
pub trait Auxiliary: Send + Sync + 'static {
    /// Short description recorded in events and the run outcome.
    fn describe(&self) -> String;

    /// Called best-effort when the run aborts with an error.
    fn cancel(&self) {}
}

/// Auxiliaries registered during one run, in registration order.
#[derive(Clone, Default)]
pub(crate) struct AuxiliaryRegistry {
    entries: Arc<Mutex<Vec<(String, Arc<dyn Auxiliary>)>>>,
}

impl AuxiliaryRegistry {
    /// A registration panicking elsewhere must not hide the others.
    fn entries(&self) -> MutexGuard<'_, Vec<(String, Arc<dyn Auxiliary>)>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("Auxiliary registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn push(&self, node: &str, aux: Arc<dyn Auxiliary>) {
        self.entries().push((node.to_string(), aux));
    }

    /// `node: description` for every registered auxiliary.
    pub(crate) fn descriptions(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|(node, aux)| format!("{}: {}", node, aux.describe()))
            .collect()
    }

    pub(crate) fn cancel_all(&self) {
        for (node, aux) in self.entries().iter() {
            debug!(node = %node, auxiliary = %aux.describe(), "Cancelling auxiliary");
            aux.cancel();
        }
    }
}

/// Everything a node can reach during one invocation besides its input.
#[derive(Clone)]
pub struct ProcessScope {
    run_id: RunId,
    node: String,
    step: usize,
    context: RunContext,
    events: Arc<EventBus>,
    auxiliaries: AuxiliaryRegistry,
    cancel: CancellationToken,
}

impl ProcessScope {
    pub(crate) fn new(
        run_id: RunId,
        node: String,
        step: usize,
        context: RunContext,
        events: Arc<EventBus>,
        auxiliaries: AuxiliaryRegistry,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            node,
            step,
            context,
            events,
            auxiliaries,
            cancel,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Name of the node being invoked.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// 1-based step number within the traversal.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Token local to this invocation. Cancelling it stops only this node's
    /// own sub-work; it is also cancelled when the caller's run token fires.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Publish a domain progress event.
    pub fn progress(&self, message: impl Into<String>) {
        self.events.publish(GraphEvent::Progress {
            run_id: self.run_id.clone(),
            node: self.node.clone(),
            message: message.into(),
        });
    }

    /// Register an auxiliary object for tracing and abort-time cancellation.
    pub fn register_auxiliary(&self, aux: Arc<dyn Auxiliary>) {
        let description = aux.describe();
        self.auxiliaries.push(&self.node, aux);
        self.events.publish(GraphEvent::AuxiliaryRegistered {
            run_id: self.run_id.clone(),
            node: self.node.clone(),
            description,
        });
    }
}

/// Per-invocation context handed to `Runnable::invoke`.
pub struct RunnableProcess<I> {
    input: I,
    scope: ProcessScope,
}

impl<I> RunnableProcess<I> {
    pub(crate) fn new(input: I, scope: ProcessScope) -> Self {
        Self { input, scope }
    }

    pub fn input(&self) -> &I {
        &self.input
    }

    pub fn into_input(self) -> I {
        self.input
    }

    /// Separate the owned input from the scope, so the input can be moved
    /// into sub-work while the scope stays usable.
    pub fn split(self) -> (I, ProcessScope) {
        (self.input, self.scope)
    }

    pub fn scope(&self) -> &ProcessScope {
        &self.scope
    }

    pub fn context(&self) -> &RunContext {
        self.scope.context()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.scope.cancellation()
    }

    pub fn progress(&self, message: impl Into<String>) {
        self.scope.progress(message)
    }

    pub fn register_auxiliary(&self, aux: Arc<dyn Auxiliary>) {
        self.scope.register_auxiliary(aux)
    }
}

#[cfg(test)]
pub(crate) fn test_scope(events: Arc<EventBus>) -> (ProcessScope, AuxiliaryRegistry) {
    let registry = AuxiliaryRegistry::default();
    let scope = ProcessScope::new(
        RunId::from_str("test-run"),
        "node".into(),
        1,
        RunContext::new(),
        events,
        registry.clone(),
        CancellationToken::new(),
    );
    (scope, registry)
}
