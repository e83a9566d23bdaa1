use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;

use skein_core::error::{Result, SkeinError};
use skein_graph::{RunContext, Runnable, RunnableProcess};

/// Invocation and initialization counts of a test node.
#[derive(Debug, Default)]
pub struct NodeStats {
    invocations: AtomicUsize,
    initializations: AtomicUsize,
}

impl NodeStats {
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }
}

type NodeFn<I, O> = Box<dyn Fn(I, &RunContext) -> Result<O> + Send + Sync>;

/// A node backed by a closure.
pub struct FnRunnable<I, O> {
    name: String,
    f: NodeFn<I, O>,
    dead_end: bool,
    stats: Arc<NodeStats>,
}

impl<I, O> FnRunnable<I, O>
where
    I: Send + 'static,
    O: Send + Debug + 'static,
{
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(I, &RunContext) -> Result<O> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
            dead_end: false,
            stats: Arc::new(NodeStats::default()),
        }
    }

    pub fn dead_end(mut self) -> Self {
        self.dead_end = true;
        self
    }

    /// Handle to the counters; stays valid after the node moves into a graph.
    pub fn stats(&self) -> Arc<NodeStats> {
        self.stats.clone()
    }
}

impl<I, O> Runnable for FnRunnable<I, O>
where
    I: Send + 'static,
    O: Send + Debug + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    fn allows_dead_end(&self) -> bool {
        self.dead_end
    }

    fn initialize(&self) -> BoxFuture<'_, Result<()>> {
        self.stats.initializations.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn invoke(&self, process: RunnableProcess<I>) -> BoxFuture<'_, Result<O>> {
        self.stats.invocations.fetch_add(1, Ordering::SeqCst);
        let (input, scope) = process.split();
        let result = (self.f)(input, scope.context());
        Box::pin(async move { result })
    }
}

/// A pass-through node whose first `failures` initializations fail.
pub struct CountingInit<T> {
    name: String,
    failures: AtomicUsize,
    stats: Arc<NodeStats>,
    _value: PhantomData<fn(T) -> T>,
}

impl<T> CountingInit<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failures: AtomicUsize::new(0),
            stats: Arc::new(NodeStats::default()),
            _value: PhantomData,
        }
    }

    pub fn failing(self, failures: usize) -> Self {
        self.failures.store(failures, Ordering::SeqCst);
        self
    }

    pub fn stats(&self) -> Arc<NodeStats> {
        self.stats.clone()
    }
}

impl<T> Runnable for CountingInit<T>
where
    T: Send + Debug + 'static,
{
    type Input = T;
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.stats.initializations.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(SkeinError::node("initialize failed"));
            }
            Ok(())
        })
    }

    fn invoke(&self, process: RunnableProcess<T>) -> BoxFuture<'_, Result<T>> {
        self.stats.invocations.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(process.into_input()) })
    }
}
