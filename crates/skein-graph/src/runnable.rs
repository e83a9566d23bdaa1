use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::OnceCell;

use skein_core::error::{Result, SkeinError};

use crate::process::{ProcessScope, RunnableProcess};

/// A typed processing node in an orchestration graph.
///
/// `invoke` may suspend on network calls. `initialize` runs before the first
/// `invoke` and, once it succeeds, is never run again for this instance, no
/// matter how many traversals or cycles revisit the node.
///
/// Business failures should be returned as ordinary outputs and routed by
/// advancer predicates; an `Err` from `invoke` aborts the traversal.
pub trait Runnable: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + Debug + 'static;

    /// Node name, unique within one graph.
    fn name(&self) -> &str;

    /// Whether reaching this node with no matching advancer may end the
    /// traversal without a result.
    fn allows_dead_end(&self) -> bool {
        false
    }

    /// One-time setup.
    fn initialize(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn invoke(&self, process: RunnableProcess<Self::Input>)
        -> BoxFuture<'_, Result<Self::Output>>;
}

/// Sharing one instance between graphs also shares its initialize state.
impl<R: Runnable> Runnable for Arc<R> {
    type Input = R::Input;
    type Output = R::Output;

    fn name(&self) -> &str {
        (**self).name()
    }

    fn allows_dead_end(&self) -> bool {
        (**self).allows_dead_end()
    }

    fn initialize(&self) -> BoxFuture<'_, Result<()>> {
        (**self).initialize()
    }

    fn invoke(
        &self,
        process: RunnableProcess<Self::Input>,
    ) -> BoxFuture<'_, Result<Self::Output>> {
        (**self).invoke(process)
    }
}

/// A value travelling between nodes with its static type erased.
pub(crate) type Value = Box<dyn Any + Send>;

#[derive(Debug, Clone, Copy)]
pub(crate) struct TypeInfo {
    pub(crate) id: TypeId,
    pub(crate) name: &'static str,
}

impl TypeInfo {
    pub(crate) fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }
}

const PREVIEW_CHARS: usize = 200;

/// Debug rendering of an output for events, cut at `PREVIEW_CHARS`.
pub(crate) fn preview<T: Debug>(value: &T) -> String {
    let full = format!("{:?}", value);
    match full.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &full[..cut]),
        None => full,
    }
}

/// Object-safe view of a `Runnable` used by the orchestration.
pub(crate) trait ErasedRunnable: Send + Sync {
    fn name(&self) -> &str;
    fn allows_dead_end(&self) -> bool;
    fn input_type(&self) -> TypeInfo;
    /// Run `initialize` unless it already succeeded.
    fn ensure_initialized(&self) -> BoxFuture<'_, Result<()>>;
    /// Invoke with an erased input; returns the erased output and its preview.
    fn invoke_erased(&self, input: Value, scope: ProcessScope)
        -> BoxFuture<'_, Result<(Value, String)>>;
}

pub(crate) struct NodeCell<R> {
    inner: R,
    initialized: OnceCell<()>,
}

impl<R: Runnable> NodeCell<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            initialized: OnceCell::new(),
        }
    }
}

impl<R: Runnable> ErasedRunnable for NodeCell<R> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn allows_dead_end(&self) -> bool {
        self.inner.allows_dead_end()
    }

    fn input_type(&self) -> TypeInfo {
        TypeInfo::of::<R::Input>()
    }

    fn ensure_initialized(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            // Concurrent first visits wait on the same initialization.
            self.initialized
                .get_or_try_init(|| self.inner.initialize())
                .await
                .map(|_| ())
        })
    }

    fn invoke_erased(
        &self,
        input: Value,
        scope: ProcessScope,
    ) -> BoxFuture<'_, Result<(Value, String)>> {
        Box::pin(async move {
            let input = input
                .downcast::<R::Input>()
                .map_err(|_| SkeinError::TypeMismatch {
                    expected: std::any::type_name::<R::Input>(),
                })?;
            let output = self
                .inner
                .invoke(RunnableProcess::new(*input, scope))
                .await?;
            let rendered = preview(&output);
            Ok((Box::new(output) as Value, rendered))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::test_scope;
    use skein_core::event::EventBus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Doubler {
        inits: Arc<AtomicUsize>,
    }

    impl Runnable for Doubler {
        type Input = u32;
        type Output = u32;

        fn name(&self) -> &str {
            "doubler"
        }

        fn initialize(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.inits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }

        fn invoke(&self, process: RunnableProcess<u32>) -> BoxFuture<'_, Result<u32>> {
            Box::pin(async move { Ok(process.into_input() * 2) })
        }
    }

    #[tokio::test]
    async fn test_initialize_is_memoized() {
        let inits = Arc::new(AtomicUsize::new(0));
        let cell = NodeCell::new(Doubler {
            inits: inits.clone(),
        });
        for _ in 0..3 {
            cell.ensure_initialized().await.unwrap();
        }
        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invoke_erased() {
        let cell = NodeCell::new(Doubler {
            inits: Arc::new(AtomicUsize::new(0)),
        });
        let (scope, _) = test_scope(Arc::new(EventBus::default()));
        let (out, rendered) = cell.invoke_erased(Box::new(21u32), scope).await.unwrap();
        assert_eq!(*out.downcast::<u32>().unwrap(), 42);
        assert_eq!(rendered, "42");
    }

    #[tokio::test]
    async fn test_invoke_erased_rejects_wrong_input() {
        let cell = NodeCell::new(Doubler {
            inits: Arc::new(AtomicUsize::new(0)),
        });
        let (scope, _) = test_scope(Arc::new(EventBus::default()));
        let err = cell
            .invoke_erased(Box::new("nope".to_string()), scope)
            .await
            .unwrap_err();
        assert!(matches!(err, SkeinError::TypeMismatch { .. }));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        let rendered = preview(&long);
        assert!(rendered.ends_with("..."));
        assert_eq!(rendered.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview(&7u8), "7");
    }
}
