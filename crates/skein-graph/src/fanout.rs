//! Bounded-concurrency fan-out for use inside a node's `invoke`.
//!
//! A counting semaphore admits at most `limit` sub-operations at a time.
//! Results always come back in input order, whatever order the
//! sub-operations finish in. Two failure policies are offered and a node
//! should stick to one:
//!
//! - [`FanOut::try_run`]: the first failure (in input order) fails the whole
//!   fan-out; items not yet admitted are skipped.
//! - [`FanOut::run_settled`]: every item settles to a [`FanOutItem`], with
//!   failures kept as visible placeholders.

use std::future::Future;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use skein_core::config::FanOutConfig;
use skein_core::error::{Result, SkeinError};

/// Outcome of one fan-out item.
#[derive(Debug, Clone, PartialEq)]
pub enum FanOutItem<T> {
    Done(T),
    /// The sub-operation returned an error.
    Failed { index: usize, error: String },
    /// Cancellation fired before the item was admitted.
    Cancelled { index: usize },
}

impl<T> FanOutItem<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Done(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Done(value) => Ok(value),
            Self::Failed { index, error } => {
                Err(SkeinError::node(format!("item {} failed: {}", index, error)))
            }
            Self::Cancelled { .. } => Err(SkeinError::Cancelled),
        }
    }
}

enum Settled<R> {
    Done(R),
    Failed(SkeinError),
    Skipped,
}

/// Bounded fan-out runner.
#[derive(Debug, Clone)]
pub struct FanOut {
    limit: usize,
    cancel: CancellationToken,
}

impl FanOut {
    /// `limit` is clamped to at least 1.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &FanOutConfig) -> Self {
        Self::new(config.concurrency)
    }

    /// Stop admitting items once `token` fires, e.g. a node's own
    /// invocation token or one it cancels after gathering enough.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `op` over every item, keeping failures as placeholders.
    pub async fn run_settled<T, R, F, Fut>(&self, items: Vec<T>, op: F) -> Vec<FanOutItem<R>>
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        self.drive(items, op, &self.cancel, false)
            .await
            .into_iter()
            .enumerate()
            .map(|(index, settled)| match settled {
                Settled::Done(value) => FanOutItem::Done(value),
                Settled::Failed(e) => FanOutItem::Failed {
                    index,
                    error: e.to_string(),
                },
                Settled::Skipped => FanOutItem::Cancelled { index },
            })
            .collect()
    }

    /// Run `op` over every item; any failure fails the whole fan-out.
    pub async fn try_run<T, R, F, Fut>(&self, items: Vec<T>, op: F) -> Result<Vec<R>>
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let local = self.cancel.child_token();
        let settled = self.drive(items, op, &local, true).await;

        let mut values = Vec::with_capacity(settled.len());
        let mut skipped = false;
        for item in settled {
            match item {
                Settled::Done(value) => values.push(value),
                Settled::Failed(e) => return Err(e),
                Settled::Skipped => skipped = true,
            }
        }
        if skipped {
            return Err(SkeinError::Cancelled);
        }
        Ok(values)
    }

    async fn drive<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        op: F,
        cancel: &CancellationToken,
        stop_on_error: bool,
    ) -> Vec<Settled<R>>
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let gate = Semaphore::new(self.limit);
        let gate = &gate;
        let op = &op;
        debug!(items = items.len(), limit = self.limit, "Starting fan-out");

        let futs = items.into_iter().enumerate().map(|(index, item)| async move {
            let _permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Settled::Skipped,
                permit = gate.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return Settled::Skipped,
                },
            };
            if cancel.is_cancelled() {
                return Settled::Skipped;
            }
            match op(index, item).await {
                Ok(value) => Settled::Done(value),
                Err(e) => {
                    warn!(index, error = %e, "Fan-out item failed");
                    if stop_on_error {
                        cancel.cancel();
                    }
                    Settled::Failed(e)
                }
            }
        });

        futures::future::join_all(futs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Tracks the highest number of simultaneously running operations.
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_bounded_and_ordered() {
        let gauge = Arc::new(Gauge::default());
        let fan = FanOut::new(2);
        // Earlier items sleep longer, so completion order is reversed.
        let delays = vec![40u64, 30, 20, 10, 5];

        let results = fan
            .try_run(delays, |index, delay| {
                let gauge = gauge.clone();
                async move {
                    gauge.enter();
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    gauge.exit();
                    Ok(index * 10)
                }
            })
            .await
            .unwrap();

        assert_eq!(results, vec![0, 10, 20, 30, 40]);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_settled_keeps_failure_placeholder() {
        let fan = FanOut::new(2);
        let results = fan
            .run_settled(vec!["a", "b", "c"], |index, item| async move {
                if index == 1 {
                    Err(SkeinError::node("source unavailable"))
                } else {
                    Ok(item.to_uppercase())
                }
            })
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], FanOutItem::Done("A".to_string()));
        assert_eq!(
            results[1],
            FanOutItem::Failed {
                index: 1,
                error: "source unavailable".into()
            }
        );
        assert_eq!(results[2].value().map(String::as_str), Some("C"));
        assert_eq!(results.iter().filter(|r| r.is_done()).count(), 2);
    }

    #[tokio::test]
    async fn test_try_run_fails_fast() {
        let started = Arc::new(AtomicUsize::new(0));
        let fan = FanOut::new(1);
        let err = fan
            .try_run(vec![0, 1, 2, 3], |index, _| {
                let started = started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if index == 1 {
                        Err(SkeinError::node("bad item"))
                    } else {
                        Ok(index)
                    }
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "bad item");
        // With one permit, items after the failure are never admitted.
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cooperative_cancellation_after_enough() {
        let token = CancellationToken::new();
        let fan = FanOut::new(1).with_cancellation(token.clone());
        let results = fan
            .run_settled(vec![1, 2, 3, 4], |index, n| {
                let token = token.clone();
                async move {
                    if index == 1 {
                        // Enough gathered; stop the rest.
                        token.cancel();
                    }
                    Ok(n)
                }
            })
            .await;

        assert_eq!(results[0], FanOutItem::Done(1));
        assert_eq!(results[1], FanOutItem::Done(2));
        assert_eq!(results[2], FanOutItem::Cancelled { index: 2 });
        assert_eq!(results[3], FanOutItem::Cancelled { index: 3 });
        assert!(matches!(
            results[3].clone().into_result(),
            Err(SkeinError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let fan = FanOut::new(3);
        let results: Vec<u8> = fan
            .try_run(Vec::<u8>::new(), |_, n| async move { Ok(n) })
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_limit_clamped() {
        assert_eq!(FanOut::new(0).limit(), 1);
        let config = FanOutConfig { concurrency: 6 };
        assert_eq!(FanOut::from_config(&config).limit(), 6);
    }
}
