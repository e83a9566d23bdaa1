use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::types::GraphEvent;

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events in emission order.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<GraphEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: GraphEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<GraphEvent> {
        self.tx.subscribe()
    }

    /// Forward every event to `callback` from a background task.
    ///
    /// The publisher never waits on the callback. A callback that falls more
    /// than `capacity` events behind skips the missed events. Must be called
    /// from within a tokio runtime.
    pub fn on_event<F>(&self, callback: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(GraphEvent) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event subscriber lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunId;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn progress(n: usize) -> GraphEvent {
        GraphEvent::Progress {
            run_id: RunId::from_str("r"),
            node: "n".into(),
            message: n.to_string(),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(progress(1));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_see_emission_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(progress(i));
        }
        for i in 0..5 {
            match rx.recv().await.unwrap() {
                GraphEvent::Progress { message, .. } => assert_eq!(message, i.to_string()),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_on_event_callback() {
        let bus = Arc::new(EventBus::new(16));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _handle = bus.on_event(move |event| {
            if let GraphEvent::Progress { message, .. } = event {
                sink.lock().unwrap().push(message);
            }
        });

        for i in 0..3 {
            bus.publish(progress(i));
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.lock().unwrap().len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("callback did not receive events");

        assert_eq!(*seen.lock().unwrap(), vec!["0", "1", "2"]);
    }
}
