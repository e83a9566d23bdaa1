use tokio::sync::broadcast::{self, error::TryRecvError};

use skein_core::event::EventBus;
use skein_core::types::GraphEvent;

/// Buffers every event published on a bus after it was attached.
pub struct EventCollector {
    rx: broadcast::Receiver<GraphEvent>,
    seen: Vec<GraphEvent>,
}

impl EventCollector {
    pub fn attach(bus: &EventBus) -> Self {
        Self {
            rx: bus.subscribe(),
            seen: Vec::new(),
        }
    }

    /// All events received so far, in emission order.
    pub fn events(&mut self) -> &[GraphEvent] {
        loop {
            match self.rx.try_recv() {
                Ok(event) => self.seen.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        &self.seen
    }

    pub fn kinds(&mut self) -> Vec<&'static str> {
        self.events().iter().map(event_kind).collect()
    }

    /// Names of started nodes, in order.
    pub fn node_trail(&mut self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                GraphEvent::NodeStarted { node, .. } => Some(node.clone()),
                _ => None,
            })
            .collect()
    }
}

pub fn event_kind(event: &GraphEvent) -> &'static str {
    match event {
        GraphEvent::RunStarted { .. } => "run_started",
        GraphEvent::NodeStarted { .. } => "node_started",
        GraphEvent::NodeFinished { .. } => "node_finished",
        GraphEvent::NodeError { .. } => "node_error",
        GraphEvent::AdvancerTaken { .. } => "advancer_taken",
        GraphEvent::DeadEnd { .. } => "dead_end",
        GraphEvent::Progress { .. } => "progress",
        GraphEvent::AuxiliaryRegistered { .. } => "auxiliary_registered",
        GraphEvent::RunCompleted { .. } => "run_completed",
        GraphEvent::RunFailed { .. } => "run_failed",
    }
}
