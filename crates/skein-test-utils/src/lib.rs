//! Shared mocks for Skein tests: scripted chat models, closure-backed nodes,
//! and an event collector.

mod events;
mod model;
mod nodes;

pub use events::{event_kind, EventCollector};
pub use model::ScriptedModel;
pub use nodes::{CountingInit, FnRunnable, NodeStats};
