pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod types;

pub use config::SkeinConfig;
pub use error::{FailureKind, Result, SkeinError};
pub use event::EventBus;
pub use types::*;
