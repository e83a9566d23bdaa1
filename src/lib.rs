//! Skein: typed graph orchestration for multi-step model workflows.
//!
//! This crate re-exports the public surface of `skein-core` and
//! `skein-graph`. See [`GraphBuilder`] for how a workflow is wired and
//! [`Orchestration`] for how it runs.

use std::path::Path;

use tracing::info;

pub use skein_core::config::{
    FanOutConfig, LogConfig, OrchestrationConfig, RefineConfig, SkeinConfig,
};
pub use skein_core::error::{FailureKind, Result, SkeinError};
pub use skein_core::event::EventBus;
pub use skein_core::types::{
    ChatMessage, GraphEvent, RequestMessage, ResponseMessage, Role, RunId,
};
pub use skein_core::logging;

pub use skein_graph::{
    describe_failure, keys, parse_structured, try_parse_structured, AdvancerConfig, Auxiliary,
    ChatModel, Conversation, FanOut, FanOutItem, GraphBuilder, ModelNode, NodeHandle,
    Orchestration, OrchestrationAdapter, ProcessScope, RefineDecision, RefinePolicy,
    ReviewOutcome, Reviewed, RunContext, RunOutcome, Runnable, RunnableProcess, StepRecord,
    TerminalResult,
};

/// Load configuration and install the log subscriber.
///
/// A missing file yields the defaults; a malformed one is an error.
pub fn bootstrap(config_path: Option<&Path>) -> Result<SkeinConfig> {
    let config = match config_path {
        Some(path) if path.exists() => SkeinConfig::load(path)?,
        _ => SkeinConfig::default(),
    };
    logging::init(&config.log);
    if let Some(path) = config_path {
        info!(path = %path.display(), max_steps = config.orchestration.max_steps, "Configuration loaded");
    }
    Ok(config)
}

/// A builder preconfigured from `config`.
pub fn builder<In, Out>(config: &SkeinConfig) -> GraphBuilder<In, Out>
where
    In: Send + 'static,
    Out: Send + std::fmt::Debug + 'static,
{
    GraphBuilder::new().with_config(config.orchestration.clone())
}
