//! Graph Orchestration Engine: typed multi-step model workflows.
//!
//! A workflow is a directed graph of [`Runnable`] nodes connected by
//! advancers. An advancer is a predicate over the source node's output plus
//! an optional converter into the target node's input. Cycles are allowed,
//! which is how review/improve loops are expressed.
//!
//! [`GraphBuilder`] validates the wiring once and produces an immutable
//! [`Orchestration`]. Each run walks the graph from the entry node, follows
//! the first matching advancer after every node, and ends at a result node,
//! at a dead-end node, or with an error. Nodes share data through a
//! run-scoped [`RunContext`] and report through the orchestration's event
//! bus.

pub mod adapter;
pub mod advancer;
pub mod builder;
pub mod context;
pub mod fanout;
pub mod model;
pub mod orchestration;
pub mod process;
pub mod refine;
pub mod runnable;

pub use adapter::{describe_failure, OrchestrationAdapter};
pub use advancer::AdvancerConfig;
pub use builder::{GraphBuilder, NodeHandle};
pub use context::{keys, RunContext};
pub use fanout::{FanOut, FanOutItem};
pub use model::{parse_structured, try_parse_structured, ChatModel, Conversation, ModelNode};
pub use orchestration::{Orchestration, RunOutcome, StepRecord, TerminalResult};
pub use process::{Auxiliary, ProcessScope, RunnableProcess};
pub use refine::{RefineDecision, RefinePolicy, ReviewOutcome, Reviewed};
pub use runnable::Runnable;
