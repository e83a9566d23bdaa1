use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use skein_core::error::{FailureKind, Result, SkeinError};
use skein_core::types::{GraphEvent, RequestMessage, ResponseMessage, RunId};

use crate::context::{keys, RunContext};
use crate::orchestration::{Orchestration, RunOutcome};

type ToInput<In> = Box<dyn Fn(&RequestMessage, &RunContext) -> Result<In> + Send + Sync>;
type ToText<Out> = Box<dyn Fn(&Out) -> String + Send + Sync>;

/// Turns one external request into one graph run and one reply.
///
/// Raw errors are logged; the reply only says what kind of failure happened.
pub struct OrchestrationAdapter<In, Out> {
    orchestration: Arc<Orchestration<In, Out>>,
    to_input: ToInput<In>,
    to_text: ToText<Out>,
    failure_terminals: HashSet<String>,
}

impl<In, Out> OrchestrationAdapter<In, Out>
where
    In: Send + 'static,
    Out: Send + Debug + 'static,
{
    pub fn new<F, G>(orchestration: Arc<Orchestration<In, Out>>, to_input: F, to_text: G) -> Self
    where
        F: Fn(&RequestMessage, &RunContext) -> Result<In> + Send + Sync + 'static,
        G: Fn(&Out) -> String + Send + Sync + 'static,
    {
        Self {
            orchestration,
            to_input: Box::new(to_input),
            to_text: Box::new(to_text),
            failure_terminals: HashSet::new(),
        }
    }

    /// Values from this terminal are replied to but marked unsuccessful.
    pub fn with_failure_terminal(mut self, terminal: impl Into<String>) -> Self {
        self.failure_terminals.insert(terminal.into());
        self
    }

    pub fn orchestration(&self) -> &Arc<Orchestration<In, Out>> {
        &self.orchestration
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.orchestration.subscribe()
    }

    /// Handle one request. Never fails: every outcome becomes a reply.
    pub async fn handle(&self, request: RequestMessage) -> ResponseMessage {
        let context = RunContext::new();
        context.set_str(keys::REQUEST_ID, request.id.clone());
        context.set_str(keys::REQUEST_SESSION, request.session.clone());
        context.set_str(keys::REQUEST_TEXT, request.text.clone());

        let input = match (self.to_input)(&request, &context) {
            Ok(input) => input,
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "Rejected request");
                return ResponseMessage {
                    request_id: request.id,
                    text: "The request could not be understood.".to_string(),
                    succeeded: false,
                    terminal: None,
                    run_id: None,
                };
            }
        };

        info!(request_id = %request.id, session = %request.session, "Handling request");
        match self.orchestration.run(input, context.clone()).await {
            Ok(outcome) => self.reply(&request, outcome),
            Err(e) => {
                let run_id = context.get_str(keys::RUN_ID).map(|id| RunId::from_str(&id));
                error!(
                    request_id = %request.id,
                    run_id = run_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none"),
                    error = %e,
                    "Request failed"
                );
                ResponseMessage {
                    request_id: request.id,
                    text: describe_failure(&e),
                    succeeded: false,
                    terminal: None,
                    run_id,
                }
            }
        }
    }

    fn reply(&self, request: &RequestMessage, outcome: RunOutcome<Out>) -> ResponseMessage {
        let run_id = Some(outcome.run_id.clone());
        match outcome.results.into_iter().next() {
            Some(result) => {
                let succeeded = !self.failure_terminals.contains(&result.terminal);
                ResponseMessage {
                    request_id: request.id.clone(),
                    text: (self.to_text)(&result.value),
                    succeeded,
                    terminal: Some(result.terminal),
                    run_id,
                }
            }
            None => {
                let node = outcome.dead_end.unwrap_or_default();
                info!(request_id = %request.id, node = %node, "Run ended without a result");
                ResponseMessage {
                    request_id: request.id.clone(),
                    text: "No result was produced for this request.".to_string(),
                    succeeded: false,
                    terminal: None,
                    run_id,
                }
            }
        }
    }
}

/// User-facing description of a failed run.
pub fn describe_failure(error: &SkeinError) -> String {
    let node = error.node_name().unwrap_or("unknown");
    match error.kind() {
        FailureKind::NodeCrash => format!(
            "The request failed while step '{}' was running. Please try again.",
            node
        ),
        FailureKind::Configuration => format!(
            "The workflow could not continue after step '{}'. This is a workflow configuration problem.",
            node
        ),
        FailureKind::Construction => "The workflow is not set up correctly.".to_string(),
        FailureKind::Other => match error {
            SkeinError::Cancelled => "The request was cancelled.".to_string(),
            _ => "The request could not be completed.".to_string(),
        },
    }
}
