use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use skein_core::error::{Result, SkeinError};
use skein_core::types::ChatMessage;

use crate::context::RunContext;
use crate::process::{Auxiliary, RunnableProcess};
use crate::runnable::Runnable;

/// A chat-completion backend. Vendor transports live outside this crate.
pub trait ChatModel: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Send the whole conversation and return the assistant's reply text.
    fn complete(&self, messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<String>>;
}

impl<M: ChatModel> ChatModel for Arc<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn complete(&self, messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<String>> {
        (**self).complete(messages)
    }
}

/// Message history of one model call, registered as a run auxiliary.
pub struct Conversation {
    model: String,
    messages: Mutex<Vec<ChatMessage>>,
    cancel: CancellationToken,
}

impl Conversation {
    pub fn new(model: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            model: model.into(),
            messages: Mutex::new(Vec::new()),
            cancel,
        }
    }

    pub fn push(&self, message: ChatMessage) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message);
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Auxiliary for Conversation {
    fn describe(&self) -> String {
        format!("conversation with {} ({} messages)", self.model, self.len())
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

type Render<I> = Box<dyn Fn(&I, &RunContext) -> String + Send + Sync>;
type OnCancel<T> = Box<dyn Fn(&RunContext) -> T + Send + Sync>;

/// A node that renders a prompt from its input, asks a [`ChatModel`] and
/// parses the reply into `T`.
///
/// An unparseable reply becomes `T::default()` so predicates can route it.
/// Cancelling the run while the model is busy also yields an ordinary
/// output, `T::default()` unless [`ModelNode::on_cancel`] says otherwise.
/// Transport errors, and an abort of the conversation itself, fail the
/// traversal.
pub struct ModelNode<I, T> {
    name: String,
    model: Arc<dyn ChatModel>,
    system_prompt: Option<String>,
    render: Render<I>,
    on_cancel: Option<OnCancel<T>>,
    dead_end: bool,
    _output: PhantomData<fn() -> T>,
}

impl<I, T> ModelNode<I, T>
where
    I: Send + 'static,
    T: DeserializeOwned + Default + Send + Debug + 'static,
{
    pub fn new<F>(name: impl Into<String>, model: Arc<dyn ChatModel>, render: F) -> Self
    where
        F: Fn(&I, &RunContext) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            model,
            system_prompt: None,
            render: Box::new(render),
            on_cancel: None,
            dead_end: false,
            _output: PhantomData,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn allow_dead_end(mut self) -> Self {
        self.dead_end = true;
        self
    }

    /// Output produced when the run is cancelled mid-call.
    pub fn on_cancel<F>(mut self, output: F) -> Self
    where
        F: Fn(&RunContext) -> T + Send + Sync + 'static,
    {
        self.on_cancel = Some(Box::new(output));
        self
    }
}

impl<I, T> Runnable for ModelNode<I, T>
where
    I: Send + 'static,
    T: DeserializeOwned + Default + Send + Debug + 'static,
{
    type Input = I;
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn allows_dead_end(&self) -> bool {
        self.dead_end
    }

    fn invoke(&self, process: RunnableProcess<I>) -> BoxFuture<'_, Result<T>> {
        Box::pin(async move {
            let prompt = (self.render)(process.input(), process.context());

            let conversation = Arc::new(Conversation::new(
                self.model.name(),
                process.cancellation().child_token(),
            ));
            if let Some(system) = &self.system_prompt {
                conversation.push(ChatMessage::system(system.clone()));
            }
            conversation.push(ChatMessage::user(prompt));
            process.register_auxiliary(conversation.clone());

            debug!(node = %self.name, model = %self.model.name(), "Calling model");
            let reply = tokio::select! {
                _ = conversation.cancel.cancelled() => {
                    if !process.scope().is_cancelled() {
                        // Aborted through the auxiliary, not by the caller.
                        return Err(SkeinError::Cancelled);
                    }
                    warn!(node = %self.name, "Run cancelled while waiting for the model");
                    process.progress("cancelled before the model replied");
                    return Ok(match &self.on_cancel {
                        Some(output) => output(process.context()),
                        None => T::default(),
                    });
                }
                reply = self.model.complete(conversation.messages()) => reply?,
            };
            conversation.push(ChatMessage::assistant(reply.clone()));
            process.progress(format!("{} replied ({} chars)", self.model.name(), reply.len()));

            Ok(parse_structured::<T>(&reply))
        })
    }
}

/// Parse a model reply into `T`, falling back to `T::default()`.
///
/// JSON is taken from a fenced code block or the outermost braces; a reply
/// with no JSON is tried as a plain string, so `T = String` keeps the text.
pub fn parse_structured<T: DeserializeOwned + Default>(reply: &str) -> T {
    match try_parse_structured(reply) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, response = %reply, "Failed to parse model response");
            T::default()
        }
    }
}

/// Strict variant of [`parse_structured`].
pub fn try_parse_structured<T: DeserializeOwned>(reply: &str) -> Result<T> {
    let json = extract_json(reply);
    match serde_json::from_str::<T>(json) {
        Ok(value) => Ok(value),
        Err(e) => serde_json::from_value(serde_json::Value::String(reply.trim().to_string()))
            .map_err(|_| SkeinError::ModelParse(e.to_string())),
    }
}

fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    for fence in ["```json", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let after = &trimmed[start + fence.len()..];
            if let Some(end) = after.find("```") {
                return after[..end].trim();
            }
        }
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return &trimmed[start..=end];
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::test_scope;
    use crate::refine::ReviewOutcome;
    use skein_core::event::EventBus;
    use skein_core::types::{GraphEvent, Role};

    struct Canned {
        reply: String,
        seen: Mutex<Vec<ChatMessage>>,
    }

    impl Canned {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.into(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl ChatModel for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        fn complete(&self, messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<String>> {
            *self.seen.lock().unwrap() = messages;
            let reply = self.reply.clone();
            Box::pin(async move { Ok(reply) })
        }
    }

    struct Hanging;

    impl ChatModel for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        fn complete(&self, _messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<String>> {
            Box::pin(futures::future::pending())
        }
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json("```\n{\"a\":2}\n```"), "{\"a\":2}");
        assert_eq!(extract_json("Sure! {\"a\":3} hope that helps"), "{\"a\":3}");
        assert_eq!(extract_json("  plain  "), "plain");
    }

    #[test]
    fn test_parse_structured_falls_back_to_default() {
        let review: ReviewOutcome = parse_structured("I cannot review this.");
        assert_eq!(review, ReviewOutcome::default());

        let review: ReviewOutcome =
            parse_structured("```json\n{\"approved\": false, \"critical\": true}\n```");
        assert!(review.critical);
    }

    #[test]
    fn test_parse_structured_plain_text() {
        let text: String = parse_structured("  Just words.  ");
        assert_eq!(text, "Just words.");
        assert!(try_parse_structured::<ReviewOutcome>("nope").is_err());
    }

    #[tokio::test]
    async fn test_model_node_renders_and_registers_conversation() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let model = Canned::new(r#"{"approved": true, "feedback": "fine"}"#);
        let node: ModelNode<String, ReviewOutcome> =
            ModelNode::new("review", model.clone(), |draft: &String, _: &RunContext| {
                format!("Review: {}", draft)
            })
            .with_system_prompt("You are an editor.");

        let (scope, registry) = test_scope(bus);
        let review = node
            .invoke(RunnableProcess::new("draft one".to_string(), scope))
            .await
            .unwrap();

        assert!(review.approved);
        assert_eq!(review.feedback, "fine");

        let seen = model.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].role, Role::System);
        assert_eq!(seen[1].content, "Review: draft one");

        assert_eq!(
            registry.descriptions(),
            vec!["node: conversation with canned (3 messages)"]
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            GraphEvent::AuxiliaryRegistered { .. }
        ));
    }

    #[tokio::test]
    async fn test_model_node_stops_when_conversation_cancelled() {
        let node: ModelNode<(), String> =
            ModelNode::new("stuck", Arc::new(Hanging), |_: &(), _: &RunContext| {
                "hello".to_string()
            });
        let (scope, registry) = test_scope(Arc::new(EventBus::default()));
        let process = RunnableProcess::new((), scope);

        let handle = tokio::spawn(async move { node.invoke(process).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        registry.cancel_all();

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(SkeinError::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_cancellation_is_an_ordinary_output() {
        let node: ModelNode<(), String> =
            ModelNode::new("stuck", Arc::new(Hanging), |_: &(), _: &RunContext| {
                "hello".to_string()
            })
            .on_cancel(|_| "gave up".to_string());
        let (scope, _) = test_scope(Arc::new(EventBus::default()));
        let run_token = scope.cancellation().clone();
        let process = RunnableProcess::new((), scope);

        let handle = tokio::spawn(async move { node.invoke(process).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        run_token.cancel();

        let output = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(output, "gave up");
    }

    #[tokio::test]
    async fn test_run_cancellation_defaults_without_hook() {
        let node: ModelNode<(), ReviewOutcome> =
            ModelNode::new("review", Arc::new(Hanging), |_: &(), _: &RunContext| {
                "review".to_string()
            });
        let (scope, _) = test_scope(Arc::new(EventBus::default()));
        scope.cancellation().cancel();

        let output = node.invoke(RunnableProcess::new((), scope)).await.unwrap();
        assert_eq!(output, ReviewOutcome::default());
    }
}
