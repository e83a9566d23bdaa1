use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use skein_core::error::{Result, SkeinError};
use skein_core::types::ChatMessage;
use skein_graph::ChatModel;

/// A chat model that replies from a fixed script, in order.
///
/// Running past the end of the script is a request error.
pub struct ScriptedModel {
    name: String,
    replies: Mutex<VecDeque<Result<String>>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: "scripted".to_string(),
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Queue a transport failure after the current script.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(SkeinError::ModelRequest(message.into())));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Messages sent on every call so far.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    /// Content of the last user message of each call.
    pub fn prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|messages| messages.last().map(|m| m.content.clone()))
            .collect()
    }
}

impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&self, messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<String>> {
        self.calls.lock().unwrap().push(messages);
        let next = self.replies.lock().unwrap().pop_front();
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            next.unwrap_or_else(|| Err(SkeinError::ModelRequest("script exhausted".into())))
        })
    }
}
