use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one orchestration run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a model conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message exchanged with a chat model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// An external request handed to an orchestration adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    pub id: String,
    pub session: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl RequestMessage {
    pub fn new(session: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session: session.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The single reply produced for a `RequestMessage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub request_id: String,
    pub text: String,
    /// Whether a result terminal produced a value.
    pub succeeded: bool,
    /// Name of the terminal that produced the value, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<String>,
    /// Absent when the request was rejected before a run started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
}

/// Lifecycle event broadcast while an orchestration runs.
///
/// Delivery is best-effort; nothing in the engine depends on a subscriber
/// receiving any of these.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    /// A traversal started at the entry node.
    RunStarted {
        run_id: RunId,
        entry: String,
        started_at: DateTime<Utc>,
    },
    /// A node is about to be invoked.
    NodeStarted {
        run_id: RunId,
        node: String,
        step: usize,
    },
    /// A node returned an output.
    NodeFinished {
        run_id: RunId,
        node: String,
        step: usize,
        output: String,
        elapsed_ms: u64,
    },
    /// A node crashed (initialize or invoke returned an error).
    NodeError {
        run_id: RunId,
        node: String,
        error: String,
    },
    /// An advancer fired and the traversal moved on.
    AdvancerTaken {
        run_id: RunId,
        from: String,
        to: String,
        label: Option<String>,
    },
    /// A dead-end-permitted node ended the traversal without a result.
    DeadEnd { run_id: RunId, node: String },
    /// Domain progress reported by a node.
    Progress {
        run_id: RunId,
        node: String,
        message: String,
    },
    /// A node registered an auxiliary object for tracing.
    AuxiliaryRegistered {
        run_id: RunId,
        node: String,
        description: String,
    },
    /// The traversal finished.
    RunCompleted {
        run_id: RunId,
        steps: usize,
        results: usize,
    },
    /// The traversal aborted with an error.
    RunFailed { run_id: RunId, error: String },
}

impl GraphEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeFinished { run_id, .. }
            | Self::NodeError { run_id, .. }
            | Self::AdvancerTaken { run_id, .. }
            | Self::DeadEnd { run_id, .. }
            | Self::Progress { run_id, .. }
            | Self::AuxiliaryRegistered { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunFailed { run_id, .. } => run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique() {
        let a = RunId::new();
        let b = RunId::new();
        assert_ne!(a, b);
        assert_eq!(RunId::from_str("r1").to_string(), "r1");
    }

    #[test]
    fn test_chat_message_serializes_lowercase_role() {
        let msg = ChatMessage::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn test_event_run_id() {
        let id = RunId::from_str("abc");
        let event = GraphEvent::DeadEnd {
            run_id: id.clone(),
            node: "n".into(),
        };
        assert_eq!(event.run_id(), &id);
    }
}
