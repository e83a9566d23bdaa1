use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkeinError {
    // Graph construction errors
    #[error("Graph has no entry node")]
    MissingEntry,

    #[error("Graph has no result nodes")]
    NoResultNodes,

    #[error("Node '{0}' is not reachable from the entry node")]
    Unreachable(String),

    #[error("Advancer {from} -> {to} delivers {produced} but '{to}' expects {expected}")]
    EdgeTypeMismatch {
        from: String,
        to: String,
        produced: &'static str,
        expected: &'static str,
    },

    #[error("Node '{0}' belongs to a different graph builder")]
    ForeignNode(String),

    #[error("Duplicate node name: {0}")]
    DuplicateNodeName(String),

    #[error("No result or dead-end node is reachable from '{0}'")]
    NoTerminalPath(String),

    // Traversal configuration errors
    #[error("No advancer matched the output of '{node}' and it does not permit dead ends")]
    NoMatchingAdvancer { node: String },

    #[error("Step limit of {limit} exceeded at node '{node}'")]
    StepLimitExceeded { limit: usize, node: String },

    // Node crashes
    #[error("Node '{node}' crashed: {source}")]
    NodeCrashed {
        node: String,
        #[source]
        source: Box<SkeinError>,
    },

    #[error("Node '{node}' failed to initialize: {source}")]
    Initialize {
        node: String,
        #[source]
        source: Box<SkeinError>,
    },

    // Node-level errors
    #[error("{0}")]
    Node(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Refinement loop already used all {max_iterations} iterations")]
    RefineCapExceeded { max_iterations: u32 },

    #[error("Value type mismatch: expected {expected}")]
    TypeMismatch { expected: &'static str },

    #[error("Model request failed: {0}")]
    ModelRequest(String),

    #[error("Model response parse error: {0}")]
    ModelParse(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification used by callers that must tell a broken graph
/// apart from a node that crashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The graph could not be built.
    Construction,
    /// The graph was built but routed into a state it cannot leave
    /// (no matching advancer, step cap exceeded).
    Configuration,
    /// A node's `invoke` or `initialize` returned an error.
    NodeCrash,
    Other,
}

impl SkeinError {
    /// Convenience constructor for node authors.
    pub fn node(message: impl Into<String>) -> Self {
        Self::Node(message.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MissingEntry
            | Self::NoResultNodes
            | Self::Unreachable(_)
            | Self::EdgeTypeMismatch { .. }
            | Self::ForeignNode(_)
            | Self::DuplicateNodeName(_)
            | Self::NoTerminalPath(_) => FailureKind::Construction,
            Self::NoMatchingAdvancer { .. } | Self::StepLimitExceeded { .. } => {
                FailureKind::Configuration
            }
            Self::NodeCrashed { .. } | Self::Initialize { .. } => FailureKind::NodeCrash,
            _ => FailureKind::Other,
        }
    }

    /// Name of the node the failure is attributed to, if any.
    pub fn node_name(&self) -> Option<&str> {
        match self {
            Self::NoMatchingAdvancer { node }
            | Self::StepLimitExceeded { node, .. }
            | Self::NodeCrashed { node, .. }
            | Self::Initialize { node, .. } => Some(node),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SkeinError>;
