use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised while loading and validating the source configuration document.
///
/// All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {message}")]
    Invalid { message: String },

    #[error("Configuration file not found (searched: {searched})")]
    NotFound { searched: String },

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Missing required field '{field}' in {context}")]
    MissingField { context: String, field: String },

    #[error("Source '{source_name}': unknown kind '{value}'")]
    UnknownKind { source_name: String, value: String },

    #[error("Unknown routing strategy '{value}' (expected auto, manual or multi)")]
    UnknownStrategy { value: String },

    #[error("Source '{source_name}': '{field}' {message}")]
    OutOfRange {
        source_name: String,
        field: String,
        message: String,
    },

    #[error("{context} references unknown source '{name}'")]
    DanglingReference { context: String, name: String },

    #[error("Duplicate source name '{name}'")]
    DuplicateSource { name: String },

    #[error("Source '{source_name}': '{field}' must be a ${{VAR}} placeholder, not a literal secret")]
    LiteralSecret { source_name: String, field: String },

    #[error("Placeholder ${{{var}}} in {context} is not set")]
    UnresolvedPlaceholder { context: String, var: String },
}

/// Failure of a single source call.
///
/// Handlers never retry; these are collected by the dispatcher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Bad response: {message}")]
    BadResponse { message: String },

    #[error("Unsupported: {message}")]
    Unsupported { message: String },
}

impl SourceError {
    /// The failure category, without the detail message.
    pub fn kind(&self) -> FailureKind {
        match self {
            SourceError::Timeout { .. } => FailureKind::Timeout,
            SourceError::ConnectionFailed { .. } => FailureKind::ConnectionFailed,
            SourceError::BadResponse { .. } => FailureKind::BadResponse,
            SourceError::Unsupported { .. } => FailureKind::Unsupported,
        }
    }
}

/// Category of a per-source failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ConnectionFailed,
    BadResponse,
    Unsupported,
}

impl FailureKind {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::ConnectionFailed => "connection_failed",
            FailureKind::BadResponse => "bad_response",
            FailureKind::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A source that was attempted and failed, recorded alongside partial results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: String,
    pub kind: FailureKind,
    pub message: String,
}

impl SourceFailure {
    pub fn new(source: impl Into<String>, error: &SourceError) -> Self {
        Self {
            source: source.into(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Request-level routing and dispatch errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Query text cannot be empty")]
    EmptyQuery,

    #[error("No eligible source: {reason}")]
    NoEligibleSource { reason: String },

    #[error("All sources failed: {}", summarize(.failures))]
    AllSourcesFailed { failures: Vec<SourceFailure> },
}

fn summarize(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.source, f.kind))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Session API misuse. Never fatal to the process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session already exists: {session_id}")]
    DuplicateSession { session_id: String },

    #[error("Session not found: {session_id}")]
    UnknownSession { session_id: String },
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias for a single source call
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type alias for routing and dispatch
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;
