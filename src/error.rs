//! Error types for the orchestrator core.
//!
//! The taxonomy mirrors how failures propagate: tool-level errors are
//! recovered locally and folded back into the conversation, backend and
//! persistence errors terminate the turn.

use thiserror::Error;

/// Top-level error for a conversation turn.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The model backend was unreachable or produced a malformed stream.
    /// Aborts the current turn with `StreamEnd(reason = "error")`.
    #[error("model backend error: {message}")]
    Backend { message: String },

    /// A tool-dispatch failure. Isolated to the offending call; the turn
    /// continues with the error folded into the model-facing history.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// A durable commit failed. Fatal for the turn: no further events may be
    /// released once an append has not committed.
    #[error("persistence commit failed: {message}")]
    Persistence { message: String },
}

impl OrchestratorError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Whether this error terminates the turn without a normal `StreamEnd`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }
}

/// Errors raised while dispatching a single tool call.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The model asked for a tool outside the configured set.
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    /// The call exceeded its deadline. The provider call is asked to stop but
    /// is not guaranteed to.
    #[error("tool '{tool}' timed out after {elapsed_ms}ms")]
    Timeout { tool: String, elapsed_ms: u64 },

    /// The provider reported the session as no longer valid. Triggers exactly
    /// one re-creation attempt.
    #[error("tool '{tool}' session expired")]
    SessionExpired { tool: String },

    /// The provider returned a failure for this invocation.
    #[error("tool '{tool}' failed: {message}")]
    Provider { tool: String, message: String },

    /// Accumulated argument fragments did not form valid JSON.
    #[error("tool '{tool}' received malformed arguments")]
    MalformedArguments { tool: String, raw: String },
}

impl ToolError {
    /// The tool name this error is attributed to.
    pub fn tool_name(&self) -> &str {
        match self {
            Self::UnknownTool { name } => name,
            Self::Timeout { tool, .. }
            | Self::SessionExpired { tool }
            | Self::Provider { tool, .. }
            | Self::MalformedArguments { tool, .. } => tool,
        }
    }
}
