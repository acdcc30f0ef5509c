//! Boundary traits for the external collaborators the orchestrator drives:
//! the model backend and the tool providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OrchestratorError, ToolError};
use crate::types::{ChatMessage, DeltaStreamHandle, ThreadId};

/// Callable schema a tool provider exports, forwarded to the backend at turn
/// start so the model knows what it may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Opaque provider-specific session handle, bound to one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle(pub String);

impl SessionHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The language-model backend: one streaming completion per call.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Start a completion over `history` with `tools` exported to the model.
    /// The returned handle's cancel is honoured best-effort by the backend.
    async fn start_completion(
        &self,
        history: Vec<ChatMessage>,
        tools: Vec<ToolSchema>,
    ) -> Result<DeltaStreamHandle, OrchestratorError>;
}

/// An external tool provider (code execution, retrieval, ...).
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Stable tool name the model addresses this provider by.
    fn name(&self) -> &str;

    /// Callable schema exported to the backend.
    fn schema(&self) -> ToolSchema;

    /// Create a per-thread session. Called lazily on first use and again
    /// (once) after the provider reports `SessionExpired`.
    async fn create_session(&self, thread_id: &ThreadId) -> Result<SessionHandle, ToolError>;

    /// Invoke the tool. `Err(ToolError::SessionExpired { .. })` triggers one
    /// session re-creation and retry.
    async fn invoke(&self, session: &SessionHandle, arguments: Value)
        -> Result<Value, ToolError>;

    /// Ask the provider to abandon an in-flight call. Best-effort; the
    /// default does nothing.
    async fn cancel(&self, _session: &SessionHandle, _call_id: &str) -> Result<(), ToolError> {
        Ok(())
    }
}
