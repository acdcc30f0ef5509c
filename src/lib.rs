//! turnstream
//!
//! Streaming conversation orchestrator: consumes a model backend's delta
//! stream, reassembles it into complete events, dispatches requested tool
//! calls concurrently, persists every event before emitting it, and re-arms
//! the model with tool results until the turn completes.
//!
//! The backend and the tools are trait objects ([`CompletionBackend`],
//! [`ToolProvider`]); the crate supplies the loop between them.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use turnstream::{Orchestrator, OrchestratorConfig, MemorySink};
//!
//! let orchestrator = Orchestrator::new(
//!     Arc::new(backend),
//!     Arc::new(MemorySink::new()),
//!     vec![Arc::new(code_tool)],
//!     OrchestratorConfig::default(),
//! );
//! let mut turn = orchestrator.start_turn(None, "plot the temperature trend");
//! while let Some(event) = turn.next_event().await {
//!     println!("{:?}", event?);
//! }
//! ```
#![deny(unsafe_code)]

pub mod accumulator;
pub mod dispatch;
pub mod error;
pub mod observability;
pub mod orchestrator;
pub mod sink;
pub mod traits;
pub mod types;
pub mod utils;

pub use accumulator::{CompletedToolCall, DeltaAccumulator, FailedToolCall, RoundSummary};
pub use dispatch::{ToolDispatcher, ToolOutcome, ToolSessionRegistry};
pub use error::{OrchestratorError, ToolError};
pub use orchestrator::{Orchestrator, OrchestratorConfig, TurnHandle};
pub use sink::{EventSink, JsonlSink, MemorySink};
pub use traits::{CompletionBackend, SessionHandle, ToolProvider, ToolSchema};
pub use types::{
    ChatMessage, CompletionDelta, DeltaStream, DeltaStreamHandle, EndReason, EventRecord,
    FinishKind, MessageRole, StreamEvent, ThreadId, ToolCallRequest, TurnId, TurnRef, TurnStatus,
};
pub use utils::CancelHandle;

/// Convenience re-exports for embedding applications.
pub mod prelude {
    pub use crate::error::{OrchestratorError, ToolError};
    pub use crate::orchestrator::{Orchestrator, OrchestratorConfig, TurnHandle};
    pub use crate::sink::{EventSink, JsonlSink, MemorySink};
    pub use crate::traits::{CompletionBackend, SessionHandle, ToolProvider, ToolSchema};
    pub use crate::types::{
        CompletionDelta, DeltaStreamHandle, EndReason, EventRecord, FinishKind, StreamEvent,
        ThreadId, TurnStatus,
    };
}
