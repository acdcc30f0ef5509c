//! Core data model: events, deltas, messages, threads and turns.

pub mod delta;
pub mod event;
pub mod message;
pub mod turn;

pub use delta::{CompletionDelta, DeltaStream, DeltaStreamHandle, FinishKind};
pub use event::{EndReason, EventRecord, StreamEvent};
pub use message::{ChatMessage, MessageRole, ToolCallRequest, messages_from_events};
pub use turn::{ThreadId, TurnId, TurnRef, TurnStatus};
