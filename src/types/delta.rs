//! Raw completion-delta types emitted by the model backend.

use std::pin::Pin;

use futures::Stream;

use crate::error::OrchestratorError;
use crate::utils::cancel::CancelHandle;

/// One fragment of a streaming completion.
///
/// Backend-level failures arrive as `Err` items on the stream rather than a
/// delta kind of their own.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionDelta {
    /// Incremental assistant text.
    Text { content: String },
    /// A tool call opened at `index` with its id and name.
    ToolCallStart {
        index: u32,
        call_id: String,
        tool_name: String,
    },
    /// A JSON fragment of the arguments for the call at `index`.
    ToolCallArguments { index: u32, fragment: String },
    /// The call at `index` has no further argument fragments.
    ToolCallEnd { index: u32 },
    /// The model is done with this completion round.
    Finish { reason: FinishKind },
}

/// Why the backend finished a completion round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishKind {
    /// A plain completion; the turn can finalize.
    Stop,
    /// The model requested tool calls; another round follows dispatch.
    ToolCalls,
}

/// Pinned, boxed stream of completion deltas.
pub type DeltaStream =
    Pin<Box<dyn Stream<Item = Result<CompletionDelta, OrchestratorError>> + Send>>;

/// A delta stream paired with a handle that cancels the in-flight completion.
pub struct DeltaStreamHandle {
    pub stream: DeltaStream,
    pub cancel: CancelHandle,
}

impl DeltaStreamHandle {
    /// Wrap a plain stream with a fresh cancellation handle. Cancelling stops
    /// consumption; dropping the stream releases the backend connection.
    pub fn new(stream: DeltaStream) -> Self {
        let (stream, cancel) = crate::utils::cancel::make_cancellable_stream(stream);
        Self { stream, cancel }
    }
}
