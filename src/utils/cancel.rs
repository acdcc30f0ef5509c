//! Cancellation utilities.
//!
//! A `CancelHandle` is the advisory stop signal shared between the turn
//! runner, in-flight completion streams, and tool dispatch tasks. It is
//! authoritative for the orchestrator's own progression and best-effort for
//! provider-side work.

use tokio_util::sync::CancellationToken;

use crate::types::delta::DeltaStream;

/// A handle that can be used to request cancellation.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Request cancellation. Wrapped streams observing this handle stop as
    /// soon as possible; outstanding provider calls are only asked to stop.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A future that resolves when cancellation is requested.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Make a delta stream cancellable and return its cancel handle.
pub fn make_cancellable_stream(stream: DeltaStream) -> (DeltaStream, CancelHandle) {
    let handle = CancelHandle::new();
    let token = handle.token.clone();
    let mut inner = stream;
    let s = async_stream::stream! {
        use futures::StreamExt;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                item = inner.next() => {
                    let Some(item) = item else { break };
                    yield item;
                }
            }
        }
    };
    (Box::pin(s), handle)
}
