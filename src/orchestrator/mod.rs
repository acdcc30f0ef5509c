//! Turn orchestration.
//!
//! An [`Orchestrator`] owns the backend, the tool dispatcher and the event
//! sink, and runs each user turn as a spawned task. The caller gets a
//! [`TurnHandle`]: a live event stream, a stop signal and the terminal
//! status. Every event is committed to the sink before the handle sees it.

mod runner;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::dispatch::ToolDispatcher;
use crate::error::OrchestratorError;
use crate::sink::EventSink;
use crate::traits::{CompletionBackend, ToolProvider};
use crate::types::{EventRecord, ThreadId, TurnId, TurnRef, TurnStatus};
use crate::utils::CancelHandle;

use runner::TurnRunner;

pub use runner::{HINT_LOOP_BOUND, HINT_THREAD_ID};

/// Tunables for turn execution.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on completion rounds per turn. A turn that still wants
    /// tool work past the bound is truncated with a hint and completed.
    pub max_tool_rounds: u32,
    /// Deadline for a single tool invocation.
    pub tool_timeout: Duration,
    /// Tool whose calls additionally surface `Code`/`CodeOutput` events.
    pub code_tool: Option<String>,
    /// Prepended to every model-facing history when set.
    pub system_prompt: Option<String>,
    /// Event channel depth between the runner and the handle.
    pub channel_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            tool_timeout: Duration::from_secs(30),
            code_tool: None,
            system_prompt: None,
            channel_capacity: 64,
        }
    }
}

/// Drives turns against one backend, one tool set and one sink.
pub struct Orchestrator {
    backend: Arc<dyn CompletionBackend>,
    sink: Arc<dyn EventSink>,
    dispatcher: Arc<ToolDispatcher>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        sink: Arc<dyn EventSink>,
        providers: Vec<Arc<dyn ToolProvider>>,
        mut config: OrchestratorConfig,
    ) -> Self {
        config.max_tool_rounds = config.max_tool_rounds.max(1);
        let dispatcher = Arc::new(ToolDispatcher::new(providers, config.tool_timeout));
        Self {
            backend,
            sink,
            dispatcher,
            config,
        }
    }

    /// Start a turn. `thread_id: None` opens a fresh thread; its id arrives
    /// as the turn's first event, a `ServerHint` with key `"thread_id"`.
    ///
    /// The turn runs to a terminal state even if the returned handle is
    /// dropped; the sink stays authoritative either way.
    pub fn start_turn(
        &self,
        thread_id: Option<ThreadId>,
        user_input: impl Into<String>,
    ) -> TurnHandle {
        let fresh_thread = thread_id.is_none();
        let thread_id = thread_id.unwrap_or_else(ThreadId::generate);
        let turn = TurnRef {
            thread_id: thread_id.clone(),
            turn_id: TurnId::generate(),
        };

        let (event_tx, event_rx) = mpsc::channel(self.config.channel_capacity);
        let (status_tx, status_rx) = oneshot::channel();
        let stop = CancelHandle::new();

        let runner = TurnRunner::new(
            self.backend.clone(),
            self.sink.clone(),
            self.dispatcher.clone(),
            self.config.clone(),
            turn.clone(),
            fresh_thread,
            user_input.into(),
            event_tx,
            stop.clone(),
        );
        tokio::spawn(runner.run(status_tx));

        TurnHandle {
            turn,
            events: event_rx,
            status: status_rx,
            stop,
        }
    }

    /// Replayable history of a thread, straight from the sink.
    pub async fn history(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Vec<EventRecord>, OrchestratorError> {
        self.sink.load_history(thread_id).await
    }
}

/// Caller-side view of one running turn.
pub struct TurnHandle {
    turn: TurnRef,
    events: mpsc::Receiver<Result<EventRecord, OrchestratorError>>,
    status: oneshot::Receiver<TurnStatus>,
    stop: CancelHandle,
}

impl TurnHandle {
    pub fn thread_id(&self) -> &ThreadId {
        &self.turn.thread_id
    }

    pub fn turn_id(&self) -> TurnId {
        self.turn.turn_id
    }

    /// Next committed event, `None` once the turn is over.
    pub async fn next_event(&mut self) -> Option<Result<EventRecord, OrchestratorError>> {
        self.events.recv().await
    }

    /// Request the turn to stop. The runner winds down at its next
    /// suspension point and closes the stream with `StreamEnd(stopped)`;
    /// in-flight provider work is only asked, not forced, to abort.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Drain any remaining events and return the terminal status.
    pub async fn wait(self) -> TurnStatus {
        let mut events = self.events;
        while events.recv().await.is_some() {}
        self.status.await.unwrap_or(TurnStatus::Failed)
    }
}

impl Stream for TurnHandle {
    type Item = Result<EventRecord, OrchestratorError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}
