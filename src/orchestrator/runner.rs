//! The turn state machine.
//!
//! One runner instance executes one turn on a spawned task: stream a
//! completion, reassemble it into events, dispatch any tool calls, feed the
//! results back, and repeat until the model stops, the round budget runs
//! out, the caller stops the turn, or something fails. Persistence is the
//! commit point: an event reaches the handle only after the sink accepted it.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};

use crate::accumulator::{DeltaAccumulator, RoundSummary};
use crate::dispatch::{ToolDispatcher, ToolOutcome};
use crate::error::{OrchestratorError, ToolError};
use crate::sink::EventSink;
use crate::traits::CompletionBackend;
use crate::types::{
    messages_from_events, ChatMessage, DeltaStreamHandle, EndReason, EventRecord, MessageRole,
    StreamEvent, ToolCallRequest, TurnRef, TurnStatus,
};
use crate::utils::CancelHandle;

use super::OrchestratorConfig;

/// Hint key carrying the generated id of a fresh thread.
pub const HINT_THREAD_ID: &str = "thread_id";
/// Hint key flagging truncation at the round budget.
pub const HINT_LOOP_BOUND: &str = "loop_bound";

enum RoundEnd {
    Drained,
    Stopped,
    Errored,
}

/// The assistant message recording what the model said and which calls it
/// requested this round, including calls that failed assembly (their raw
/// argument buffer stands in for the parsed document).
fn assistant_request_message(round_text: &str, summary: &RoundSummary) -> ChatMessage {
    let mut tool_calls: Vec<ToolCallRequest> = summary
        .completed
        .iter()
        .map(|call| ToolCallRequest {
            id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            arguments: call.arguments.clone(),
        })
        .collect();
    tool_calls.extend(summary.failed.iter().map(|call| ToolCallRequest {
        id: call.call_id.clone(),
        tool_name: call.tool_name.clone(),
        arguments: serde_json::Value::String(call.raw_arguments.clone()),
    }));
    ChatMessage {
        role: MessageRole::Assistant,
        content: (!round_text.is_empty()).then(|| round_text.to_string()),
        tool_calls,
        tool_call_id: None,
    }
}

pub(super) struct TurnRunner {
    backend: Arc<dyn CompletionBackend>,
    sink: Arc<dyn EventSink>,
    dispatcher: Arc<ToolDispatcher>,
    config: OrchestratorConfig,
    turn: TurnRef,
    fresh_thread: bool,
    user_input: String,
    events: mpsc::Sender<Result<EventRecord, OrchestratorError>>,
    stop: CancelHandle,
    seq: u64,
}

impl TurnRunner {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        backend: Arc<dyn CompletionBackend>,
        sink: Arc<dyn EventSink>,
        dispatcher: Arc<ToolDispatcher>,
        config: OrchestratorConfig,
        turn: TurnRef,
        fresh_thread: bool,
        user_input: String,
        events: mpsc::Sender<Result<EventRecord, OrchestratorError>>,
        stop: CancelHandle,
    ) -> Self {
        Self {
            backend,
            sink,
            dispatcher,
            config,
            turn,
            fresh_thread,
            user_input,
            events,
            stop,
            seq: 0,
        }
    }

    pub(super) async fn run(mut self, status: oneshot::Sender<TurnStatus>) {
        let outcome = self.run_inner().await;
        let final_status = match outcome {
            Ok(status) => status,
            Err(err) => {
                // Persistence is the one failure we cannot paper over with a
                // terminal event: the terminal event itself may not commit.
                tracing::error!(
                    thread_id = %self.turn.thread_id,
                    turn_id = %self.turn.turn_id,
                    error = %err,
                    "turn aborted"
                );
                let _ = self.events.send(Err(err)).await;
                TurnStatus::Failed
            }
        };
        tracing::info!(
            thread_id = %self.turn.thread_id,
            turn_id = %self.turn.turn_id,
            status = ?final_status,
            "turn finished"
        );
        let _ = status.send(final_status);
    }

    async fn run_inner(&mut self) -> Result<TurnStatus, OrchestratorError> {
        let history = self.sink.load_history(&self.turn.thread_id).await?;

        if self.fresh_thread {
            self.persist_emit(StreamEvent::ServerHint {
                key: HINT_THREAD_ID.to_string(),
                value: serde_json::Value::String(self.turn.thread_id.to_string()),
            })
            .await?;
        }
        self.persist_emit(StreamEvent::User {
            text: self.user_input.clone(),
        })
        .await?;

        let mut messages = messages_from_events(&history);
        if let Some(prompt) = &self.config.system_prompt {
            messages.insert(0, ChatMessage::system(prompt.clone()));
        }
        messages.push(ChatMessage::user(self.user_input.clone()));

        for round in 0..self.config.max_tool_rounds {
            if self.stop.is_cancelled() {
                return self.finish(EndReason::Stopped, TurnStatus::Stopped).await;
            }
            tracing::debug!(turn_id = %self.turn.turn_id, round, "starting completion round");

            let handle = match self
                .backend
                .start_completion(messages.clone(), self.dispatcher.schemas())
                .await
            {
                Ok(handle) => handle,
                Err(err) => {
                    tracing::warn!(error = %err, "backend refused completion");
                    return self.finish(EndReason::Error, TurnStatus::Failed).await;
                }
            };

            let mut accumulator = match &self.config.code_tool {
                Some(name) => DeltaAccumulator::new().with_code_tool(name.clone()),
                None => DeltaAccumulator::new(),
            };
            let mut round_text = String::new();

            match self
                .drain_round(handle, &mut accumulator, &mut round_text)
                .await?
            {
                RoundEnd::Drained => {}
                RoundEnd::Stopped => {
                    return self.finish(EndReason::Stopped, TurnStatus::Stopped).await;
                }
                RoundEnd::Errored => {
                    return self.finish(EndReason::Error, TurnStatus::Failed).await;
                }
            }

            let summary = accumulator.into_summary();
            if summary.finish.is_none() {
                // The stream ended without a finish marker: the backend went
                // away mid-completion, not a clean round.
                tracing::warn!(
                    turn_id = %self.turn.turn_id,
                    "completion stream ended without a finish marker"
                );
                return self.finish(EndReason::Error, TurnStatus::Failed).await;
            }
            if summary.is_final() {
                return self
                    .finish(EndReason::Completed, TurnStatus::Completed)
                    .await;
            }

            messages.push(assistant_request_message(&round_text, &summary));

            // Calls that never assembled join the dispatched ones so every
            // call id is answered on the next round.
            let mut outcomes: Vec<ToolOutcome> = summary
                .failed
                .iter()
                .map(|failed| ToolOutcome {
                    call_id: failed.call_id.clone(),
                    tool_name: failed.tool_name.clone(),
                    result: Err(failed.to_error()),
                })
                .collect();
            outcomes.extend(
                self.dispatcher
                    .dispatch(&self.turn.thread_id, summary.completed, &self.stop)
                    .await,
            );
            if self.stop.is_cancelled() {
                return self.finish(EndReason::Stopped, TurnStatus::Stopped).await;
            }
            outcomes.sort_by(|a, b| a.call_id.cmp(&b.call_id));

            for outcome in outcomes {
                // Assembly failures already surfaced their error while the
                // stream was live; only dispatch outcomes produce events here.
                if !matches!(outcome.result, Err(ToolError::MalformedArguments { .. })) {
                    for event in outcome.events(self.config.code_tool.as_deref()) {
                        self.persist_emit(event).await?;
                    }
                }
                messages.push(outcome.rearm_message());
            }
        }

        // Round budget exhausted with tool work still pending: tell the
        // client and complete rather than spin.
        tracing::warn!(
            turn_id = %self.turn.turn_id,
            rounds = self.config.max_tool_rounds,
            "round budget exhausted; truncating turn"
        );
        self.persist_emit(StreamEvent::ServerHint {
            key: HINT_LOOP_BOUND.to_string(),
            value: serde_json::json!(self.config.max_tool_rounds),
        })
        .await?;
        self.finish(EndReason::Completed, TurnStatus::Completed)
            .await
    }

    /// Pump one completion stream into the accumulator, persisting and
    /// emitting every complete event as it forms.
    async fn drain_round(
        &mut self,
        handle: DeltaStreamHandle,
        accumulator: &mut DeltaAccumulator,
        round_text: &mut String,
    ) -> Result<RoundEnd, OrchestratorError> {
        let DeltaStreamHandle {
            mut stream,
            cancel: backend_cancel,
        } = handle;
        let stop = self.stop.clone();
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    backend_cancel.cancel();
                    for event in accumulator.flush_on_error() {
                        self.persist_emit(event).await?;
                    }
                    return Ok(RoundEnd::Stopped);
                }
                delta = stream.next() => match delta {
                    None => {
                        // A clean round flushed at its finish marker; only a
                        // truncated stream still holds text here.
                        for event in accumulator.flush_on_error() {
                            self.persist_emit(event).await?;
                        }
                        return Ok(RoundEnd::Drained);
                    }
                    Some(Ok(delta)) => {
                        for event in accumulator.absorb(delta) {
                            if let StreamEvent::Assistant { text } = &event {
                                round_text.push_str(text);
                            }
                            self.persist_emit(event).await?;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "completion stream failed");
                        // Keep whatever prose already arrived.
                        for event in accumulator.flush_on_error() {
                            self.persist_emit(event).await?;
                        }
                        return Ok(RoundEnd::Errored);
                    }
                },
            }
        }
    }

    async fn finish(
        &mut self,
        reason: EndReason,
        status: TurnStatus,
    ) -> Result<TurnStatus, OrchestratorError> {
        self.persist_emit(StreamEvent::StreamEnd { reason }).await?;
        Ok(status)
    }

    /// The commit point: append to the sink, then (and only then) hand the
    /// record to the observer. The observer going away does not stop the
    /// turn; the sink remains authoritative.
    async fn persist_emit(&mut self, event: StreamEvent) -> Result<(), OrchestratorError> {
        let record = EventRecord::new(self.seq, event);
        self.sink.append(&self.turn, &record).await?;
        self.seq += 1;
        if self.events.send(Ok(record)).await.is_err() {
            tracing::debug!(turn_id = %self.turn.turn_id, "observer gone; turn continues");
        }
        Ok(())
    }
}
