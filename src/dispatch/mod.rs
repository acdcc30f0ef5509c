//! Concurrent tool dispatch.
//!
//! All calls of one round run concurrently; each call is isolated, so one
//! failure never poisons its siblings. Results are returned ordered by call
//! id regardless of completion order.

mod outcome;
mod session;

pub use outcome::ToolOutcome;
pub use session::ToolSessionRegistry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::accumulator::CompletedToolCall;
use crate::error::ToolError;
use crate::traits::{ToolProvider, ToolSchema};
use crate::types::ThreadId;
use crate::utils::CancelHandle;

/// Fans a round's tool calls out to providers and collects their outcomes.
pub struct ToolDispatcher {
    providers: HashMap<String, Arc<dyn ToolProvider>>,
    sessions: Arc<ToolSessionRegistry>,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(providers: Vec<Arc<dyn ToolProvider>>, timeout: Duration) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();
        Self {
            providers,
            sessions: Arc::new(ToolSessionRegistry::new()),
            timeout,
        }
    }

    /// Schemas of every registered provider, exported to the backend.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<_> = self.providers.values().map(|p| p.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Run every call concurrently and return the outcomes sorted by call id.
    ///
    /// On cancellation the remaining tasks are abandoned, providers are asked
    /// (best-effort) to stop their in-flight work, and only the outcomes that
    /// had already completed are returned.
    pub async fn dispatch(
        &self,
        thread_id: &ThreadId,
        calls: Vec<CompletedToolCall>,
        cancel: &CancelHandle,
    ) -> Vec<ToolOutcome> {
        let mut outcomes = Vec::with_capacity(calls.len());
        let mut set = JoinSet::new();
        let mut in_flight: Vec<(String, String)> = Vec::new();

        for call in calls {
            match self.providers.get(&call.tool_name) {
                Some(provider) => {
                    in_flight.push((call.call_id.clone(), call.tool_name.clone()));
                    set.spawn(run_call(
                        provider.clone(),
                        self.sessions.clone(),
                        thread_id.clone(),
                        call,
                        self.timeout,
                    ));
                }
                None => {
                    tracing::warn!(tool = %call.tool_name, call_id = %call.call_id, "unknown tool");
                    outcomes.push(ToolOutcome {
                        call_id: call.call_id,
                        tool_name: call.tool_name.clone(),
                        result: Err(ToolError::UnknownTool {
                            name: call.tool_name,
                        }),
                    });
                }
            }
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    set.abort_all();
                    self.cancel_in_flight(thread_id, &in_flight, &outcomes).await;
                    break;
                }
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok(outcome)) => outcomes.push(outcome),
                    // Panicked or aborted task; the call id is already
                    // unrecoverable, so nothing to report for it.
                    Some(Err(err)) if err.is_cancelled() => {}
                    Some(Err(err)) => {
                        tracing::error!(error = %err, "tool task panicked");
                    }
                },
            }
        }

        outcomes.sort_by(|a, b| a.call_id.cmp(&b.call_id));
        outcomes
    }

    async fn cancel_in_flight(
        &self,
        thread_id: &ThreadId,
        in_flight: &[(String, String)],
        done: &[ToolOutcome],
    ) {
        for (call_id, tool_name) in in_flight {
            if done.iter().any(|o| &o.call_id == call_id) {
                continue;
            }
            let Some(provider) = self.providers.get(tool_name).cloned() else {
                continue;
            };
            let Some(session) = self.sessions.peek(thread_id, tool_name).await else {
                continue;
            };
            let call_id = call_id.clone();
            tokio::spawn(async move {
                if let Err(err) = provider.cancel(&session, &call_id).await {
                    tracing::debug!(call_id = %call_id, error = %err, "tool cancel failed");
                }
            });
        }
    }
}

async fn run_call(
    provider: Arc<dyn ToolProvider>,
    sessions: Arc<ToolSessionRegistry>,
    thread_id: ThreadId,
    call: CompletedToolCall,
    timeout: Duration,
) -> ToolOutcome {
    tracing::debug!(tool = %call.tool_name, call_id = %call.call_id, "dispatching tool call");
    let result = invoke_once(&*provider, &sessions, &thread_id, &call, timeout).await;
    let result = match result {
        // An expired session gets exactly one re-create-and-retry.
        Err(ToolError::SessionExpired { .. }) => {
            tracing::debug!(tool = %call.tool_name, "session expired, retrying once");
            sessions.invalidate(&thread_id, provider.name()).await;
            invoke_once(&*provider, &sessions, &thread_id, &call, timeout).await
        }
        other => other,
    };
    if let Err(err) = &result {
        tracing::warn!(tool = %call.tool_name, call_id = %call.call_id, error = %err, "tool call failed");
    }
    ToolOutcome {
        call_id: call.call_id,
        tool_name: call.tool_name,
        result,
    }
}

async fn invoke_once(
    provider: &dyn ToolProvider,
    sessions: &ToolSessionRegistry,
    thread_id: &ThreadId,
    call: &CompletedToolCall,
    timeout: Duration,
) -> Result<serde_json::Value, ToolError> {
    let session = sessions.resolve(provider, thread_id).await?;
    match tokio::time::timeout(timeout, provider.invoke(&session, call.arguments.clone())).await {
        Ok(result) => result,
        Err(_) => Err(ToolError::Timeout {
            tool: provider.name().to_string(),
            elapsed_ms: timeout.as_millis() as u64,
        }),
    }
}
