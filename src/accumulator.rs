//! Delta Accumulator
//!
//! Turns the backend's token-level delta stream into complete events:
//! coalesced assistant text and fully reassembled tool-call requests. One
//! accumulator instance serves exactly one completion round; a fresh round
//! gets a fresh instance.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ToolError;
use crate::types::{CompletionDelta, FinishKind, StreamEvent};

/// Accumulation buffer for one in-flight tool call.
///
/// Owned exclusively by the accumulator until marked complete, then handed to
/// dispatch by value.
#[derive(Debug, Clone)]
pub struct PendingToolCall {
    pub call_id: String,
    pub tool_name: String,
    fragments: Vec<String>,
    pub complete: bool,
}

impl PendingToolCall {
    fn new(call_id: String, tool_name: String) -> Self {
        Self {
            call_id,
            tool_name,
            fragments: Vec::new(),
            complete: false,
        }
    }

    /// Argument fragments concatenated in arrival order.
    pub fn raw_arguments(&self) -> String {
        self.fragments.concat()
    }
}

/// A tool call whose arguments parsed as a single JSON document.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// A tool call that finished assembly with malformed arguments. Never
/// dispatched; folded into the next round as tool-error content.
#[derive(Debug, Clone)]
pub struct FailedToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub raw_arguments: String,
}

impl FailedToolCall {
    pub fn to_error(&self) -> ToolError {
        ToolError::MalformedArguments {
            tool: self.tool_name.clone(),
            raw: self.raw_arguments.clone(),
        }
    }
}

/// What one completion round produced, reported once the stream is drained.
#[derive(Debug, Default)]
pub struct RoundSummary {
    pub completed: Vec<CompletedToolCall>,
    pub failed: Vec<FailedToolCall>,
    pub finish: Option<FinishKind>,
}

impl RoundSummary {
    /// True when the model asked for no (dispatchable or failed) tool work
    /// and the round therefore ends the turn.
    pub fn is_final(&self) -> bool {
        self.completed.is_empty() && self.failed.is_empty()
    }
}

/// Reassembles complete events from fragmented deltas.
#[derive(Debug)]
pub struct DeltaAccumulator {
    text_buffer: String,
    // Index-keyed so calls finalize and emit in the model's declared order.
    calls: BTreeMap<u32, PendingToolCall>,
    summary: RoundSummary,
    code_tool: Option<String>,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self {
            text_buffer: String::new(),
            calls: BTreeMap::new(),
            summary: RoundSummary::default(),
            code_tool: None,
        }
    }

    /// Treat calls to `name` as the code tool: completed assembly additionally
    /// surfaces a `Code` event with the extracted source.
    pub fn with_code_tool(mut self, name: impl Into<String>) -> Self {
        self.code_tool = Some(name.into());
        self
    }

    /// Absorb one delta, returning the complete events it produced (often
    /// none: text buffers until a boundary).
    pub fn absorb(&mut self, delta: CompletionDelta) -> Vec<StreamEvent> {
        match delta {
            CompletionDelta::Text { content } => {
                self.text_buffer.push_str(&content);
                Vec::new()
            }
            CompletionDelta::ToolCallStart {
                index,
                call_id,
                tool_name,
            } => {
                // The tool-call boundary flushes any buffered prose first so
                // the transcript keeps its natural order.
                let events = self.flush_text();
                if self.calls.contains_key(&index) {
                    tracing::warn!(index, call_id, "duplicate tool-call index; replacing");
                }
                self.calls
                    .insert(index, PendingToolCall::new(call_id, tool_name));
                events
            }
            CompletionDelta::ToolCallArguments { index, fragment } => {
                match self.calls.get_mut(&index) {
                    Some(call) if !call.complete => call.fragments.push(fragment),
                    Some(_) => {
                        tracing::warn!(index, "argument fragment after tool-call end; dropped")
                    }
                    None => tracing::warn!(index, "argument fragment for unknown call; dropped"),
                }
                Vec::new()
            }
            CompletionDelta::ToolCallEnd { index } => self.finalize_call(index),
            CompletionDelta::Finish { reason } => {
                let mut events = self.flush_text();
                // Backends that signal tool_calls via finish alone never send
                // explicit per-call ends; close whatever is still open.
                let open: Vec<u32> = self
                    .calls
                    .iter()
                    .filter(|(_, c)| !c.complete)
                    .map(|(i, _)| *i)
                    .collect();
                for index in open {
                    events.extend(self.finalize_call(index));
                }
                self.summary.finish = Some(reason);
                events
            }
        }
    }

    /// Flush buffered partial text after a backend error, so the client keeps
    /// what the model already said.
    pub fn flush_on_error(&mut self) -> Vec<StreamEvent> {
        self.flush_text()
    }

    /// Consume the accumulator and report what the round produced. A fresh
    /// stream requires a fresh accumulator.
    pub fn into_summary(self) -> RoundSummary {
        self.summary
    }

    fn flush_text(&mut self) -> Vec<StreamEvent> {
        if self.text_buffer.is_empty() {
            return Vec::new();
        }
        let text = std::mem::take(&mut self.text_buffer);
        vec![StreamEvent::Assistant { text }]
    }

    fn finalize_call(&mut self, index: u32) -> Vec<StreamEvent> {
        let Some(mut call) = self.calls.remove(&index) else {
            tracing::warn!(index, "tool-call end for unknown index; ignored");
            return Vec::new();
        };
        call.complete = true;
        let raw = call.raw_arguments();
        match serde_json::from_str::<Value>(if raw.is_empty() { "{}" } else { &raw }) {
            Ok(arguments) => {
                let mut events = Vec::new();
                if self.code_tool.as_deref() == Some(call.tool_name.as_str()) {
                    events.push(code_event(&arguments));
                }
                events.push(StreamEvent::ToolCall {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    arguments: arguments.clone(),
                });
                self.summary.completed.push(CompletedToolCall {
                    call_id: call.call_id,
                    tool_name: call.tool_name,
                    arguments,
                });
                events
            }
            Err(err) => {
                tracing::warn!(
                    tool = call.tool_name,
                    call_id = call.call_id,
                    %err,
                    "tool-call arguments are not valid JSON; call will not be dispatched"
                );
                let event = StreamEvent::CodeError {
                    message: format!(
                        "malformed arguments for tool '{}': {err}",
                        call.tool_name
                    ),
                    traceback: raw.clone(),
                };
                self.summary.failed.push(FailedToolCall {
                    call_id: call.call_id,
                    tool_name: call.tool_name,
                    raw_arguments: raw,
                });
                vec![event]
            }
        }
    }
}

impl Default for DeltaAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

fn code_event(arguments: &Value) -> StreamEvent {
    let source = arguments
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let language = arguments
        .get("language")
        .and_then(Value::as_str)
        .unwrap_or("python")
        .to_string();
    StreamEvent::Code { language, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(s: &str) -> CompletionDelta {
        CompletionDelta::Text { content: s.into() }
    }

    #[test]
    fn text_fragments_coalesce_into_one_assistant_event() {
        let mut acc = DeltaAccumulator::new();
        assert!(acc.absorb(text("Hel")).is_empty());
        assert!(acc.absorb(text("lo")).is_empty());
        let events = acc.absorb(CompletionDelta::Finish {
            reason: FinishKind::Stop,
        });
        assert_eq!(
            events,
            vec![StreamEvent::Assistant {
                text: "Hello".into()
            }]
        );
        let summary = acc.into_summary();
        assert!(summary.is_final());
        assert_eq!(summary.finish, Some(FinishKind::Stop));
    }

    #[test]
    fn tool_call_boundary_flushes_buffered_text_first() {
        let mut acc = DeltaAccumulator::new();
        acc.absorb(text("Let me check."));
        let events = acc.absorb(CompletionDelta::ToolCallStart {
            index: 0,
            call_id: "c1".into(),
            tool_name: "retrieve".into(),
        });
        assert_eq!(
            events,
            vec![StreamEvent::Assistant {
                text: "Let me check.".into()
            }]
        );
    }

    #[test]
    fn argument_fragments_concatenate_in_arrival_order() {
        let mut acc = DeltaAccumulator::new();
        acc.absorb(CompletionDelta::ToolCallStart {
            index: 0,
            call_id: "c1".into(),
            tool_name: "retrieve".into(),
        });
        acc.absorb(CompletionDelta::ToolCallArguments {
            index: 0,
            fragment: r#"{"ques"#.into(),
        });
        acc.absorb(CompletionDelta::ToolCallArguments {
            index: 0,
            fragment: r#"tion":"era5"}"#.into(),
        });
        let events = acc.absorb(CompletionDelta::ToolCallEnd { index: 0 });
        assert_eq!(
            events,
            vec![StreamEvent::ToolCall {
                call_id: "c1".into(),
                tool_name: "retrieve".into(),
                arguments: json!({"question": "era5"}),
            }]
        );
        let summary = acc.into_summary();
        assert_eq!(summary.completed.len(), 1);
        assert_eq!(summary.completed[0].arguments, json!({"question": "era5"}));
    }

    #[test]
    fn malformed_arguments_fail_the_call_without_dispatch() {
        let mut acc = DeltaAccumulator::new();
        acc.absorb(CompletionDelta::ToolCallStart {
            index: 0,
            call_id: "c1".into(),
            tool_name: "retrieve".into(),
        });
        acc.absorb(CompletionDelta::ToolCallArguments {
            index: 0,
            fragment: r#"{"question": "#.into(),
        });
        let events = acc.absorb(CompletionDelta::ToolCallEnd { index: 0 });
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::CodeError { message, traceback } => {
                assert!(message.contains("retrieve"));
                assert_eq!(traceback, r#"{"question": "#);
            }
            other => panic!("expected CodeError, got {other:?}"),
        }
        let summary = acc.into_summary();
        assert!(summary.completed.is_empty());
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].call_id, "c1");
    }

    #[test]
    fn finish_closes_calls_without_explicit_end() {
        let mut acc = DeltaAccumulator::new();
        acc.absorb(CompletionDelta::ToolCallStart {
            index: 0,
            call_id: "c1".into(),
            tool_name: "retrieve".into(),
        });
        acc.absorb(CompletionDelta::ToolCallArguments {
            index: 0,
            fragment: "{}".into(),
        });
        let events = acc.absorb(CompletionDelta::Finish {
            reason: FinishKind::ToolCalls,
        });
        assert!(matches!(events[0], StreamEvent::ToolCall { .. }));
        assert_eq!(acc.into_summary().completed.len(), 1);
    }

    #[test]
    fn code_tool_surfaces_a_code_event() {
        let mut acc = DeltaAccumulator::new().with_code_tool("code_interpreter");
        acc.absorb(CompletionDelta::ToolCallStart {
            index: 0,
            call_id: "c1".into(),
            tool_name: "code_interpreter".into(),
        });
        acc.absorb(CompletionDelta::ToolCallArguments {
            index: 0,
            fragment: r#"{"code":"print(42)"}"#.into(),
        });
        let events = acc.absorb(CompletionDelta::ToolCallEnd { index: 0 });
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            StreamEvent::Code {
                language: "python".into(),
                source: "print(42)".into()
            }
        );
        assert!(matches!(events[1], StreamEvent::ToolCall { .. }));
    }

    #[test]
    fn multiple_calls_finalize_in_index_order() {
        let mut acc = DeltaAccumulator::new();
        for (index, id) in [(1u32, "b"), (0u32, "a")] {
            acc.absorb(CompletionDelta::ToolCallStart {
                index,
                call_id: id.into(),
                tool_name: "retrieve".into(),
            });
            acc.absorb(CompletionDelta::ToolCallArguments {
                index,
                fragment: "{}".into(),
            });
        }
        acc.absorb(CompletionDelta::Finish {
            reason: FinishKind::ToolCalls,
        });
        let summary = acc.into_summary();
        let ids: Vec<_> = summary.completed.iter().map(|c| c.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn error_flush_keeps_partial_text() {
        let mut acc = DeltaAccumulator::new();
        acc.absorb(text("partial answ"));
        let events = acc.flush_on_error();
        assert_eq!(
            events,
            vec![StreamEvent::Assistant {
                text: "partial answ".into()
            }]
        );
    }

    #[test]
    fn empty_arguments_default_to_empty_object() {
        let mut acc = DeltaAccumulator::new();
        acc.absorb(CompletionDelta::ToolCallStart {
            index: 0,
            call_id: "c1".into(),
            tool_name: "heartbeat".into(),
        });
        acc.absorb(CompletionDelta::ToolCallEnd { index: 0 });
        let summary = acc.into_summary();
        assert_eq!(summary.completed[0].arguments, json!({}));
    }
}
