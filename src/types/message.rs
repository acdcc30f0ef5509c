//! Model-facing chat messages and history replay.
//!
//! The orchestrator never holds a full thread in memory; it rebuilds the
//! model-facing message list from persisted events just before each
//! completion request. Meta events never reach the model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::{EventRecord, StreamEvent};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// One message in the model-facing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// An assistant message that requests tool calls.
    pub fn assistant_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// A tool-result message answering `call_id`.
    pub fn tool(content: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Rebuild the model-facing history from persisted events.
///
/// `Code`, `CodeOutput` and `Image` are presentational; the canonical model
/// record for a tool round is the `ToolCall`/`ToolResult` pair. Dangling tool
/// calls (a failed call never produced a result) are closed with an empty
/// tool message so the history stays well-formed for the backend.
pub fn messages_from_events(events: &[EventRecord]) -> Vec<ChatMessage> {
    let mut out: Vec<ChatMessage> = Vec::new();
    let mut open_calls: Vec<String> = Vec::new();

    for record in events {
        match &record.event {
            StreamEvent::User { text } => {
                close_dangling(&mut out, &mut open_calls);
                out.push(ChatMessage::user(text.clone()));
            }
            StreamEvent::Assistant { text } => {
                close_dangling(&mut out, &mut open_calls);
                out.push(ChatMessage::assistant(text.clone()));
            }
            StreamEvent::ToolCall {
                call_id,
                tool_name,
                arguments,
            } => {
                close_dangling(&mut out, &mut open_calls);
                out.push(ChatMessage::assistant_tool_calls(vec![ToolCallRequest {
                    id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    arguments: arguments.clone(),
                }]));
                open_calls.push(call_id.clone());
            }
            StreamEvent::ToolResult { call_id, payload } => {
                open_calls.retain(|id| id != call_id);
                let content = match payload {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                out.push(ChatMessage::tool(content, call_id.clone()));
            }
            // Presentational or meta: never replayed to the model.
            StreamEvent::Code { .. }
            | StreamEvent::CodeOutput { .. }
            | StreamEvent::CodeError { .. }
            | StreamEvent::Image { .. }
            | StreamEvent::ServerHint { .. }
            | StreamEvent::StreamEnd { .. } => {}
        }
    }

    close_dangling(&mut out, &mut open_calls);
    out
}

fn close_dangling(out: &mut Vec<ChatMessage>, open_calls: &mut Vec<String>) {
    for call_id in open_calls.drain(..) {
        out.push(ChatMessage::tool("", call_id));
    }
}
