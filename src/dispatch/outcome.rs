//! Mapping of finished tool calls onto stream events and re-arm messages.

use serde_json::Value;

use crate::error::ToolError;
use crate::types::{ChatMessage, StreamEvent};

/// One tool call after dispatch has finished with it, success or failure.
#[derive(Debug)]
pub struct ToolOutcome {
    pub call_id: String,
    pub tool_name: String,
    pub result: Result<Value, ToolError>,
}

impl ToolOutcome {
    /// Events to persist and emit for this outcome. Presentational events for
    /// the code tool come first; a successful call closes with its
    /// `ToolResult`. A failed call yields an error event instead of a result;
    /// its call id is answered only in the model-facing history, via
    /// [`ToolOutcome::rearm_message`].
    pub fn events(&self, code_tool: Option<&str>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        match &self.result {
            Ok(payload) => {
                if code_tool == Some(self.tool_name.as_str()) {
                    events.extend(code_result_events(payload));
                }
                events.push(StreamEvent::ToolResult {
                    call_id: self.call_id.clone(),
                    payload: payload.clone(),
                });
            }
            Err(err) => {
                events.push(StreamEvent::CodeError {
                    message: err.to_string(),
                    traceback: String::new(),
                });
            }
        }
        events
    }

    /// The `tool` role message answering this call on the next completion
    /// round. The model expects an answer for every call it made, so errors
    /// fold back as tool content rather than disappearing.
    pub fn rearm_message(&self) -> ChatMessage {
        let content = match &self.result {
            Ok(Value::String(s)) => s.clone(),
            Ok(other) => other.to_string(),
            Err(err) => serde_json::json!({ "error": err.to_string() }).to_string(),
        };
        ChatMessage::tool(content, &self.call_id)
    }
}

/// Break a code-interpreter payload into presentational events.
///
/// The payload is the interpreter's structured result, either directly or
/// wrapped under `"structuredContent"`. Printed output and the repr of the
/// last expression become `CodeOutput`, stderr and exceptions `CodeError`,
/// and `display_data` PNG entries `Image` events with inline base64.
fn code_result_events(payload: &Value) -> Vec<StreamEvent> {
    let structured = match payload.get("structuredContent") {
        Some(inner) => inner,
        None => payload,
    };
    let Some(obj) = structured.as_object() else {
        return Vec::new();
    };

    let mut events = Vec::new();

    let mut out = String::new();
    for key in ["stdout", "result_repr"] {
        if let Some(text) = obj.get(key).and_then(Value::as_str) {
            if !text.is_empty() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
    }
    if !out.is_empty() {
        events.push(StreamEvent::CodeOutput {
            stream_name: "stdout".to_string(),
            text: out,
        });
    }

    let stderr = obj.get("stderr").and_then(Value::as_str).unwrap_or("");
    let error = obj.get("error").and_then(Value::as_str).unwrap_or("");
    if !stderr.is_empty() || !error.is_empty() {
        events.push(StreamEvent::CodeError {
            message: if error.is_empty() {
                stderr.to_string()
            } else {
                error.to_string()
            },
            traceback: stderr.to_string(),
        });
    }

    for entry in obj
        .get("display_data")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(b64) = entry.get("image/png").and_then(Value::as_str) {
            events.push(StreamEvent::Image {
                mime_type: "image/png".to_string(),
                payload_ref: b64.to_string(),
            });
        }
    }

    events
}
