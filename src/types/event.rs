//! Stream event types.
//!
//! `StreamEvent` is the closed set of event kinds exchanged across every
//! boundary: accumulator output, dispatch output, sink records, and the
//! transport-facing turn stream. Events serialize to a stable wire shape
//! tagged by `"variant"`; deserializers tolerate unknown extra fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single typed event within a conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant")]
pub enum StreamEvent {
    /// Text produced by the model for the user.
    Assistant { text: String },
    /// The user's input, recorded so history replay is self-contained.
    User { text: String },
    /// Source code the model asked the code tool to run.
    Code { language: String, source: String },
    /// Output captured from a code execution (`stream_name` is `stdout`,
    /// `result` or similar).
    CodeOutput { stream_name: String, text: String },
    /// A failed code execution or malformed tool-call assembly.
    CodeError { message: String, traceback: String },
    /// Rich output referenced by payload (e.g. a base64 PNG).
    Image {
        mime_type: String,
        payload_ref: String,
    },
    /// A completed tool invocation request reconstructed from deltas.
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    /// The provider's result for a tool call.
    ToolResult {
        call_id: String,
        payload: serde_json::Value,
    },
    /// Orchestrator-to-client metadata. Never replayed into the model-facing
    /// history.
    ServerHint {
        key: String,
        value: serde_json::Value,
    },
    /// Terminal event of a turn; always last and unique per turn.
    StreamEnd { reason: EndReason },
}

/// Why a turn's stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Completed,
    Stopped,
    Error,
}

impl StreamEvent {
    /// Events excluded from the model-facing history on replay.
    ///
    /// Hints and terminal/error markers are client-facing metadata; feeding
    /// them back to the model would pollute the prompt.
    pub fn is_meta(&self) -> bool {
        matches!(
            self,
            Self::ServerHint { .. } | Self::StreamEnd { .. } | Self::CodeError { .. }
        )
    }

    /// Short variant name, useful for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Assistant { .. } => "Assistant",
            Self::User { .. } => "User",
            Self::Code { .. } => "Code",
            Self::CodeOutput { .. } => "CodeOutput",
            Self::CodeError { .. } => "CodeError",
            Self::Image { .. } => "Image",
            Self::ToolCall { .. } => "ToolCall",
            Self::ToolResult { .. } => "ToolResult",
            Self::ServerHint { .. } => "ServerHint",
            Self::StreamEnd { .. } => "StreamEnd",
        }
    }

    pub fn stream_end(reason: EndReason) -> Self {
        Self::StreamEnd { reason }
    }

    pub fn server_hint(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self::ServerHint {
            key: key.into(),
            value,
        }
    }
}

/// A committed event: the `StreamEvent` plus its per-turn sequence number.
///
/// Wire shape: `{ "variant": <kind>, "seq": <int>, ...kind fields }`.
/// Sequence numbers are assigned by the turn runner at persist time and are
/// strictly increasing and gap-free within a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    /// Commit time, set when the record is appended to the sink.
    /// Not part of the spec wire shape; defaults to the epoch when absent.
    #[serde(default)]
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: StreamEvent,
}

impl EventRecord {
    pub fn new(seq: u64, event: StreamEvent) -> Self {
        Self {
            seq,
            at: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn all_kinds() -> Vec<StreamEvent> {
        vec![
            StreamEvent::Assistant {
                text: "Hello".into(),
            },
            StreamEvent::User {
                text: "plot the data".into(),
            },
            StreamEvent::Code {
                language: "python".into(),
                source: "print(1)".into(),
            },
            StreamEvent::CodeOutput {
                stream_name: "stdout".into(),
                text: "1\n".into(),
            },
            StreamEvent::CodeError {
                message: "NameError".into(),
                traceback: "Traceback ...".into(),
            },
            StreamEvent::Image {
                mime_type: "image/png".into(),
                payload_ref: "iVBORw0KGgo".into(),
            },
            StreamEvent::ToolCall {
                call_id: "call_1".into(),
                tool_name: "retrieve".into(),
                arguments: json!({"question": "what is ERA5?"}),
            },
            StreamEvent::ToolResult {
                call_id: "call_1".into(),
                payload: json!({"chunks": []}),
            },
            StreamEvent::server_hint("thread_id", json!("abc123")),
            StreamEvent::stream_end(EndReason::Completed),
        ]
    }

    #[test]
    fn round_trip_all_variants() {
        for (i, event) in all_kinds().into_iter().enumerate() {
            let record = EventRecord::new(i as u64, event);
            let wire = serde_json::to_string(&record).unwrap();
            let back: EventRecord = serde_json::from_str(&wire).unwrap();
            assert_eq!(record, back, "round-trip mismatch for {wire}");
        }
    }

    #[test]
    fn wire_shape_has_variant_and_seq() {
        let record = EventRecord::new(
            3,
            StreamEvent::Assistant {
                text: "hi".into(),
            },
        );
        let value: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["variant"], "Assistant");
        assert_eq!(value["seq"], 3);
        assert_eq!(value["text"], "hi");
    }

    #[test]
    fn deserializer_tolerates_unknown_fields() {
        let wire = r#"{"variant":"Assistant","seq":0,"text":"hi","shiny_new_field":true}"#;
        let record: EventRecord = serde_json::from_str(wire).unwrap();
        assert_eq!(
            record.event,
            StreamEvent::Assistant { text: "hi".into() }
        );
    }

    #[test]
    fn end_reason_is_lowercase_on_the_wire() {
        let wire =
            serde_json::to_string(&StreamEvent::stream_end(EndReason::Stopped)).unwrap();
        assert!(wire.contains(r#""reason":"stopped""#), "{wire}");
    }

    #[test]
    fn meta_classification() {
        assert!(StreamEvent::server_hint("k", json!(1)).is_meta());
        assert!(StreamEvent::stream_end(EndReason::Error).is_meta());
        assert!(!StreamEvent::Assistant { text: "x".into() }.is_meta());
        assert!(!StreamEvent::ToolResult {
            call_id: "c".into(),
            payload: json!(null)
        }
        .is_meta());
    }
}
