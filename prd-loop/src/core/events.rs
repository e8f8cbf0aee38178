//! Decoding of the agent's line-delimited JSON event stream.
//!
//! Only a handful of event shapes matter to the loop. Everything else is
//! either ignored (valid JSON of an unknown shape) or passed through as raw
//! text (lines that are not JSON at all). Nothing is dropped silently.

use serde_json::Value;

/// Session id keys accepted on any event.
const SESSION_ID_KEYS: [&str; 2] = ["session_id", "sessionId"];

/// A decoded stream line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental assistant text.
    TextDelta(String),
    /// The agent started a tool invocation.
    ToolUse(String),
    /// A content block finished.
    BlockStop,
    /// Final result event. Completion is decided by process exit, so only the
    /// session id is of interest.
    Result { session_id: Option<String> },
    /// Valid JSON the loop does not interpret.
    Other,
    /// Not JSON; carried through verbatim.
    Raw(String),
}

impl StreamEvent {
    /// Text contributed to the accumulated output, if any.
    pub fn render(&self) -> Option<String> {
        match self {
            StreamEvent::TextDelta(text) if !text.is_empty() => Some(text.clone()),
            StreamEvent::ToolUse(name) => Some(format!("\n[Tool: {name}]\n")),
            StreamEvent::BlockStop => Some("\n".to_string()),
            StreamEvent::Raw(line) => Some(format!("{line}\n")),
            StreamEvent::TextDelta(_) | StreamEvent::Result { .. } | StreamEvent::Other => None,
        }
    }
}

/// A decoded line plus the parsed JSON, when the line was JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLine {
    pub event: StreamEvent,
    pub value: Option<Value>,
}

/// Decode one line of agent output. Returns `None` for blank lines.
pub fn decode_line(line: &str) -> Option<DecodedLine> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.trim().is_empty() {
        return None;
    }
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return Some(DecodedLine {
            event: StreamEvent::Raw(line.to_string()),
            value: None,
        });
    };
    let event = classify(&value);
    Some(DecodedLine {
        event,
        value: Some(value),
    })
}

fn classify(value: &Value) -> StreamEvent {
    match value.get("type").and_then(Value::as_str) {
        Some("stream_event") => classify_stream_event(value.get("event").unwrap_or(&Value::Null)),
        Some("result") => StreamEvent::Result {
            session_id: session_id_of(value).map(str::to_string),
        },
        _ => StreamEvent::Other,
    }
}

fn classify_stream_event(event: &Value) -> StreamEvent {
    match event.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => {
            let delta = event.get("delta").unwrap_or(&Value::Null);
            if delta.get("type").and_then(Value::as_str) != Some("text_delta") {
                return StreamEvent::Other;
            }
            let text = delta.get("text").and_then(Value::as_str).unwrap_or_default();
            StreamEvent::TextDelta(text.to_string())
        }
        Some("content_block_start") => {
            let block = event.get("content_block").unwrap_or(&Value::Null);
            if block.get("type").and_then(Value::as_str) != Some("tool_use") {
                return StreamEvent::Other;
            }
            let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
            StreamEvent::ToolUse(name.to_string())
        }
        Some("content_block_stop") => StreamEvent::BlockStop,
        _ => StreamEvent::Other,
    }
}

/// Session id carried directly on an event, under either accepted spelling.
pub fn session_id_of(value: &Value) -> Option<&str> {
    SESSION_ID_KEYS
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|id| !id.is_empty())
}

/// Scan events newest-first for a session id. Empty when none is present.
pub fn extract_session_id(events: &[Value]) -> String {
    events
        .iter()
        .rev()
        .find_map(session_id_of)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_of(line: &str) -> StreamEvent {
        decode_line(line).expect("non-blank line").event
    }

    #[test]
    fn decodes_text_delta() {
        let line = r#"{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"hello"}}}"#;
        let event = event_of(line);
        assert_eq!(event, StreamEvent::TextDelta("hello".to_string()));
        assert_eq!(event.render().as_deref(), Some("hello"));
    }

    #[test]
    fn input_json_delta_is_not_text() {
        let line = r#"{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{"}}}"#;
        assert_eq!(event_of(line), StreamEvent::Other);
    }

    #[test]
    fn tool_use_renders_bracketed_marker() {
        let line = r#"{"type":"stream_event","event":{"type":"content_block_start","content_block":{"type":"tool_use","name":"Edit"}}}"#;
        let event = event_of(line);
        assert_eq!(event.render().as_deref(), Some("\n[Tool: Edit]\n"));
    }

    #[test]
    fn block_stop_renders_newline() {
        let line = r#"{"type":"stream_event","event":{"type":"content_block_stop","index":0}}"#;
        assert_eq!(event_of(line).render().as_deref(), Some("\n"));
    }

    #[test]
    fn result_event_yields_only_session_id() {
        let line = r#"{"type":"result","subtype":"success","session_id":"abc-123","result":"done"}"#;
        let event = event_of(line);
        assert_eq!(
            event,
            StreamEvent::Result {
                session_id: Some("abc-123".to_string())
            }
        );
        assert_eq!(event.render(), None);
    }

    #[test]
    fn non_json_line_passes_through_verbatim() {
        let decoded = decode_line("  warning: not json {\r\n").expect("decoded");
        assert_eq!(decoded.value, None);
        assert_eq!(
            decoded.event.render().as_deref(),
            Some("  warning: not json {\n")
        );
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert_eq!(decode_line("\n"), None);
        assert_eq!(decode_line("   "), None);
    }

    #[test]
    fn unknown_json_is_ignored_but_kept() {
        let decoded = decode_line(r#"{"type":"system","subtype":"init"}"#).expect("decoded");
        assert_eq!(decoded.event, StreamEvent::Other);
        assert!(decoded.value.is_some());
        assert_eq!(decoded.event.render(), None);
    }

    #[test]
    fn session_id_prefers_most_recent_event() {
        let events = vec![
            json!({"type": "system", "session_id": "first"}),
            json!({"type": "assistant"}),
            json!({"type": "result", "sessionId": "latest"}),
            json!({"type": "stream_event"}),
        ];
        assert_eq!(extract_session_id(&events), "latest");
    }

    #[test]
    fn session_id_absent_is_empty() {
        let events = vec![json!({"type": "system"}), json!({"session_id": ""})];
        assert_eq!(extract_session_id(&events), "");
        assert_eq!(extract_session_id(&[]), "");
    }
}
