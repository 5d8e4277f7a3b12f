//! Wire-frame parsing and event normalization.
//!
//! Frames arrive either as SSE lines (`data: {...}`) or as bare JSON lines,
//! in one of two shapes:
//!
//! - flat: `{event, data: {content?, error?, ...}, timestamp}`
//! - enveloped: `{event_type, agent_source?, timestamp, payload: {content_type?, data, metadata?}}`
//!
//! Both are folded into one canonical [`StreamEvent`] here so nothing
//! downstream has to probe for field presence.

use serde_json::{Map, Value};

use sl_base::constants::{SSE_DATA_PREFIX, SSE_DONE_SENTINEL};
use sl_base::state::EventRecord;

/// Event-type tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    LlmChunk,
    System,
    Billing,
    Error,
    ToolCall,
    ToolReturn,
    ToolProcessing,
    ToolComplete,
    Done,
    Complete,
    Progress,
    Metadata,
    Unknown(String),
}

impl EventKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "message" => EventKind::Message,
            "llm_chunk" => EventKind::LlmChunk,
            "system" => EventKind::System,
            "billing" => EventKind::Billing,
            "error" => EventKind::Error,
            "tool_call" => EventKind::ToolCall,
            "tool_return" => EventKind::ToolReturn,
            "tool_processing" => EventKind::ToolProcessing,
            "tool_complete" => EventKind::ToolComplete,
            "done" => EventKind::Done,
            "complete" => EventKind::Complete,
            "progress" => EventKind::Progress,
            "metadata" => EventKind::Metadata,
            _ => EventKind::Unknown(tag.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Message => "message",
            EventKind::LlmChunk => "llm_chunk",
            EventKind::System => "system",
            EventKind::Billing => "billing",
            EventKind::Error => "error",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolReturn => "tool_return",
            EventKind::ToolProcessing => "tool_processing",
            EventKind::ToolComplete => "tool_complete",
            EventKind::Done => "done",
            EventKind::Complete => "complete",
            EventKind::Progress => "progress",
            EventKind::Metadata => "metadata",
            EventKind::Unknown(tag) => tag,
        }
    }

    /// Carries an incremental piece of assistant text.
    pub fn is_content_delta(&self) -> bool {
        matches!(self, EventKind::Message | EventKind::LlmChunk)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Done | EventKind::Complete)
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, EventKind::ToolCall | EventKind::ToolReturn | EventKind::ToolProcessing | EventKind::ToolComplete)
    }
}

/// Canonical in-memory event, whatever shape it arrived in.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub timestamp: Option<String>,
    pub content_type: Option<String>,
    pub agent_source: Option<String>,
    pub data: Value,
    pub metadata: Option<Value>,
}

impl StreamEvent {
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self { kind, timestamp: None, content_type: None, agent_source: None, data, metadata: None }
    }

    /// Text payload: a bare string, or the first of `content`/`text`/`delta`/`message`.
    pub fn text(&self) -> Option<&str> {
        text_of(&self.data)
    }

    /// Error message of an `error` event, with a generic fallback.
    pub fn error_message(&self) -> String {
        let from_obj = |v: &Value| {
            ["error", "message", "detail", "content"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_string))
        };
        match &self.data {
            Value::String(s) if !s.trim().is_empty() => s.clone(),
            Value::Object(_) => from_obj(&self.data)
                .or_else(|| self.data.get("error").and_then(from_obj))
                .unwrap_or_else(|| "Unknown stream error".to_string()),
            _ => "Unknown stream error".to_string(),
        }
    }

    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            kind: self.kind.as_str().to_string(),
            timestamp: self.timestamp.clone(),
            content_type: self.content_type.clone(),
            agent_source: self.agent_source.clone(),
            data: self.data.clone(),
        }
    }
}

pub(crate) fn text_of(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => ["content", "text", "delta", "message"].iter().find_map(|k| map.get(*k)?.as_str()),
        _ => None,
    }
}

/// What one wire line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(StreamEvent),
    /// Blank line, SSE comment, `event:`/`id:`/`retry:` field
    Skip,
    /// Payload that is not a usable JSON event
    Malformed(String),
}

/// Parse one line of the stream.
pub fn parse_line(line: &str) -> Frame {
    let line = line.trim_end_matches(['\r', '\n']);
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return Frame::Skip;
    }
    let payload = match trimmed.strip_prefix(SSE_DATA_PREFIX) {
        Some(rest) => rest.trim(),
        None if trimmed.starts_with('{') => trimmed,
        None if is_sse_field(trimmed) => return Frame::Skip,
        None => return Frame::Malformed(trimmed.to_string()),
    };
    if payload.is_empty() {
        return Frame::Skip;
    }
    if payload == SSE_DONE_SENTINEL {
        return Frame::Event(StreamEvent::new(EventKind::Done, Value::Null));
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(value) => match normalize(value) {
            Some(event) => Frame::Event(event),
            None => Frame::Malformed(payload.to_string()),
        },
        Err(_) => Frame::Malformed(payload.to_string()),
    }
}

fn is_sse_field(line: &str) -> bool {
    ["event:", "id:", "retry:"].iter().any(|p| line.starts_with(p))
}

fn str_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Fold a decoded JSON frame into the canonical event shape.
///
/// Returns `None` when the value has no event tag at all.
pub fn normalize(value: Value) -> Option<StreamEvent> {
    let Value::Object(mut map) = value else { return None };

    let tag = str_field(&map, "event_type").or_else(|| str_field(&map, "event")).or_else(|| str_field(&map, "type"))?;
    let kind = EventKind::from_tag(&tag);
    let timestamp = str_field(&map, "timestamp");
    let mut agent_source = str_field(&map, "agent_source");
    let mut content_type = str_field(&map, "content_type");

    let (data, metadata) = match map.remove("payload") {
        Some(Value::Object(mut payload)) => {
            content_type = content_type.or_else(|| str_field(&payload, "content_type"));
            agent_source = agent_source.or_else(|| str_field(&payload, "agent_source"));
            let metadata = payload.remove("metadata").filter(|m| !m.is_null());
            let data = payload.remove("data").unwrap_or(Value::Object(payload));
            (data, metadata)
        }
        Some(other) => (other, None),
        None => {
            let metadata = map.remove("metadata").filter(|m| !m.is_null());
            (map.remove("data").unwrap_or(Value::Null), metadata)
        }
    };

    if let Some(meta) = metadata.as_ref().and_then(Value::as_object) {
        content_type = content_type.or_else(|| str_field(meta, "content_type"));
        agent_source = agent_source.or_else(|| str_field(meta, "agent_source"));
    }
    if let Some(inner) = data.as_object() {
        content_type = content_type.or_else(|| str_field(inner, "content_type"));
        agent_source = agent_source.or_else(|| str_field(inner, "agent_source"));
    }

    Some(StreamEvent { kind, timestamp, content_type, agent_source, data, metadata })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(line: &str) -> StreamEvent {
        match parse_line(line) {
            Frame::Event(e) => e,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn flat_chunk_over_sse() {
        let e = event(r#"data: {"event":"llm_chunk","data":{"content":"Hel"},"timestamp":"t1"}"#);
        assert_eq!(e.kind, EventKind::LlmChunk);
        assert_eq!(e.text(), Some("Hel"));
        assert_eq!(e.timestamp.as_deref(), Some("t1"));
    }

    #[test]
    fn enveloped_event_lifts_payload_fields() {
        let e = event(
            r#"{"event_type":"message","agent_source":"writer","timestamp":"t2","payload":{"content_type":"story_outline","data":"Act I","metadata":{"step":1}}}"#,
        );
        assert_eq!(e.kind, EventKind::Message);
        assert_eq!(e.content_type.as_deref(), Some("story_outline"));
        assert_eq!(e.agent_source.as_deref(), Some("writer"));
        assert_eq!(e.text(), Some("Act I"));
        assert_eq!(e.metadata, Some(json!({"step": 1})));
    }

    #[test]
    fn content_type_nested_in_metadata_is_found() {
        let e = event(r#"{"event_type":"message","payload":{"data":"x","metadata":{"content_type":"mind_map","agent_source":"mapper"}}}"#);
        assert_eq!(e.content_type.as_deref(), Some("mind_map"));
        assert_eq!(e.agent_source.as_deref(), Some("mapper"));
    }

    #[test]
    fn top_level_content_type_wins_over_nested() {
        let e = event(r#"{"event_type":"message","content_type":"summary","payload":{"content_type":"analysis","data":"x"}}"#);
        assert_eq!(e.content_type.as_deref(), Some("summary"));
    }

    #[test]
    fn done_sentinel_is_terminal() {
        assert!(event("data: [DONE]").kind.is_terminal());
    }

    #[test]
    fn sse_noise_is_skipped() {
        assert_eq!(parse_line(""), Frame::Skip);
        assert_eq!(parse_line(": keep-alive"), Frame::Skip);
        assert_eq!(parse_line("event: message"), Frame::Skip);
        assert_eq!(parse_line("data:"), Frame::Skip);
    }

    #[test]
    fn garbage_is_malformed_not_fatal() {
        assert!(matches!(parse_line("data: {not json"), Frame::Malformed(_)));
        assert!(matches!(parse_line("data: {\"no_tag\":1}"), Frame::Malformed(_)));
        assert!(matches!(parse_line("hello"), Frame::Malformed(_)));
    }

    #[test]
    fn unknown_tag_is_kept() {
        let e = event(r#"{"event":"heartbeat","data":{}}"#);
        assert_eq!(e.kind, EventKind::Unknown("heartbeat".into()));
    }

    #[test]
    fn error_message_from_flat_and_nested_shapes() {
        assert_eq!(event(r#"{"event":"error","data":{"error":"boom"}}"#).error_message(), "boom");
        assert_eq!(event(r#"{"event_type":"error","payload":{"data":"bad key"}}"#).error_message(), "bad key");
        assert_eq!(
            event(r#"{"event":"error","data":{"error":{"message":"nested"}}}"#).error_message(),
            "nested"
        );
        assert_eq!(event(r#"{"event":"error","data":{}}"#).error_message(), "Unknown stream error");
    }

    #[test]
    fn kind_tags_are_case_and_separator_tolerant() {
        assert_eq!(EventKind::from_tag("Tool-Call"), EventKind::ToolCall);
        assert_eq!(EventKind::from_tag("DONE"), EventKind::Done);
    }

    #[test]
    fn record_keeps_kind_and_data() {
        let e = event(r#"{"event":"tool_call","data":{"name":"search"}}"#);
        let rec = e.to_record();
        assert_eq!(rec.kind, "tool_call");
        assert_eq!(rec.data, json!({"name": "search"}));
    }
}
