//! Folding stream output into a message record.
//!
//! Everything here mutates one `Message` and nothing else, so the rules can be
//! tested without a stream.

use serde_json::Value;

use sl_base::content::{ContentType, MindMapNode};
use sl_base::state::{BillingInfo, Message, MessageStatus, ProgressInfo};

use crate::classify::{classify, mind_map, to_block};
use crate::stream::{EventKind, StreamError, StreamEvent};

/// Append a content delta.
pub fn fold_chunk(msg: &mut Message, text: &str, content_type: Option<&str>) {
    msg.content.push_str(text);
    if let Some(tag) = content_type {
        msg.metadata.content_type = Some(classify(tag));
    }
}

/// Apply a non-delta event. Lists append, scalars are replaced.
pub fn fold_event(msg: &mut Message, event: &StreamEvent) {
    let meta = &mut msg.metadata;
    match &event.kind {
        EventKind::System => meta.system_events.push(event.to_record()),
        kind if kind.is_tool() => meta.tool_events.push(event.to_record()),
        EventKind::Billing => meta.billing = Some(billing_from(&event.data)),
        EventKind::Error => meta.error = Some(event.error_message()),
        EventKind::Progress => meta.progress = Some(progress_from(&event.data)),
        EventKind::Metadata => {
            if let Some(model) = event.data.get("model").and_then(Value::as_str) {
                meta.model = Some(model.to_string());
            }
            if let Some(tag) = &event.content_type {
                meta.content_type = Some(classify(tag));
            }
        }
        EventKind::Unknown(tag) => tracing::debug!(tag = %tag, id = %msg.id, "ignoring unknown event"),
        _ => {}
    }
    if event.content_type.is_some()
        && let Some(block) = to_block(event)
    {
        msg.metadata.enhanced_events.push(block);
    }
}

/// Automatic retry: the next attempt streams from scratch.
pub fn fold_retry(msg: &mut Message, attempt: u32) {
    msg.content.clear();
    msg.metadata.auto_retries = attempt.saturating_sub(1);
}

/// Terminal success. Returns the recovered mind map, if any; the content is
/// then rewritten to the tree's normalized form.
pub fn fold_done(msg: &mut Message, full_content: String, retry_count: u32, manual_limit: u32) -> Option<MindMapNode> {
    msg.content = full_content;
    msg.metadata.auto_retries = retry_count;
    msg.metadata.can_retry = msg.metadata.retry_count < manual_limit;
    msg.set_status(MessageStatus::Complete);

    let tree = if msg.metadata.content_type == Some(ContentType::MindMap) {
        mind_map::extract(&msg.content, None)
    } else {
        mind_map::extract_structured(&msg.content, None)
    }?;
    msg.content = mind_map::render(&tree);
    msg.metadata.content_type = Some(ContentType::MindMap);
    msg.metadata.mind_map = Some(tree.clone());
    Some(tree)
}

/// Terminal failure: partial content stays, followed by a diagnostic.
pub fn fold_failure(msg: &mut Message, error: &StreamError, retry_count: u32, manual_limit: u32) {
    let can_retry = msg.metadata.retry_count < manual_limit;
    msg.metadata.error = Some(error.to_string());
    msg.metadata.auto_retries = retry_count;
    msg.metadata.can_retry = can_retry;
    msg.content = diagnostic(&msg.content, &error.to_string(), retry_count + 1, can_retry);
    msg.set_status(MessageStatus::Error);
}

pub fn diagnostic(partial: &str, error: &str, attempts: u32, can_retry: bool) -> String {
    let retry = if can_retry { "manual retry available" } else { "retry limit reached" };
    let body = format!("**Error:** {}\n\n_Attempts: {} · {}_", error, attempts, retry);
    if partial.trim().is_empty() { body } else { format!("{}\n\n---\n{}", partial, body) }
}

fn first_u64(data: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| data.get(*k).and_then(Value::as_u64))
}

fn first_f64(data: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| data.get(*k).and_then(Value::as_f64))
}

fn billing_from(data: &Value) -> BillingInfo {
    BillingInfo {
        input_tokens: first_u64(data, &["input_tokens", "prompt_tokens"]),
        output_tokens: first_u64(data, &["output_tokens", "completion_tokens"]),
        cost: first_f64(data, &["cost", "total_cost"]),
        credits_remaining: first_f64(data, &["credits_remaining", "balance"]),
        raw: data.clone(),
    }
}

fn progress_from(data: &Value) -> ProgressInfo {
    let text = |keys: &[&str]| keys.iter().find_map(|k| data.get(*k).and_then(Value::as_str).map(str::to_string));
    ProgressInfo {
        stage: text(&["stage", "step", "status"]),
        percent: first_f64(data, &["percent", "progress"]),
        message: text(&["message", "content"]).or_else(|| data.as_str().map(str::to_string)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sl_base::state::message::test_helpers::MessageBuilder;

    fn streaming() -> Message {
        MessageBuilder::assistant("A1", "").status(MessageStatus::Streaming).build()
    }

    fn ev(kind: EventKind, data: Value) -> StreamEvent {
        StreamEvent::new(kind, data)
    }

    #[test]
    fn chunks_concatenate_in_order() {
        let mut msg = streaming();
        for part in ["Hel", "lo, ", "world"] {
            fold_chunk(&mut msg, part, None);
        }
        assert_eq!(msg.content, "Hello, world");
    }

    #[test]
    fn lists_append_and_scalars_replace() {
        let mut msg = streaming();
        fold_event(&mut msg, &ev(EventKind::System, json!({"content": "one"})));
        fold_event(&mut msg, &ev(EventKind::System, json!({"content": "two"})));
        fold_event(&mut msg, &ev(EventKind::ToolCall, json!({"name": "search"})));
        fold_event(&mut msg, &ev(EventKind::ToolReturn, json!({"result": "ok"})));
        fold_event(&mut msg, &ev(EventKind::Billing, json!({"prompt_tokens": 10, "cost": 0.5})));
        fold_event(&mut msg, &ev(EventKind::Billing, json!({"input_tokens": 20})));
        assert_eq!(msg.metadata.system_events.len(), 2);
        assert_eq!(msg.metadata.tool_events.len(), 2);
        let billing = msg.metadata.billing.unwrap();
        assert_eq!(billing.input_tokens, Some(20));
        assert_eq!(billing.cost, None);
    }

    #[test]
    fn typed_events_become_enhanced_blocks() {
        let mut msg = streaming();
        let mut e = ev(EventKind::System, json!({"content": "Outline ready"}));
        e.content_type = Some("story_outline".into());
        fold_event(&mut msg, &e);
        let mut empty = ev(EventKind::System, json!({"content": ""}));
        empty.content_type = Some("summary".into());
        fold_event(&mut msg, &empty);
        assert_eq!(msg.metadata.enhanced_events.len(), 1);
        assert_eq!(msg.metadata.enhanced_events[0].content_type, ContentType::StoryOutline);
    }

    #[test]
    fn progress_and_metadata_events() {
        let mut msg = streaming();
        fold_event(&mut msg, &ev(EventKind::Progress, json!({"stage": "drafting", "percent": 40})));
        let mut meta = ev(EventKind::Metadata, json!({"model": "m-large"}));
        meta.content_type = Some("analysis".into());
        fold_event(&mut msg, &meta);
        let progress = msg.metadata.progress.clone().unwrap();
        assert_eq!(progress.stage.as_deref(), Some("drafting"));
        assert_eq!(progress.percent, Some(40.0));
        assert_eq!(msg.metadata.model.as_deref(), Some("m-large"));
        assert_eq!(msg.metadata.content_type, Some(ContentType::Analysis));
    }

    #[test]
    fn done_rewrites_mind_map_content() {
        let mut msg = streaming();
        fold_chunk(&mut msg, "", Some("mind_map"));
        let tree = fold_done(&mut msg, "Here:\n# Cast\n* Hero\n    * Mentor\n".into(), 0, 3).unwrap();
        assert_eq!(msg.status, MessageStatus::Complete);
        assert_eq!(msg.content, "# Cast\n- Hero\n  - Mentor");
        assert_eq!(msg.metadata.mind_map, Some(tree));
    }

    #[test]
    fn done_leaves_plain_markdown_alone() {
        let mut msg = streaming();
        let content = "# Notes\n- one\n- two".to_string();
        assert!(fold_done(&mut msg, content.clone(), 0, 3).is_none());
        assert_eq!(msg.content, content);
        assert_eq!(msg.metadata.content_type, None);
    }

    #[test]
    fn failure_keeps_partial_and_formats_diagnostic() {
        let mut msg = streaming();
        fold_chunk(&mut msg, "partial text", None);
        fold_failure(&mut msg, &StreamError::Application("boom".into()), 0, 3);
        assert_eq!(msg.status, MessageStatus::Error);
        assert_eq!(msg.content, "partial text\n\n---\n**Error:** boom\n\n_Attempts: 1 · manual retry available_");
        assert!(msg.metadata.can_retry);
        assert_eq!(msg.metadata.error.as_deref(), Some("boom"));
    }

    #[test]
    fn manual_retry_closes_at_limit() {
        let mut msg = MessageBuilder::assistant("A3", "").status(MessageStatus::Streaming).retry_count(3).build();
        fold_failure(&mut msg, &StreamError::Transport("down".into()), 2, 3);
        assert!(!msg.metadata.can_retry);
        assert!(msg.content.ends_with("_Attempts: 3 · retry limit reached_"));
    }

    #[test]
    fn retry_clears_content_only() {
        let mut msg = streaming();
        fold_chunk(&mut msg, "half", None);
        fold_event(&mut msg, &ev(EventKind::System, json!("note")));
        fold_retry(&mut msg, 2);
        assert!(msg.content.is_empty());
        assert_eq!(msg.metadata.system_events.len(), 1);
        assert_eq!(msg.metadata.auto_retries, 1);
    }
}
