use serde_json::Value;

use sl_base::constants::COLLAPSE_THRESHOLD_CHARS;
use sl_base::content::{ContentBlock, ContentType};

use super::content_type::classify;
use super::mind_map;
use crate::stream::frame::{EventKind, StreamEvent, normalize, text_of};

/// Types whose bodies are long-form analysis and start collapsed.
const COLLAPSED_TYPES: &[ContentType] = &[
    ContentType::Analysis,
    ContentType::Evaluation,
    ContentType::ScriptEvaluation,
    ContentType::Reasoning,
    ContentType::Thinking,
    ContentType::ToolResult,
    ContentType::SearchResult,
    ContentType::StoryTreatment,
    ContentType::SceneBreakdown,
    ContentType::MarketAnalysis,
];

/// Whether a block body should default to collapsed.
pub fn is_collapsible(content_type: ContentType, length: usize) -> bool {
    length > COLLAPSE_THRESHOLD_CHARS || COLLAPSED_TYPES.contains(&content_type)
}

fn default_type(kind: &EventKind) -> ContentType {
    match kind {
        EventKind::ToolCall => ContentType::ToolCall,
        EventKind::ToolReturn | EventKind::ToolComplete => ContentType::ToolResult,
        EventKind::ToolProcessing | EventKind::Progress => ContentType::Progress,
        EventKind::System => ContentType::System,
        EventKind::Error => ContentType::Error,
        EventKind::Billing => ContentType::Billing,
        _ => ContentType::Text,
    }
}

fn content_of(data: &Value) -> Option<String> {
    if let Some(text) = text_of(data) {
        return Some(text.to_string());
    }
    match data {
        Value::Object(map) if !map.is_empty() => serde_json::to_string_pretty(data).ok(),
        Value::Array(items) if !items.is_empty() => serde_json::to_string_pretty(data).ok(),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Classified block for one event, or `None` when it carries no usable content.
pub fn to_block(event: &StreamEvent) -> Option<ContentBlock> {
    let content = content_of(&event.data).filter(|c| !c.trim().is_empty())?;
    let content_type = match event.content_type.as_deref() {
        Some(tag) => classify(tag),
        None => default_type(&event.kind),
    };
    let mind_map = (content_type == ContentType::MindMap)
        .then(|| mind_map::extract(&content, event.metadata.as_ref()))
        .flatten();
    Some(ContentBlock {
        content_type,
        content,
        agent_source: event.agent_source.clone(),
        timestamp: event.timestamp.clone(),
        metadata: event.metadata.clone(),
        mind_map,
    })
}

/// Same as [`to_block`] for a raw, not yet normalized, frame value.
pub fn block_from_value(value: Value) -> Option<ContentBlock> {
    to_block(&normalize(value)?)
}
