use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::{ContentBlock, ContentType, MindMapNode};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    #[default]
    User,
    Assistant,
    System,
}

/// Lifecycle of a message within one attempt.
///
/// Transitions only move forward: `Sending`/`Streaming` may end in
/// `Complete`, `Error` or `Cancelled`, and terminal states never change.
/// Regeneration creates a new record instead of rewinding an old one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Sending,
    Streaming,
    Complete,
    Error,
    Cancelled,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Complete | MessageStatus::Error | MessageStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        match (self, next) {
            (MessageStatus::Sending, MessageStatus::Sending) => false,
            (MessageStatus::Sending, _) => true,
            (MessageStatus::Streaming, next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// Raw stream event kept on a message for display/audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_source: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillingInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits_remaining: Option<f64>,
    /// Payload as received
    #[serde(default)]
    pub raw: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Per-message metadata.
///
/// The event lists are append-only: every new system/tool/enhanced event is
/// pushed, never replacing what is there. Scalar fields are last-write-wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system_events: Vec<EventRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_events: Vec<EventRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enhanced_events: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing: Option<BillingInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressInfo>,
    /// Manual regeneration count that produced this message
    #[serde(default)]
    pub retry_count: u32,
    /// Automatic retries the last send went through
    #[serde(default)]
    pub auto_retries: u32,
    #[serde(default)]
    pub can_retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mind_map: Option<MindMapNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Display ID (U1, A1, ...)
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    /// Creation time (ms since UNIX epoch)
    #[serde(default)]
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    /// Create a user message. Its content never changes after creation.
    pub fn new_user(id: String, content: String) -> Self {
        Self {
            id,
            role: MessageRole::User,
            content,
            timestamp_ms: crate::shared::now_ms(),
            agent_id: None,
            status: MessageStatus::Sending,
            metadata: MessageMetadata::default(),
        }
    }

    /// Create an empty assistant placeholder ready for streaming.
    pub fn new_assistant(id: String, agent_id: Option<String>, retry_count: u32) -> Self {
        Self {
            id,
            role: MessageRole::Assistant,
            content: String::new(),
            timestamp_ms: crate::shared::now_ms(),
            agent_id,
            status: MessageStatus::Streaming,
            metadata: MessageMetadata { retry_count, ..MessageMetadata::default() },
        }
    }

    /// Move to `next` if the transition is forward. Returns whether it applied.
    pub fn set_status(&mut self, next: MessageStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use super::*;

    /// Builder for constructing test messages with sensible defaults.
    pub struct MessageBuilder {
        msg: Message,
    }

    impl MessageBuilder {
        fn base(id: &str, role: MessageRole, content: &str) -> Self {
            Self {
                msg: Message {
                    id: id.to_string(),
                    role,
                    content: content.to_string(),
                    timestamp_ms: 0,
                    agent_id: None,
                    status: MessageStatus::Complete,
                    metadata: MessageMetadata::default(),
                },
            }
        }

        pub fn user(id: &str, content: &str) -> Self {
            Self::base(id, MessageRole::User, content)
        }

        pub fn assistant(id: &str, content: &str) -> Self {
            Self::base(id, MessageRole::Assistant, content)
        }

        pub fn status(mut self, s: MessageStatus) -> Self {
            self.msg.status = s;
            self
        }

        pub fn retry_count(mut self, n: u32) -> Self {
            self.msg.metadata.retry_count = n;
            self
        }

        pub fn build(self) -> Message {
            self.msg
        }
    }
}
