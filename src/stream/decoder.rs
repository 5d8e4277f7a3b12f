//! Per-stream decoding state: frame parsing, content accumulation and the
//! terminal rules (one terminal output, errors are sticky).

use serde_json::Value;

use sl_base::constants::MAX_FRAME_LOG_CHARS;
use sl_base::shared::truncate_chars;

use super::error::StreamError;
use super::frame::{EventKind, Frame, StreamEvent, parse_line};

#[derive(Debug, Clone, PartialEq)]
pub enum DecoderOutput {
    /// Incremental assistant text
    Chunk { text: String, content_type: Option<String> },
    /// Any non-delta event, forwarded in arrival order
    Event(StreamEvent),
    /// Terminal success, with everything accumulated so far
    Done { full_content: String },
    /// Terminal failure
    Failed(StreamError),
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    full_content: String,
    /// Message of the latest `error` event, if any arrived
    error: Option<String>,
    finished: bool,
    malformed: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn malformed_frames(&self) -> usize {
        self.malformed
    }

    /// Decode one raw wire line. Bytes that are not UTF-8 make a malformed frame.
    pub fn feed_bytes(&mut self, raw: &[u8]) -> Vec<DecoderOutput> {
        match std::str::from_utf8(raw) {
            Ok(line) => self.feed_line(line),
            Err(e) => {
                if !self.finished {
                    self.malformed += 1;
                    let lossy = String::from_utf8_lossy(raw);
                    tracing::warn!(error = %e, frame = %truncate_chars(&lossy, MAX_FRAME_LOG_CHARS), "skipping stream frame that is not UTF-8");
                }
                Vec::new()
            }
        }
    }

    /// Decode one wire line. Malformed lines are logged and skipped.
    pub fn feed_line(&mut self, line: &str) -> Vec<DecoderOutput> {
        if self.finished {
            return Vec::new();
        }
        match parse_line(line) {
            Frame::Event(event) => self.feed_event(event),
            Frame::Skip => Vec::new(),
            Frame::Malformed(raw) => {
                self.malformed += 1;
                tracing::warn!(frame = %truncate_chars(&raw, MAX_FRAME_LOG_CHARS), "skipping malformed stream frame");
                Vec::new()
            }
        }
    }

    pub fn feed_event(&mut self, event: StreamEvent) -> Vec<DecoderOutput> {
        if self.finished {
            return Vec::new();
        }
        let kind = event.kind.clone();
        match kind {
            kind if kind.is_content_delta() => {
                let Some(text) = event.text().filter(|t| !t.is_empty()).map(str::to_string) else {
                    return Vec::new();
                };
                self.full_content.push_str(&text);
                vec![DecoderOutput::Chunk { text, content_type: event.content_type }]
            }
            kind if kind.is_terminal() => {
                let mut out = Vec::new();
                let has_payload = match &event.data {
                    Value::Null => false,
                    Value::Object(map) => !map.is_empty(),
                    _ => true,
                };
                if has_payload {
                    out.push(DecoderOutput::Event(event));
                }
                out.extend(self.terminate());
                out
            }
            EventKind::Error => {
                let message = event.error_message();
                tracing::debug!(error = %message, "error event received");
                self.error = Some(message);
                vec![DecoderOutput::Event(event)]
            }
            EventKind::Unknown(tag) => {
                tracing::debug!(tag = %tag, "unrecognised event tag");
                vec![DecoderOutput::Event(event)]
            }
            _ => vec![DecoderOutput::Event(event)],
        }
    }

    /// The connection closed cleanly. Counts as the terminal signal if none came.
    pub fn finish(&mut self) -> Option<DecoderOutput> {
        self.terminate()
    }

    /// The transport failed mid-stream. An earlier error event takes precedence.
    pub fn fail(&mut self, error: StreamError) -> Option<DecoderOutput> {
        if self.finished {
            return None;
        }
        self.finished = true;
        match self.error.take() {
            Some(message) => Some(DecoderOutput::Failed(StreamError::Application(message))),
            None => Some(DecoderOutput::Failed(error)),
        }
    }

    fn terminate(&mut self) -> Option<DecoderOutput> {
        if self.finished {
            return None;
        }
        self.finished = true;
        match self.error.take() {
            Some(message) => Some(DecoderOutput::Failed(StreamError::Application(message))),
            None => Some(DecoderOutput::Done { full_content: self.full_content.clone() }),
        }
    }
}
