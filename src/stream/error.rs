use std::fmt;

/// Message fragments that mark an error as transient (network, timeout, throttling).
const RETRIABLE_MARKERS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection",
    "rate limit",
    "rate-limit",
    "too many requests",
    "temporarily unavailable",
    "429",
    "502",
    "503",
    "504",
];

/// Typed error for a single stream attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
    /// DNS, connect, read or other transport-level failure
    Transport(String),
    /// Server answered the request with a non-success status
    Http { status: u16, body: String },
    /// The far end reported an error event inside the stream
    Application(String),
    /// No signal arrived within the stall timeout
    Stalled { after_ms: u64 },
    /// Stopped locally
    Cancelled,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Transport(msg) => write!(f, "Network error: {}", msg),
            StreamError::Http { status, body } => write!(f, "HTTP error {}: {}", status, body),
            StreamError::Application(msg) => write!(f, "{}", msg),
            StreamError::Stalled { after_ms } => write!(f, "Stream stalled: no data for {} ms", after_ms),
            StreamError::Cancelled => write!(f, "Stream cancelled"),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<reqwest::Error> for StreamError {
    fn from(e: reqwest::Error) -> Self {
        StreamError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::Transport(e.to_string())
    }
}

impl StreamError {
    /// Default retry classification, decided on the rendered message text.
    ///
    /// Application errors reported by the server are only retried when their
    /// text also looks transient; cancellation never is.
    pub fn is_retriable(&self) -> bool {
        if matches!(self, StreamError::Cancelled) {
            return false;
        }
        let text = self.to_string().to_lowercase();
        RETRIABLE_MARKERS.iter().any(|m| text.contains(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retriable() {
        assert!(StreamError::Transport("connection reset by peer".into()).is_retriable());
    }

    #[test]
    fn throttling_status_is_retriable() {
        assert!(StreamError::Http { status: 429, body: "slow down".into() }.is_retriable());
        assert!(StreamError::Http { status: 503, body: String::new() }.is_retriable());
    }

    #[test]
    fn client_errors_are_not_retriable() {
        assert!(!StreamError::Http { status: 400, body: "bad request".into() }.is_retriable());
    }

    #[test]
    fn application_error_retried_only_when_transient_looking() {
        assert!(!StreamError::Application("boom".into()).is_retriable());
        assert!(StreamError::Application("Rate limit exceeded, try later".into()).is_retriable());
    }

    #[test]
    fn cancelled_never_retried() {
        assert!(!StreamError::Cancelled.is_retriable());
    }

    #[test]
    fn stalled_display_mentions_duration() {
        assert_eq!(StreamError::Stalled { after_ms: 10 }.to_string(), "Stream stalled: no data for 10 ms");
    }

    #[test]
    fn display_application_is_raw_text() {
        assert_eq!(StreamError::Application("boom".into()).to_string(), "boom");
    }
}
