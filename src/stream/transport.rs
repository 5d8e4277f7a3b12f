//! Stream transports: the HTTP one used in production and a scripted one for tests.

use std::io::{BufRead, BufReader};

use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretBox};
use serde::Serialize;

use super::error::StreamError;

/// Outbound chat request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub input: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub enable_web_search: bool,
    pub enable_knowledge_base: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl ChatRequest {
    pub fn new(input: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            user_id: user_id.into(),
            session_id: None,
            project_id: None,
            model_provider: None,
            model: None,
            enable_web_search: false,
            enable_knowledge_base: false,
            agent_id: None,
        }
    }
}

/// Line source for one open stream.
pub type LineReader = Box<dyn BufRead + Send>;

/// Opens one stream connection per call.
pub trait StreamTransport: Send + Sync {
    fn open(&self, request: &ChatRequest) -> Result<LineReader, StreamError>;
}

/// POSTs the request and streams the SSE response body line by line.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    token: Option<SecretBox<String>>,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, token: Option<&SecretBox<String>>) -> Result<Self, StreamError> {
        // timeout(None): long-lived streams must not be cut by a total-request timeout
        let client = Client::builder().timeout(None).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token: token.map(|t| SecretBox::new(Box::new(t.expose_secret().clone()))),
        })
    }
}

impl StreamTransport for HttpTransport {
    fn open(&self, request: &ChatRequest) -> Result<LineReader, StreamError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("accept", "text/event-stream")
            .header("content-type", "application/json")
            .json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.expose_secret());
        }
        let response = builder.send()?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(StreamError::Http { status, body });
        }
        Ok(Box::new(BufReader::new(response)))
    }
}

#[cfg(test)]
pub mod scripted {
    //! In-memory transport replaying scripted attempts in order.

    use std::collections::VecDeque;
    use std::io::{self, BufReader, Cursor, Read};
    use std::sync::Mutex;
    use std::sync::mpsc::Receiver;

    use super::*;

    pub enum ScriptedAttempt {
        /// Serve these lines, then close cleanly
        Lines(Vec<String>),
        /// Serve these lines, then fail the read
        LinesThenFail(Vec<String>, String),
        /// Serve these bytes as-is, then close cleanly
        Raw(Vec<u8>),
        /// Refuse to open
        OpenError(StreamError),
        /// Serve lines as they are sent; closes when the sender is dropped
        Gated(Receiver<String>),
    }

    impl ScriptedAttempt {
        pub fn lines(lines: &[&str]) -> Self {
            ScriptedAttempt::Lines(lines.iter().map(|l| l.to_string()).collect())
        }
    }

    #[derive(Default)]
    pub struct ScriptedTransport {
        attempts: Mutex<VecDeque<ScriptedAttempt>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedTransport {
        pub fn new(attempts: Vec<ScriptedAttempt>) -> Self {
            Self { attempts: Mutex::new(attempts.into()), requests: Mutex::new(Vec::new()) }
        }

        /// Requests seen so far, in order.
        pub fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn joined(lines: Vec<String>) -> Vec<u8> {
        lines.into_iter().flat_map(|l| format!("{}\n", l).into_bytes()).collect()
    }

    struct FailingReader {
        data: Cursor<Vec<u8>>,
        error: String,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.read(buf)?;
            if n == 0 { Err(io::Error::new(io::ErrorKind::ConnectionReset, self.error.clone())) } else { Ok(n) }
        }
    }

    struct ChannelReader {
        rx: Receiver<String>,
        pending: Cursor<Vec<u8>>,
    }

    impl Read for ChannelReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            loop {
                let n = self.pending.read(buf)?;
                if n > 0 {
                    return Ok(n);
                }
                match self.rx.recv() {
                    Ok(line) => self.pending = Cursor::new(format!("{}\n", line).into_bytes()),
                    Err(_) => return Ok(0),
                }
            }
        }
    }

    impl StreamTransport for ScriptedTransport {
        fn open(&self, request: &ChatRequest) -> Result<LineReader, StreamError> {
            self.requests.lock().unwrap().push(request.clone());
            let attempt = self.attempts.lock().unwrap().pop_front();
            match attempt {
                Some(ScriptedAttempt::Lines(lines)) => Ok(Box::new(Cursor::new(joined(lines)))),
                Some(ScriptedAttempt::LinesThenFail(lines, error)) => {
                    Ok(Box::new(BufReader::new(FailingReader { data: Cursor::new(joined(lines)), error })))
                }
                Some(ScriptedAttempt::Raw(bytes)) => Ok(Box::new(Cursor::new(bytes))),
                Some(ScriptedAttempt::OpenError(e)) => Err(e),
                Some(ScriptedAttempt::Gated(rx)) => {
                    Ok(Box::new(BufReader::new(ChannelReader { rx, pending: Cursor::new(Vec::new()) })))
                }
                None => Err(StreamError::Transport("no scripted attempt left".into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_only_present_options() {
        let mut req = ChatRequest::new("hi", "u1");
        req.session_id = Some("s1".into());
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            json!({
                "input": "hi",
                "user_id": "u1",
                "session_id": "s1",
                "enable_web_search": false,
                "enable_knowledge_base": false
            })
        );
    }

    #[test]
    fn http_transport_builds_without_token() {
        assert!(HttpTransport::new("http://localhost:1/stream", None).is_ok());
    }
}
