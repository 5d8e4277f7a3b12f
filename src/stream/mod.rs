//! Event stream decoding.
//!
//! `StreamDecoder::open` starts one worker thread per send. The worker runs
//! the retry loop around a single stream attempt and publishes
//! [`StreamSignal`]s on an mpsc channel; the owner drains that channel on its
//! own thread, so every mutation happens there in arrival order.
//! Cancelling the handle stops further signals and wakes any backoff sleep.

pub mod decoder;
pub mod error;
pub mod frame;
pub mod intent;
pub mod transport;

use std::io::BufRead;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;
use std::time::Duration;

pub use decoder::{DecoderOutput, FrameDecoder};
pub use error::StreamError;
pub use frame::{EventKind, StreamEvent};
pub use intent::{HttpIntentClassifier, IntentClassifier, KeywordIntentClassifier};
pub use transport::{ChatRequest, HttpTransport, StreamTransport};

use crate::retry::{CancelToken, RetryExecutor, RetryPolicy};

/// What a stream worker reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    /// Connection for `attempt` is open
    Opened { attempt: u32 },
    /// Intent classification picked an agent
    AgentSelected(String),
    Chunk { text: String, content_type: Option<String> },
    Event(StreamEvent),
    /// `error` failed an attempt; `attempt` starts after `delay`
    Retrying { attempt: u32, delay: Duration, error: StreamError },
    Done { full_content: String, retry_count: u32 },
    Failed { error: StreamError, retry_count: u32 },
}

impl StreamSignal {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamSignal::Done { .. } | StreamSignal::Failed { .. })
    }
}

/// A signal tagged with the stream that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEnvelope {
    pub stream_id: u64,
    pub signal: StreamSignal,
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub policy: RetryPolicy,
    /// Run intent classification on the first attempt when no agent is pinned
    pub classify_intent: bool,
}

/// Owner's side of a running stream.
pub struct StreamHandle {
    id: u64,
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop the stream. Safe to call repeatedly and after completion.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the worker to exit. Only used where the stream is known to end.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub struct StreamDecoder {
    transport: Arc<dyn StreamTransport>,
    intent: Option<Arc<dyn IntentClassifier>>,
    next_id: u64,
    current: Option<CancelToken>,
}

impl StreamDecoder {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self { transport, intent: None, next_id: 1, current: None }
    }

    pub fn with_intent(mut self, intent: Arc<dyn IntentClassifier>) -> Self {
        self.intent = Some(intent);
        self
    }

    /// Open a stream for `request`. A stream previously opened through this
    /// decoder is cancelled first so two workers never feed one conversation.
    pub fn open(
        &mut self,
        request: ChatRequest,
        options: StreamOptions,
        tx: Sender<StreamEnvelope>,
    ) -> Result<StreamHandle, StreamError> {
        if let Some(previous) = self.current.take() {
            previous.cancel();
        }
        let id = self.next_id;
        self.next_id += 1;
        let cancel = CancelToken::new();
        self.current = Some(cancel.clone());

        let worker = StreamWorker {
            id,
            transport: Arc::clone(&self.transport),
            intent: self.intent.clone(),
            cancel: cancel.clone(),
            tx,
        };
        let thread = std::thread::Builder::new()
            .name(format!("stream-{}", id))
            .spawn(move || worker.run(request, options))
            .map_err(StreamError::from)?;
        tracing::debug!(stream_id = id, "stream opened");
        Ok(StreamHandle { id, cancel, thread: Some(thread) })
    }
}

struct StreamWorker {
    id: u64,
    transport: Arc<dyn StreamTransport>,
    intent: Option<Arc<dyn IntentClassifier>>,
    cancel: CancelToken,
    tx: Sender<StreamEnvelope>,
}

impl StreamWorker {
    fn emit(&self, signal: StreamSignal) {
        if !self.cancel.is_cancelled() {
            let _ = self.tx.send(StreamEnvelope { stream_id: self.id, signal });
        }
    }

    fn run(self, mut request: ChatRequest, options: StreamOptions) {
        let executor = RetryExecutor::new(options.policy.clone()).with_cancel(self.cancel.clone());
        let outcome = executor.execute_with(
            |attempt| {
                if attempt == 1 && options.classify_intent && request.agent_id.is_none() {
                    self.select_agent(&mut request);
                }
                self.attempt(&request, attempt)
            },
            StreamError::is_retriable,
            |attempt, delay, error| {
                tracing::warn!(stream_id = self.id, attempt, delay_ms = delay.as_millis() as u64, %error, "retrying stream");
                self.emit(StreamSignal::Retrying { attempt, delay, error: error.clone() });
            },
        );

        if outcome.cancelled || self.cancel.is_cancelled() {
            tracing::debug!(stream_id = self.id, "stream cancelled");
            return;
        }
        let retry_count = outcome.retry_count;
        match (outcome.data, outcome.error) {
            (Some(full_content), _) => {
                tracing::debug!(stream_id = self.id, retry_count, "stream done");
                self.emit(StreamSignal::Done { full_content, retry_count });
            }
            (None, Some(error)) => {
                tracing::debug!(stream_id = self.id, retry_count, %error, "stream failed");
                self.emit(StreamSignal::Failed { error, retry_count });
            }
            (None, None) => {}
        }
    }

    fn select_agent(&self, request: &mut ChatRequest) {
        let Some(intent) = &self.intent else { return };
        match intent.select_agent(&request.input, &request.user_id) {
            Ok(Some(agent)) => {
                request.agent_id = Some(agent.clone());
                self.emit(StreamSignal::AgentSelected(agent));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(stream_id = self.id, error = %e, "intent classification failed, sending without agent"),
        }
    }

    /// One connection: read until the decoder reaches a terminal output.
    fn attempt(&self, request: &ChatRequest, attempt: u32) -> Result<String, StreamError> {
        let mut reader = self.transport.open(request)?;
        if self.cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        self.emit(StreamSignal::Opened { attempt });

        let mut decoder = FrameDecoder::new();
        let mut line = Vec::new();
        loop {
            if self.cancel.is_cancelled() {
                return Err(StreamError::Cancelled);
            }
            line.clear();
            let outputs: Vec<DecoderOutput> = match reader.read_until(b'\n', &mut line) {
                Ok(0) => decoder.finish().into_iter().collect(),
                Ok(_) => decoder.feed_bytes(&line),
                Err(e) => decoder.fail(StreamError::from(e)).into_iter().collect(),
            };
            for output in outputs {
                match output {
                    DecoderOutput::Chunk { text, content_type } => self.emit(StreamSignal::Chunk { text, content_type }),
                    DecoderOutput::Event(event) => self.emit(StreamSignal::Event(event)),
                    DecoderOutput::Done { full_content } => return Ok(full_content),
                    DecoderOutput::Failed(error) => return Err(error),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::transport::scripted::{ScriptedAttempt, ScriptedTransport};
    use super::*;
    use std::sync::mpsc::{self, Receiver};

    fn options(max_retries: u32) -> StreamOptions {
        StreamOptions { policy: RetryPolicy::new(max_retries, Duration::ZERO), classify_intent: false }
    }

    fn collect(rx: &Receiver<StreamEnvelope>) -> Vec<StreamSignal> {
        let mut out = Vec::new();
        while let Ok(env) = rx.recv_timeout(Duration::from_secs(5)) {
            let terminal = env.signal.is_terminal();
            out.push(env.signal);
            if terminal {
                break;
            }
        }
        out
    }

    #[test]
    fn streams_chunks_then_done() {
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedAttempt::lines(&[
            r#"data: {"event":"llm_chunk","data":{"content":"Hel"}}"#,
            r#"data: {"event":"llm_chunk","data":{"content":"lo"}}"#,
            r#"data: {"event":"done"}"#,
        ])]));
        let (tx, rx) = mpsc::channel();
        let mut decoder = StreamDecoder::new(transport);
        let handle = decoder.open(ChatRequest::new("hi", "u"), options(0), tx).unwrap();
        let signals = collect(&rx);
        assert_eq!(signals[0], StreamSignal::Opened { attempt: 1 });
        assert_eq!(signals.last(), Some(&StreamSignal::Done { full_content: "Hello".into(), retry_count: 0 }));
        handle.join();
    }

    #[test]
    fn transport_drop_is_retried_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedAttempt::LinesThenFail(vec![r#"{"event":"llm_chunk","data":{"content":"par"}}"#.into()], "reset".into()),
            ScriptedAttempt::lines(&[r#"{"event":"llm_chunk","data":{"content":"full"}}"#, r#"{"event":"done"}"#]),
        ]));
        let (tx, rx) = mpsc::channel();
        let handle = StreamDecoder::new(transport).open(ChatRequest::new("hi", "u"), options(2), tx).unwrap();
        let signals = collect(&rx);
        assert!(signals.iter().any(|s| matches!(s, StreamSignal::Retrying { attempt: 2, .. })));
        assert_eq!(signals.last(), Some(&StreamSignal::Done { full_content: "full".into(), retry_count: 1 }));
        handle.join();
    }

    #[test]
    fn invalid_utf8_frame_keeps_the_stream_open() {
        let mut body = b"{\"event\":\"llm_chunk\",\"data\":{\"content\":\"a\"}}\n".to_vec();
        body.extend_from_slice(b"{\"event\":\"llm_chunk\",\"data\":{\"content\":\"\xff\xfe\"}}\n");
        body.extend_from_slice(b"{\"event\":\"llm_chunk\",\"data\":{\"content\":\"b\"}}\n");
        body.extend_from_slice(b"{\"event\":\"done\"}\n");
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedAttempt::Raw(body)]));
        let (tx, rx) = mpsc::channel();
        let shared = Arc::clone(&transport);
        let handle = StreamDecoder::new(transport).open(ChatRequest::new("hi", "u"), options(3), tx).unwrap();
        let signals = collect(&rx);
        assert_eq!(signals.last(), Some(&StreamSignal::Done { full_content: "ab".into(), retry_count: 0 }));
        handle.join();
        assert_eq!(shared.requests().len(), 1);
    }

    #[test]
    fn application_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedAttempt::lines(&[r#"{"event":"error","data":{"error":"boom"}}"#]),
            ScriptedAttempt::lines(&[r#"{"event":"done"}"#]),
        ]));
        let (tx, rx) = mpsc::channel();
        let shared = Arc::clone(&transport);
        let handle = StreamDecoder::new(transport).open(ChatRequest::new("hi", "u"), options(3), tx).unwrap();
        let signals = collect(&rx);
        assert_eq!(
            signals.last(),
            Some(&StreamSignal::Failed { error: StreamError::Application("boom".into()), retry_count: 0 })
        );
        handle.join();
        assert_eq!(shared.requests().len(), 1);
    }

    #[test]
    fn open_error_exhausts_budget() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedAttempt::OpenError(StreamError::Http { status: 503, body: "busy".into() }),
            ScriptedAttempt::OpenError(StreamError::Http { status: 503, body: "busy".into() }),
        ]));
        let (tx, rx) = mpsc::channel();
        let handle = StreamDecoder::new(transport).open(ChatRequest::new("hi", "u"), options(1), tx).unwrap();
        let signals = collect(&rx);
        assert!(matches!(signals.last(), Some(StreamSignal::Failed { retry_count: 1, .. })));
        handle.join();
    }

    #[test]
    fn cancel_silences_the_worker() {
        let (line_tx, line_rx) = mpsc::channel();
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedAttempt::Gated(line_rx)]));
        let (tx, rx) = mpsc::channel();
        let handle = StreamDecoder::new(transport).open(ChatRequest::new("hi", "u"), options(0), tx).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().signal, StreamSignal::Opened { attempt: 1 });
        handle.cancel();
        handle.cancel();
        line_tx.send(r#"{"event":"llm_chunk","data":{"content":"late"}}"#.into()).unwrap();
        drop(line_tx);
        handle.join();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn new_open_cancels_previous_stream() {
        let (line_tx, line_rx) = mpsc::channel::<String>();
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedAttempt::Gated(line_rx),
            ScriptedAttempt::lines(&[r#"{"event":"done"}"#]),
        ]));
        let (tx, rx) = mpsc::channel();
        let mut decoder = StreamDecoder::new(transport);
        let first = decoder.open(ChatRequest::new("one", "u"), options(0), tx.clone()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().signal, StreamSignal::Opened { attempt: 1 });
        let second = decoder.open(ChatRequest::new("two", "u"), options(0), tx).unwrap();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_ne!(first.id(), second.id());
        let second_id = second.id();
        drop(line_tx);
        first.join();
        second.join();
        let ids: Vec<u64> = rx.try_iter().filter(|e| e.signal.is_terminal()).map(|e| e.stream_id).collect();
        assert_eq!(ids, vec![second_id]);
    }

    #[test]
    fn intent_runs_only_when_unpinned() {
        struct Fixed;
        impl IntentClassifier for Fixed {
            fn select_agent(&self, _: &str, _: &str) -> Result<Option<String>, StreamError> {
                Ok(Some("critic".into()))
            }
        }
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedAttempt::lines(&[r#"{"event":"done"}"#]),
            ScriptedAttempt::lines(&[r#"{"event":"done"}"#]),
        ]));
        let shared = Arc::clone(&transport);
        let (tx, rx) = mpsc::channel();
        let mut decoder = StreamDecoder::new(transport).with_intent(Arc::new(Fixed));
        let opts = StreamOptions { classify_intent: true, ..options(0) };

        let h = decoder.open(ChatRequest::new("evaluate", "u"), opts.clone(), tx.clone()).unwrap();
        let signals = collect(&rx);
        assert!(signals.contains(&StreamSignal::AgentSelected("critic".into())));
        h.join();

        let mut pinned = ChatRequest::new("evaluate", "u");
        pinned.agent_id = Some("writer".into());
        let h = decoder.open(pinned, opts, tx).unwrap();
        let signals = collect(&rx);
        assert!(!signals.iter().any(|s| matches!(s, StreamSignal::AgentSelected(_))));
        h.join();

        let requests = shared.requests();
        assert_eq!(requests[0].agent_id.as_deref(), Some("critic"));
        assert_eq!(requests[1].agent_id.as_deref(), Some("writer"));
    }
}
