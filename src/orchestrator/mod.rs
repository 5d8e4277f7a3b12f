//! Message orchestration: the per-conversation state machine.
//!
//! A send creates a user record and an assistant placeholder, then opens a
//! stream whose worker publishes signals on a channel. [`Orchestrator::poll`]
//! drains that channel on the caller's thread and folds each signal into the
//! records in arrival order. Signals from any stream other than the active
//! one are dropped, so a superseded stream can never write to a message.

pub mod error;
pub mod fold;

pub use error::OrchestratorError;

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use sl_base::content::{ContentBlock, ContentType, MindMapNode};
use sl_base::shared::now_rfc3339;
use sl_base::state::{Message, MessageStatus};

use crate::config::ClientConfig;
use crate::persistence::{ConversationSnapshot, ConversationStore, FileConversationStore, log_error};
use crate::retry::{CorrelationKey, RetryCounters, RetryPolicy};
use crate::stream::{
    ChatRequest, HttpIntentClassifier, HttpTransport, IntentClassifier, KeywordIntentClassifier, StreamDecoder,
    StreamEnvelope, StreamError, StreamHandle, StreamOptions, StreamSignal,
};
use crate::workspace::{DocumentMetadata, DocumentType, FileWorkspace, WorkspaceDocument, WorkspaceSync, document_title};

/// Upper bound on one blocking wait in `run_until_idle`, so stall checks still run.
const IDLE_WAIT_SLICE: Duration = Duration::from_millis(50);

struct ActiveStream {
    handle: StreamHandle,
    message_id: String,
    user_message_id: String,
    last_activity: Instant,
}

pub struct Orchestrator {
    config: Arc<ClientConfig>,
    key: CorrelationKey,
    /// Branch key the live conversation persists under
    branch: String,
    messages: Vec<Message>,
    decoder: StreamDecoder,
    active: Option<ActiveStream>,
    counters: RetryCounters,
    workspace: Box<dyn WorkspaceSync>,
    store: Box<dyn ConversationStore>,
    tx: Sender<StreamEnvelope>,
    rx: Receiver<StreamEnvelope>,
    next_user_id: usize,
    next_assistant_id: usize,
}

impl Orchestrator {
    pub fn new(
        config: ClientConfig,
        session_id: impl Into<String>,
        decoder: StreamDecoder,
        workspace: Box<dyn WorkspaceSync>,
        store: Box<dyn ConversationStore>,
    ) -> Self {
        let session_id = session_id.into();
        let (tx, rx) = mpsc::channel();
        Self {
            key: CorrelationKey::new(config.user_id.clone(), session_id.clone()),
            config: Arc::new(config),
            branch: session_id,
            messages: Vec::new(),
            decoder,
            active: None,
            counters: RetryCounters::new(),
            workspace,
            store,
            tx,
            rx,
            next_user_id: 1,
            next_assistant_id: 1,
        }
    }

    /// Wire up the HTTP transport, intent classification and file-backed stores
    /// from configuration, resuming the session's saved branch if there is one.
    pub fn from_config(config: ClientConfig, session_id: &str) -> Result<Self, OrchestratorError> {
        let transport = HttpTransport::new(&config.endpoint, config.api_token.as_ref()).map_err(OrchestratorError::Spawn)?;
        let mut decoder = StreamDecoder::new(Arc::new(transport));
        let intent: Option<Arc<dyn IntentClassifier>> = match &config.intent_endpoint {
            Some(endpoint) => Some(Arc::new(
                HttpIntentClassifier::new(endpoint, config.api_token.as_ref()).map_err(OrchestratorError::Spawn)?,
            )),
            None if !config.agents.is_empty() => Some(Arc::new(KeywordIntentClassifier::new(&config.agents))),
            None => None,
        };
        if let Some(intent) = intent {
            decoder = decoder.with_intent(intent);
        }
        let workspace = Box::new(FileWorkspace::new(&config.store_dir));
        let store = Box::new(FileConversationStore::new(&config.store_dir));
        let mut orchestrator = Self::new(config, session_id, decoder, workspace, store);
        match orchestrator.store.load(session_id) {
            Ok(snapshot) => orchestrator.restore(snapshot),
            Err(crate::persistence::StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(orchestrator)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Id of the assistant message currently streaming.
    pub fn streaming_message_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.message_id.as_str())
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn correlation_key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Failed attempts recorded for this session since its last success.
    pub fn retry_count(&self) -> u32 {
        self.counters.get(&self.key)
    }

    fn index_of(&self, id: &str) -> Result<usize, OrchestratorError> {
        self.messages.iter().position(|m| m.id == id).ok_or_else(|| OrchestratorError::UnknownMessage(id.to_string()))
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    // =========================================================================
    // SENDING
    // =========================================================================

    /// Send `content` as a new turn. Any stream still running is cancelled
    /// first and its placeholder marked `Cancelled`. Returns the id of the
    /// new assistant placeholder.
    pub fn send_message(
        &mut self,
        content: &str,
        agent_id: Option<String>,
        retry_attempt: u32,
    ) -> Result<String, OrchestratorError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(OrchestratorError::EmptyInput);
        }
        self.cancel_active();

        let user_id = format!("U{}", self.next_user_id);
        self.next_user_id += 1;
        let assistant_id = format!("A{}", self.next_assistant_id);
        self.next_assistant_id += 1;
        self.messages.push(Message::new_user(user_id.clone(), content.to_string()));
        self.messages.push(Message::new_assistant(assistant_id.clone(), agent_id.clone(), retry_attempt));

        let request = ChatRequest {
            session_id: Some(self.key.session_id.clone()),
            project_id: self.config.project_id.clone(),
            model_provider: self.config.model_provider.clone(),
            model: self.config.model.clone(),
            enable_web_search: self.config.enable_web_search,
            enable_knowledge_base: self.config.enable_knowledge_base,
            agent_id: agent_id.clone(),
            ..ChatRequest::new(content, self.key.user_id.clone())
        };
        let options =
            StreamOptions { policy: RetryPolicy::from(&self.config.retry), classify_intent: agent_id.is_none() };

        match self.decoder.open(request, options, self.tx.clone()) {
            Ok(handle) => {
                tracing::info!(id = %assistant_id, stream_id = handle.id(), retry_attempt, "message sent");
                self.active = Some(ActiveStream {
                    handle,
                    message_id: assistant_id.clone(),
                    user_message_id: user_id,
                    last_activity: Instant::now(),
                });
                Ok(assistant_id)
            }
            Err(e) => {
                self.finish_failure(&assistant_id, &user_id, &e, 0);
                Err(OrchestratorError::Spawn(e))
            }
        }
    }

    /// Drain pending stream signals and check for a stall. Returns the number
    /// of signals applied.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(envelope) = self.rx.try_recv() {
            if self.apply(envelope) {
                applied += 1;
            }
        }
        self.check_stall();
        applied
    }

    /// Block until the active stream finishes or `timeout` passes. Returns
    /// whether the conversation is idle.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.active.is_some() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.rx.recv_timeout((deadline - now).min(IDLE_WAIT_SLICE)) {
                Ok(envelope) => {
                    self.apply(envelope);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.check_stall();
        }
        true
    }

    /// Fold one signal. Returns false when it came from a stale stream.
    fn apply(&mut self, envelope: StreamEnvelope) -> bool {
        let Some(active) = self.active.as_mut() else {
            tracing::debug!(stream_id = envelope.stream_id, "signal with no active stream dropped");
            return false;
        };
        if active.handle.id() != envelope.stream_id {
            tracing::debug!(stream_id = envelope.stream_id, "stale stream signal dropped");
            return false;
        }
        active.last_activity = Instant::now();
        let message_id = active.message_id.clone();
        let user_message_id = active.user_message_id.clone();

        match envelope.signal {
            StreamSignal::Opened { attempt } => {
                tracing::debug!(id = %message_id, attempt, "stream opened");
                if let Some(user) = self.message_mut(&user_message_id) {
                    user.set_status(MessageStatus::Complete);
                }
            }
            StreamSignal::AgentSelected(agent) => {
                tracing::info!(id = %message_id, agent = %agent, "agent selected");
                if let Some(msg) = self.message_mut(&message_id) {
                    msg.agent_id = Some(agent);
                }
            }
            StreamSignal::Chunk { text, content_type } => {
                if let Some(msg) = self.message_mut(&message_id) {
                    fold::fold_chunk(msg, &text, content_type.as_deref());
                }
            }
            StreamSignal::Event(event) => {
                if let Some(msg) = self.message_mut(&message_id) {
                    fold::fold_event(msg, &event);
                }
            }
            StreamSignal::Retrying { attempt, error, .. } => {
                let total = self.counters.increment(&self.key);
                tracing::debug!(id = %message_id, attempt, total, %error, "attempt failed");
                if let Some(msg) = self.message_mut(&message_id) {
                    fold::fold_retry(msg, attempt);
                }
            }
            StreamSignal::Done { full_content, retry_count } => {
                self.active = None;
                self.finish_success(&message_id, &user_message_id, full_content, retry_count);
            }
            StreamSignal::Failed { error, retry_count } => {
                self.active = None;
                self.finish_failure(&message_id, &user_message_id, &error, retry_count);
            }
        }
        true
    }

    fn check_stall(&mut self) {
        let Some(timeout) = self.config.stall_timeout() else { return };
        let stalled = self.active.as_ref().is_some_and(|a| a.last_activity.elapsed() >= timeout);
        if !stalled {
            return;
        }
        if let Some(active) = self.active.take() {
            active.handle.cancel();
            let error = StreamError::Stalled { after_ms: timeout.as_millis() as u64 };
            tracing::warn!(id = %active.message_id, %error, "stream stalled, cancelling");
            let retries = self.message(&active.message_id).map(|m| m.metadata.auto_retries).unwrap_or(0);
            self.finish_failure(&active.message_id, &active.user_message_id, &error, retries);
        }
    }

    fn finish_success(&mut self, id: &str, user_id: &str, full_content: String, retry_count: u32) {
        self.counters.reset(&self.key);
        if let Some(user) = self.message_mut(user_id) {
            user.set_status(MessageStatus::Complete);
        }
        let limit = self.config.manual_retry_limit;
        let Some(msg) = self.message_mut(id) else { return };
        let tree = fold::fold_done(msg, full_content, retry_count, limit);
        tracing::info!(id, retry_count, mind_map = tree.is_some(), "message complete");
        let document = self.workspace_document(id, tree.as_ref());
        if let Some(document) = document
            && let Err(e) = self.workspace.set_content(document)
        {
            self.report_store_error("workspace sync failed", &e.to_string());
        }
        self.persist();
    }

    fn finish_failure(&mut self, id: &str, user_id: &str, error: &StreamError, retry_count: u32) {
        self.counters.increment(&self.key);
        if let Some(user) = self.message_mut(user_id) {
            user.set_status(MessageStatus::Complete);
        }
        let limit = self.config.manual_retry_limit;
        if let Some(msg) = self.message_mut(id) {
            fold::fold_failure(msg, error, retry_count, limit);
        }
        tracing::warn!(id, retry_count, %error, "message failed");
        self.persist();
    }

    fn workspace_document(&self, id: &str, tree: Option<&MindMapNode>) -> Option<WorkspaceDocument> {
        let msg = self.message(id)?;
        if msg.content.trim().is_empty() {
            return None;
        }
        Some(WorkspaceDocument {
            id: msg.id.clone(),
            doc_type: if tree.is_some() { DocumentType::Mindmap } else { DocumentType::Document },
            title: document_title(&msg.content, tree),
            content: msg.content.clone(),
            metadata: DocumentMetadata {
                agent_id: msg.agent_id.clone(),
                agent_name: self.config.agent_name(msg.agent_id.as_deref()),
                timestamp: now_rfc3339(),
            },
        })
    }

    /// Cancel the running stream, if any, leaving its placeholder `Cancelled`.
    fn cancel_active(&mut self) -> bool {
        let Some(active) = self.active.take() else { return false };
        active.handle.cancel();
        if let Some(user) = self.message_mut(&active.user_message_id) {
            user.set_status(MessageStatus::Complete);
        }
        if let Some(msg) = self.message_mut(&active.message_id) {
            msg.set_status(MessageStatus::Cancelled);
        }
        tracing::info!(id = %active.message_id, "stream cancelled");
        true
    }

    // =========================================================================
    // TURN OPERATIONS
    // =========================================================================

    /// Stop the active stream. Partial content is kept and the message
    /// becomes `Cancelled`. Returns whether anything was streaming.
    pub fn stop_streaming(&mut self) -> bool {
        let stopped = self.cancel_active();
        if stopped {
            self.persist();
        }
        stopped
    }

    /// Replace an assistant message with a fresh attempt at the user message
    /// before it. `Ok(None)` when there is no such user message.
    pub fn regenerate_message(&mut self, id: &str) -> Result<Option<String>, OrchestratorError> {
        let index = self.index_of(id)?;
        if !self.messages[index].is_assistant() {
            return Ok(None);
        }
        let Some(user_index) = self.messages[..index].iter().rposition(Message::is_user) else {
            tracing::debug!(id, "no user message to regenerate from");
            return Ok(None);
        };
        if self.streaming_message_id() == Some(id) {
            self.cancel_active();
        }
        let target = self.messages.remove(index);
        let user = self.messages.remove(user_index);
        let attempt = target.metadata.retry_count + 1;
        tracing::info!(id, attempt, "regenerating");
        self.send_message(&user.content, target.agent_id, attempt).map(Some)
    }

    /// Edit a message. A user message drops every later message and is
    /// resent; an assistant message only has its content replaced.
    pub fn edit_message(&mut self, id: &str, new_content: &str) -> Result<Option<String>, OrchestratorError> {
        let index = self.index_of(id)?;
        if self.messages[index].is_user() {
            if new_content.trim().is_empty() {
                return Err(OrchestratorError::EmptyInput);
            }
            self.cancel_active();
            self.messages.truncate(index);
            return self.send_message(new_content, None, 0).map(Some);
        }
        if !self.messages[index].is_assistant() {
            return Err(OrchestratorError::NotAUserMessage(id.to_string()));
        }
        // a streaming reply would overwrite the edit on its next chunk
        if self.streaming_message_id() == Some(id) {
            self.cancel_active();
        }
        self.messages[index].content = new_content.to_string();
        self.persist();
        Ok(None)
    }

    /// Remove one message, cancelling its stream if it is streaming.
    pub fn delete_message(&mut self, id: &str) -> Result<(), OrchestratorError> {
        let index = self.index_of(id)?;
        let active_ids = self.active.as_ref().map(|a| (a.message_id.clone(), a.user_message_id.clone()));
        if let Some((assistant, user)) = active_ids
            && (assistant == id || user == id)
        {
            self.cancel_active();
        }
        self.messages.remove(index);
        self.persist();
        Ok(())
    }

    /// Classified blocks of a message: its enhanced events, or one block
    /// built from the final content.
    pub fn blocks(&self, id: &str) -> Option<Vec<ContentBlock>> {
        let msg = self.message(id)?;
        if !msg.metadata.enhanced_events.is_empty() {
            return Some(msg.metadata.enhanced_events.clone());
        }
        if msg.content.trim().is_empty() {
            return Some(Vec::new());
        }
        Some(vec![ContentBlock {
            content_type: msg.metadata.content_type.unwrap_or(ContentType::Text),
            content: msg.content.clone(),
            agent_source: msg.agent_id.clone(),
            timestamp: None,
            metadata: None,
            mind_map: msg.metadata.mind_map.clone(),
        }])
    }

    // =========================================================================
    // BRANCHES
    // =========================================================================

    fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot::new(self.branch.clone(), self.key.session_id.clone(), self.messages.clone())
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.save(&self.snapshot()) {
            self.report_store_error("saving conversation failed", &e.to_string());
        }
    }

    fn report_store_error(&self, context: &str, error: &str) {
        tracing::error!(branch = %self.branch, error, "{}", context);
        log_error(&self.config.store_dir, &format!("{} ({}): {}", context, self.branch, error));
    }

    fn restore(&mut self, snapshot: ConversationSnapshot) {
        self.branch = snapshot.key;
        self.messages = snapshot.messages;
        let next = |prefix: char| {
            self.messages
                .iter()
                .filter_map(|m| m.id.strip_prefix(prefix)?.parse::<usize>().ok())
                .max()
                .map_or(1, |n| n + 1)
        };
        self.next_user_id = next('U');
        self.next_assistant_id = next('A');
    }

    /// Save the live conversation, cut it after `id` and continue on a new
    /// branch holding that prefix. Returns the new branch key.
    pub fn create_branch(&mut self, id: &str) -> Result<String, OrchestratorError> {
        let index = self.index_of(id)?;
        self.cancel_active();
        self.store.save(&self.snapshot())?;

        let existing = self.store.list()?;
        let mut n = existing.len() + 1;
        let key = loop {
            let candidate = format!("{}-b{}", self.key.session_id, n);
            if !existing.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };

        self.messages.truncate(index + 1);
        let mut snapshot = ConversationSnapshot::new(key.clone(), self.key.session_id.clone(), self.messages.clone());
        snapshot.parent = Some(self.branch.clone());
        self.store.save(&snapshot)?;
        tracing::info!(from = %self.branch, to = %key, at = id, "branch created");
        self.branch = key.clone();
        Ok(key)
    }

    /// Save the live conversation and load another branch in its place.
    pub fn switch_branch(&mut self, key: &str) -> Result<(), OrchestratorError> {
        let snapshot = self.store.load(key)?;
        self.cancel_active();
        self.store.save(&self.snapshot())?;
        self.restore(snapshot);
        tracing::info!(branch = key, "switched branch");
        Ok(())
    }

    pub fn branches(&self) -> Result<Vec<String>, OrchestratorError> {
        Ok(self.store.list()?)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.handle.cancel();
        }
    }
}
