/// Persistence for conversations and their branches
///
/// Conversations are saved as snapshots keyed by branch key:
/// - FileConversationStore - branches/{key}.yaml under the store dir
/// - MemoryStore - in-process map, for embedding and tests
///
/// Failures that cannot be returned to a caller are appended to
/// errors/errors.log via [`log_error`].
pub mod file;

pub use file::FileConversationStore;

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use sl_base::constants::ERRORS_DIR;
use sl_base::shared::now_rfc3339;
use sl_base::state::Message;

const ERROR_LOG_FILE: &str = "errors.log";

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Serialize(String),
    NotFound(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Store I/O error: {}", e),
            StoreError::Serialize(msg) => write!(f, "Store serialization error: {}", msg),
            StoreError::NotFound(key) => write!(f, "No saved conversation for '{}'", key),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_yaml::Error> for StoreError {
    fn from(e: serde_yaml::Error) -> Self {
        StoreError::Serialize(e.to_string())
    }
}

/// A saved conversation branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub key: String,
    pub session_id: String,
    /// Branch this one was cut from
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub saved_at: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl ConversationSnapshot {
    pub fn new(key: impl Into<String>, session_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self { key: key.into(), session_id: session_id.into(), parent: None, saved_at: now_rfc3339(), messages }
    }
}

/// Save/load contract for conversation snapshots.
pub trait ConversationStore: Send {
    fn save(&self, snapshot: &ConversationSnapshot) -> Result<(), StoreError>;
    fn load(&self, key: &str) -> Result<ConversationSnapshot, StoreError>;
    /// Saved keys, sorted.
    fn list(&self) -> Result<Vec<String>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<BTreeMap<String, ConversationSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError::Io(std::io::Error::other("memory store lock poisoned"))
}

impl ConversationStore for MemoryStore {
    fn save(&self, snapshot: &ConversationSnapshot) -> Result<(), StoreError> {
        self.snapshots.lock().map_err(|_| poisoned())?.insert(snapshot.key.clone(), snapshot.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<ConversationSnapshot, StoreError> {
        self.snapshots
            .lock()
            .map_err(|_| poisoned())?
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.snapshots.lock().map_err(|_| poisoned())?.keys().cloned().collect())
    }
}

/// Append an error to `<store_dir>/errors/errors.log`. Returns the log path,
/// or `None` if even that failed.
pub fn log_error(store_dir: &Path, error: &str) -> Option<PathBuf> {
    let dir = store_dir.join(ERRORS_DIR);
    fs::create_dir_all(&dir).ok()?;
    let path = dir.join(ERROR_LOG_FILE);
    let mut file = OpenOptions::new().create(true).append(true).open(&path).ok()?;
    writeln!(file, "[{}] {}", now_rfc3339(), error.replace('\n', " | ")).ok()?;
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_base::state::message::test_helpers::MessageBuilder;

    #[test]
    fn memory_store_round_trip_and_listing() {
        let store = MemoryStore::new();
        store.save(&ConversationSnapshot::new("s-b2", "s", vec![])).unwrap();
        store.save(&ConversationSnapshot::new("s", "s", vec![MessageBuilder::user("U1", "hi").build()])).unwrap();
        assert_eq!(store.list().unwrap(), vec!["s".to_string(), "s-b2".to_string()]);
        assert_eq!(store.load("s").unwrap().messages.len(), 1);
        assert!(matches!(store.load("missing"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn error_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_error(dir.path(), "first").unwrap();
        log_error(dir.path(), "second\nline").unwrap();
        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("first"));
        assert!(lines[1].ends_with("second | line"));
    }
}
