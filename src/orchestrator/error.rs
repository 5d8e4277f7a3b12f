use std::fmt;

use crate::persistence::StoreError;
use crate::stream::StreamError;

#[derive(Debug)]
pub enum OrchestratorError {
    /// No message with this id in the live conversation
    UnknownMessage(String),
    /// The operation needs a user or assistant message and got something else
    NotAUserMessage(String),
    EmptyInput,
    /// The stream worker could not be started
    Spawn(StreamError),
    Store(StoreError),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::UnknownMessage(id) => write!(f, "Unknown message '{}'", id),
            OrchestratorError::NotAUserMessage(id) => write!(f, "Message '{}' cannot be edited", id),
            OrchestratorError::EmptyInput => write!(f, "Message is empty"),
            OrchestratorError::Spawn(e) => write!(f, "Could not start stream: {}", e),
            OrchestratorError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrchestratorError::Spawn(e) => Some(e),
            OrchestratorError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(e: StoreError) -> Self {
        OrchestratorError::Store(e)
    }
}
