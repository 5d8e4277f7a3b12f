//! Streaming chat client core: retries, stream decoding, content
//! classification and the per-conversation message state machine.

pub mod classify;
pub mod config;
pub mod orchestrator;
pub mod persistence;
pub mod retry;
pub mod stream;
pub mod workspace;

pub use config::ClientConfig;
pub use orchestrator::{Orchestrator, OrchestratorError};
