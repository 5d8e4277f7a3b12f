pub mod message;

pub use message::{BillingInfo, EventRecord, Message, MessageMetadata, MessageRole, MessageStatus, ProgressInfo};
