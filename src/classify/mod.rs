//! Content classification: raw tags to [`ContentType`](sl_base::content::ContentType),
//! events to [`ContentBlock`](sl_base::content::ContentBlock)s, and mind-map recovery.

pub mod block;
pub mod content_type;
pub mod mind_map;

pub use block::{block_from_value, is_collapsible, to_block};
pub use content_type::classify;
