pub mod constants;
pub mod content;
pub mod shared;
pub mod state;
