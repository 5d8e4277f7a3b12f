// =============================================================================
// CONTENT CLASSIFICATION
// =============================================================================

/// Blocks longer than this (in chars) default to collapsed
pub const COLLAPSE_THRESHOLD_CHARS: usize = 1_200;

/// Deepest mind-map nesting accepted from structured input
pub const MIND_MAP_MAX_DEPTH: usize = 32;

/// Title used when a recovered outline has several top-level entries
pub const MIND_MAP_DEFAULT_ROOT: &str = "Mind Map";

// =============================================================================
// STREAMING
// =============================================================================

/// Malformed frames are logged truncated to this many chars
pub const MAX_FRAME_LOG_CHARS: usize = 200;

/// SSE payload prefix
pub const SSE_DATA_PREFIX: &str = "data:";

/// OpenAI-style end-of-stream sentinel
pub const SSE_DONE_SENTINEL: &str = "[DONE]";

// =============================================================================
// RETRIES
// =============================================================================

/// Manual regeneration stays available while a message's retry count is below this
pub const MANUAL_RETRY_LIMIT: u32 = 3;

/// Default automatic retry budget per send
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the second attempt (milliseconds)
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;

/// Backoff delay cap (milliseconds)
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// A live stream with no signal for this long is treated as stalled
pub const DEFAULT_STALL_TIMEOUT_MS: u64 = 120_000;

// =============================================================================
// WORKSPACE
// =============================================================================

/// Agent name used when the agent id is unknown
pub const DEFAULT_AGENT_NAME: &str = "Assistant";

/// Workspace document titles are cut to this many chars
pub const WORKSPACE_TITLE_MAX_CHARS: usize = 60;

// =============================================================================
// PERSISTENCE
// =============================================================================

/// Default directory for persisted state
pub const STORE_DIR: &str = ".storyloom";

/// Branch snapshots, one YAML file per branch key
pub const BRANCHES_DIR: &str = "branches";

/// Error logs
pub const ERRORS_DIR: &str = "errors";

/// Workspace documents
pub const WORKSPACE_DIR: &str = "workspace";
