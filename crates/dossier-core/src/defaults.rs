//! Centralized default constants for the dossier system.
//!
//! **This module is the single source of truth** for all shared default values.
//! All crates should reference these constants instead of defining their own
//! magic numbers. Runtime overrides are read by the `from_env()` constructors
//! of the individual config structs.

// =============================================================================
// UPLOAD LIMITS
// =============================================================================

/// Maximum accepted upload size in bytes (5 MiB).
pub const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum accepted manual text input in bytes.
pub const MAX_MANUAL_TEXT_BYTES: u64 = 512 * 1024;

/// Uploads smaller than this are processed before the upload call returns;
/// larger ones are handed to the background worker.
pub const IMMEDIATE_PROCESSING_THRESHOLD: u64 = 1024 * 1024;

/// File name used for manual text submissions.
pub const MANUAL_TEXT_FILE_NAME: &str = "manual-input.txt";

/// File name used for stored identity profiles.
pub const IDENTITY_FILE_NAME: &str = "identity-profile.json";

// =============================================================================
// COLLABORATOR TIMEOUTS
// =============================================================================

/// Timeout for object store transfers (seconds).
pub const STORAGE_TIMEOUT_SECS: u64 = 30;

/// Timeout for a text extraction call (seconds).
pub const EXTRACTION_TIMEOUT_SECS: u64 = 60;

/// Timeout for an LLM analysis call (seconds).
pub const ANALYSIS_TIMEOUT_SECS: u64 = 120;

/// Timeout for a single enrichment provider call (seconds).
pub const ENRICHMENT_TIMEOUT_SECS: u64 = 15;

/// Calls slower than this are logged with `slow = true` (milliseconds).
pub const SLOW_CALL_MS: u64 = 10_000;

// =============================================================================
// BACKGROUND WORKER
// =============================================================================

/// Maximum number of records processed concurrently in the background.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Capacity of the background processing queue.
pub const JOB_QUEUE_CAPACITY: usize = 128;

/// Upper bound for one background job, covering all of its stages (seconds).
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// Capacity of broadcast channels (worker events, progress events).
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// PROGRESS REPORTING
// =============================================================================

/// Interval between synthetic progress ticks (milliseconds).
pub const PROGRESS_TICK_MS: u64 = 500;

/// Percentage points added per synthetic tick.
pub const PROGRESS_TICK_STEP: u8 = 10;

/// Synthetic ticks never advance past this percentage.
pub const PROGRESS_SYNTHETIC_CEILING: u8 = 90;

/// Progress reported once the upload phase has stored the bytes.
pub const PROGRESS_UPLOADED: u8 = 30;

/// Progress reported once extraction has produced text.
pub const PROGRESS_EXTRACTED: u8 = 60;

// =============================================================================
// ENRICHMENT
// =============================================================================

/// Minimum likelihood score accepted from probabilistic enrichment.
pub const MIN_LIKELIHOOD: f32 = 0.6;

/// Provider id of the deterministic last-resort provider.
pub const PLACEHOLDER_PROVIDER: &str = "placeholder";

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Ollama endpoint.
pub const OLLAMA_URL: &str = "http://localhost:11434";

/// Default generation model used for analysis.
pub const GEN_MODEL: &str = "qwen3:8b";

/// Default text extraction service endpoint.
pub const EXTRACTION_URL: &str = "http://localhost:8090";

// =============================================================================
// DATABASE / PAGINATION
// =============================================================================

/// Default page size for record listings.
pub const PAGE_LIMIT: i64 = 50;

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;
