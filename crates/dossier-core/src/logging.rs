//! Structured logging schema and field name constants for dossier.
//!
//! All crates use these names for structured `tracing` fields so log
//! aggregation can query by the same keys across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-tick progress, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "db", "storage", "inference", "enrich", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "orchestrator", "worker", "uploader", "ollama", "chain"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "upload_file", "extract", "analyze", "fetch"
pub const OPERATION: &str = "op";

/// Session the progress entry belongs to.
pub const SESSION_ID: &str = "session_id";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// SourceRecord UUID being operated on.
pub const RECORD_ID: &str = "record_id";

/// Session-local file id.
pub const FILE_ID: &str = "file_id";

/// Owning user id.
pub const OWNER_ID: &str = "owner_id";

/// Declared source category.
pub const CATEGORY: &str = "category";

/// Pipeline stage ("extraction", "analysis").
pub const STAGE: &str = "stage";

/// Object store key.
pub const STORAGE_PATH: &str = "storage_path";

/// Enrichment provider name.
pub const PROVIDER: &str = "provider";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Size of the payload in bytes.
pub const BYTE_SIZE: &str = "byte_size";

/// Length of extracted text.
pub const TEXT_LEN: &str = "text_len";

/// Probabilistic match score from an enrichment provider.
pub const LIKELIHOOD: &str = "likelihood";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Whether a failure may be retried.
pub const RETRYABLE: &str = "retryable";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";
