//! Core traits for dossier abstractions.
//!
//! Every external collaborator of the ingestion pipeline (database, object
//! store, text extraction, LLM analysis, enrichment providers) is consumed
//! through one of these traits so backends are pluggable and testable.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// SOURCE RECORD REPOSITORY
// =============================================================================

/// Persistence for [`SourceRecord`]s.
///
/// Exactly one writer is assumed per record; `update_status` is a
/// last-writer-wins patch with no concurrency token.
#[async_trait]
pub trait SourceRecordRepository: Send + Sync {
    /// Create a record at PENDING and return its id.
    async fn create(&self, record: NewSourceRecord) -> Result<Uuid>;

    /// Fetch a record by id.
    async fn get(&self, id: Uuid) -> Result<Option<SourceRecord>>;

    /// Apply a status patch and return the updated record.
    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<SourceRecord>;

    /// List an owner's records, newest first.
    async fn list_for_owner(&self, owner_id: &str, limit: i64) -> Result<Vec<SourceRecord>>;

    /// Most recent record of an owner with the given checksum.
    async fn find_by_checksum(&self, owner_id: &str, checksum: &str)
        -> Result<Option<SourceRecord>>;
}

// =============================================================================
// OBJECT STORE
// =============================================================================

/// Durable byte storage keyed by storage path.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes at `path` on behalf of the bearer of `token`.
    async fn put(&self, path: &str, data: &[u8], content_type: &str, token: &str) -> Result<()>;

    /// Read back the bytes stored at `path`.
    async fn get(&self, path: &str, token: &str) -> Result<Vec<u8>>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// =============================================================================
// PROCESSING COLLABORATORS
// =============================================================================

/// Text-Extraction collaborator: bytes in, plain text out.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract plain text from the document bytes.
    async fn extract(&self, data: &[u8], file_name: &str, mime_type: &str) -> Result<String>;

    /// Whether this extractor handles the given MIME type.
    fn supports(&self, _mime_type: &str) -> bool {
        true
    }

    /// Check if the backend is reachable.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Extractor name for logging.
    fn name(&self) -> &str;
}

/// LLM-Analysis collaborator: raw text in, structured fields out.
///
/// Implementations report a missing or misconfigured backend as
/// `Error::Config`, which the orchestrator persists as non-retryable.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Analyze extracted text into structured profile fields.
    async fn analyze(&self, text: &str) -> Result<JsonValue>;

    /// Check if the backend is reachable.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Model or backend name for logging.
    fn model_name(&self) -> &str;
}

// =============================================================================
// ENRICHMENT
// =============================================================================

/// A source of identity/profile data, tried in a fixed priority order.
///
/// Providers never return `Err`: every outcome, including transport
/// failures, is folded into an [`EnrichmentResult`] with `retryable` set.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Stable identifier recorded as the record's `data_source`.
    fn name(&self) -> &str;

    /// Attempt to fetch profile data for the given hints.
    async fn fetch(&self, hints: &ProfileHints) -> EnrichmentResult;
}
