//! Explicit retry of failed uploads.
//!
//! Retries only happen on caller request. A failure that produced a record
//! is re-driven against that same record id; a failure that happened before
//! any record existed re-runs the whole pipeline from a stashed copy of the
//! original input.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use dossier_core::{
    Error, ProcessingStage, ProgressStatus, Result, SourceCategory, SourceRecordRepository,
    StatusUpdate,
};

use crate::pipeline::IdentityRequest;
use crate::progress::{ProgressKey, ProgressReporter};

/// Input kept around so an upload that failed before persistence can be replayed.
#[derive(Debug, Clone)]
pub enum StashedInput {
    File {
        data: Vec<u8>,
        file_name: String,
        mime_type: String,
    },
    Text(String),
    Identity(IdentityRequest),
}

#[derive(Debug, Clone)]
pub struct StashedUpload {
    pub owner_id: String,
    pub category: SourceCategory,
    pub input: StashedInput,
}

/// What a retry should do.
#[derive(Debug, Clone)]
pub enum RetryPlan {
    /// Re-run processing from `stage` on an existing record, now reset to PENDING.
    Reprocess {
        record_id: Uuid,
        stage: ProcessingStage,
        byte_size: i64,
    },
    /// Replay the original upload from the start.
    Reupload(StashedUpload),
}

#[derive(Clone)]
pub struct RetryCoordinator {
    repo: Arc<dyn SourceRecordRepository>,
    progress: ProgressReporter,
    stash: Arc<RwLock<HashMap<ProgressKey, StashedUpload>>>,
}

impl RetryCoordinator {
    pub fn new(repo: Arc<dyn SourceRecordRepository>, progress: ProgressReporter) -> Self {
        Self {
            repo,
            progress,
            stash: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Keep `upload` so a retry of `key` can replay it.
    pub async fn stash(&self, key: &ProgressKey, upload: StashedUpload) {
        debug!(file_id = %key.file_id, "Upload input stashed for retry");
        self.stash.write().await.insert(key.clone(), upload);
    }

    pub async fn stashed_count(&self) -> usize {
        self.stash.read().await.len()
    }

    /// Drop stashed inputs belonging to a session.
    pub async fn forget_session(&self, session_id: &str) {
        self.stash
            .write()
            .await
            .retain(|key, _| key.session_id != session_id);
    }

    /// Validate a retry request and prepare the record for it.
    ///
    /// The progress entry must be FAILED and retryable. When a record exists
    /// it is checked too, since it is the ground truth, and then reset from
    /// FAILED to PENDING. The progress entry is discarded on success.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "retry", op = "plan", file_id = %key.file_id))]
    pub async fn plan(&self, key: &ProgressKey) -> Result<RetryPlan> {
        let entry = self
            .progress
            .get(key)
            .await
            .ok_or_else(|| Error::NotFound(format!("No upload with file id {}", key.file_id)))?;

        if entry.status != ProgressStatus::Failed {
            return Err(Error::NotRetryable(format!(
                "Upload {} has not failed",
                key.file_id
            )));
        }
        if entry.retryable != Some(true) {
            return Err(Error::NotRetryable(
                entry
                    .error
                    .unwrap_or_else(|| "Failure is not retryable".to_string()),
            ));
        }

        let plan = match entry.record_id {
            Some(record_id) => {
                let record = self
                    .repo
                    .get(record_id)
                    .await?
                    .ok_or(Error::SourceNotFound(record_id))?;
                if !record.is_retryable_failure() {
                    return Err(Error::NotRetryable(format!(
                        "Record {} is {} and cannot be retried",
                        record_id, record.status
                    )));
                }
                let stage = record.failed_stage.unwrap_or(ProcessingStage::Extraction);
                self.repo
                    .update_status(record_id, StatusUpdate::reset())
                    .await?;
                info!(%record_id, stage = stage.as_str(), "Record reset for retry");
                RetryPlan::Reprocess {
                    record_id,
                    stage,
                    byte_size: record.byte_size,
                }
            }
            None => {
                let upload = self.stash.write().await.remove(key).ok_or_else(|| {
                    Error::NotRetryable("Original upload is no longer available".to_string())
                })?;
                info!(owner_id = %upload.owner_id, "Replaying stashed upload");
                RetryPlan::Reupload(upload)
            }
        };

        self.progress.remove(key).await;
        Ok(plan)
    }
}
