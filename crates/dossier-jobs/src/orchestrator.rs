//! Extraction and analysis stages over a persisted source record.
//!
//! The orchestrator owns the processing state machine:
//!
//! ```text
//! PENDING -> PROCESSING -> COMPLETED
//!                       \-> FAILED -> (explicit retry) -> PENDING
//! ```
//!
//! Stage failures are persisted on the record and returned as `Ok` with a
//! FAILED record. `Err` is reserved for failures to persist state at all.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use dossier_core::{
    defaults, AnalysisBackend, Error, ProcessingStage, ProcessingStatus, Result, SourceRecord,
    SourceRecordRepository, StatusUpdate, TextExtractor,
};
use dossier_db::StorageUploader;
use dossier_enrich::EnrichmentOutcome;

use crate::progress::{ProgressKey, ProgressReporter};

/// Where the orchestrator gets its input from.
#[derive(Debug, Clone)]
pub enum JobInput {
    /// Uploaded bytes still in memory. Runs extraction.
    Bytes(Vec<u8>),
    /// User-supplied text. Extraction is skipped.
    Text(String),
    /// Re-read the stored object, then run extraction.
    Stored { token: String },
    /// Analysis only, over the record's persisted raw text.
    PersistedText,
}

impl JobInput {
    fn label(&self) -> &'static str {
        match self {
            JobInput::Bytes(_) => "bytes",
            JobInput::Text(_) => "text",
            JobInput::Stored { .. } => "stored",
            JobInput::PersistedText => "persisted_text",
        }
    }
}

/// One unit of processing work for a record.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub record_id: Uuid,
    pub input: JobInput,
    /// Progress entry to mirror state into, if any.
    pub progress: Option<ProgressKey>,
}

impl ProcessingJob {
    pub fn new(record_id: Uuid, input: JobInput) -> Self {
        Self {
            record_id,
            input,
            progress: None,
        }
    }

    pub fn with_progress(mut self, key: ProgressKey) -> Self {
        self.progress = Some(key);
        self
    }
}

/// Whether a failed stage may be retried.
///
/// A missing or misconfigured backend will fail the same way again. Other
/// processing failures keep their own flag and everything else is transient.
pub fn stage_failure_retryable(err: &Error) -> bool {
    match err {
        Error::Config(_) => false,
        Error::Processing { retryable, .. } => *retryable,
        _ => true,
    }
}

pub struct ProcessingOrchestrator {
    repo: Arc<dyn SourceRecordRepository>,
    extractor: Arc<dyn TextExtractor>,
    analyzer: Arc<dyn AnalysisBackend>,
    uploader: StorageUploader,
    progress: ProgressReporter,
    extraction_timeout: Duration,
    analysis_timeout: Duration,
}

impl ProcessingOrchestrator {
    pub fn new(
        repo: Arc<dyn SourceRecordRepository>,
        extractor: Arc<dyn TextExtractor>,
        analyzer: Arc<dyn AnalysisBackend>,
        uploader: StorageUploader,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            repo,
            extractor,
            analyzer,
            uploader,
            progress,
            extraction_timeout: Duration::from_secs(defaults::EXTRACTION_TIMEOUT_SECS),
            analysis_timeout: Duration::from_secs(defaults::ANALYSIS_TIMEOUT_SECS),
        }
    }

    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    pub fn with_analysis_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_timeout = timeout;
        self
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    async fn load(&self, record_id: Uuid) -> Result<SourceRecord> {
        self.repo
            .get(record_id)
            .await?
            .ok_or(Error::SourceNotFound(record_id))
    }

    /// Run the stages `job.input` calls for and persist the outcome.
    #[instrument(
        skip(self, job),
        fields(subsystem = "jobs", component = "orchestrator", op = "process", record_id = %job.record_id, input = job.input.label())
    )]
    pub async fn process(&self, job: ProcessingJob) -> Result<SourceRecord> {
        let start = Instant::now();
        let record = self.load(job.record_id).await?;
        let record = self.repo.update_status(record.id, StatusUpdate::processing()).await?;
        let key = job.progress.as_ref();
        let _ticker = key.map(|k| self.progress.start_ticker(k));

        let (raw_text, persist) = match job.input {
            JobInput::Text(text) => (text, true),
            JobInput::PersistedText => match record.raw_text.clone() {
                Some(text) => (text, false),
                None => {
                    let err = Error::processing("No extracted text to analyze");
                    return self.fail(&record, key, ProcessingStage::Extraction, &err).await;
                }
            },
            JobInput::Bytes(data) => match self.extract(&record, &data).await {
                Ok(text) => (text, true),
                Err(e) => return self.fail(&record, key, ProcessingStage::Extraction, &e).await,
            },
            JobInput::Stored { token } => {
                let data = match self.uploader.download(&record.storage_path, &token).await {
                    Ok(data) => data,
                    Err(e) => {
                        // A missing object or a refused token fails the same way on every retry.
                        let retryable = e.is_retryable();
                        return self
                            .fail_with(&record, key, ProcessingStage::Extraction, &e, retryable)
                            .await;
                    }
                };
                match self.extract(&record, &data).await {
                    Ok(text) => (text, true),
                    Err(e) => return self.fail(&record, key, ProcessingStage::Extraction, &e).await,
                }
            }
        };

        if persist {
            if let Err(e) = self
                .repo
                .update_status(record.id, StatusUpdate::extracted(raw_text.clone()))
                .await
            {
                error!(record_id = %record.id, error = %e, "Failed to persist extracted text");
                return Err(e);
            }
        }

        if let Some(k) = key {
            self.progress.advance(k, defaults::PROGRESS_EXTRACTED).await;
        }

        let structured = match self.analyze(&raw_text).await {
            Ok(value) => value,
            Err(e) => return self.fail(&record, key, ProcessingStage::Analysis, &e).await,
        };

        let completed = self
            .repo
            .update_status(record.id, StatusUpdate::completed(structured))
            .await?;
        if let Some(k) = key {
            self.progress.complete(k, Some(completed.id)).await;
        }
        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            text_len = raw_text.len(),
            "Record processed"
        );
        Ok(completed)
    }

    async fn extract(&self, record: &SourceRecord, data: &[u8]) -> Result<String> {
        let start = Instant::now();
        let result = tokio::time::timeout(
            self.extraction_timeout,
            self.extractor
                .extract(data, &record.file_name, &record.declared_mime_type),
        )
        .await;
        let duration_ms = start.elapsed().as_millis() as u64;
        log_if_slow("extraction", duration_ms);

        let text = match result {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::timeout(
                    "text extraction",
                    self.extraction_timeout.as_secs(),
                ))
            }
        };
        debug!(
            extractor = self.extractor.name(),
            duration_ms,
            text_len = text.len(),
            "Extraction stage complete"
        );
        Ok(text)
    }

    async fn analyze(&self, text: &str) -> Result<serde_json::Value> {
        let start = Instant::now();
        let result = tokio::time::timeout(self.analysis_timeout, self.analyzer.analyze(text)).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        log_if_slow("analysis", duration_ms);
        match result {
            Ok(Ok(value)) => {
                debug!(model = self.analyzer.model_name(), duration_ms, "Analysis stage complete");
                Ok(value)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::timeout("analysis", self.analysis_timeout.as_secs())),
        }
    }

    async fn fail(
        &self,
        record: &SourceRecord,
        key: Option<&ProgressKey>,
        stage: ProcessingStage,
        err: &Error,
    ) -> Result<SourceRecord> {
        self.fail_with(record, key, stage, err, stage_failure_retryable(err))
            .await
    }

    async fn fail_with(
        &self,
        record: &SourceRecord,
        key: Option<&ProgressKey>,
        stage: ProcessingStage,
        err: &Error,
        retryable: bool,
    ) -> Result<SourceRecord> {
        warn!(
            record_id = %record.id,
            stage = stage.as_str(),
            error = %err,
            retryable,
            "Processing stage failed"
        );
        self.record_failure(record.id, key, stage, &err.to_string(), retryable)
            .await
    }

    /// Stage a record would resume at: analysis once raw text exists.
    pub async fn stage_reached(&self, record_id: Uuid) -> Option<ProcessingStage> {
        let record = self.repo.get(record_id).await.ok()??;
        Some(if record.raw_text.is_some() {
            ProcessingStage::Analysis
        } else {
            ProcessingStage::Extraction
        })
    }

    /// Persist a failure for a record whose processing did not finish.
    ///
    /// Used by stage failures and by the worker when a task panics, times
    /// out or is abandoned at shutdown. A PENDING record passes through
    /// PROCESSING first so the transition guard holds.
    pub async fn record_failure(
        &self,
        record_id: Uuid,
        key: Option<&ProgressKey>,
        stage: ProcessingStage,
        message: &str,
        retryable: bool,
    ) -> Result<SourceRecord> {
        let result = async {
            let record = self.load(record_id).await?;
            if record.status == ProcessingStatus::Pending {
                self.repo
                    .update_status(record_id, StatusUpdate::processing())
                    .await?;
            }
            self.repo
                .update_status(record_id, StatusUpdate::failed(stage, message, retryable))
                .await
        }
        .await;

        match result {
            Ok(record) => {
                if let Some(k) = key {
                    self.progress
                        .fail(k, message, retryable, Some(record_id))
                        .await;
                }
                Ok(record)
            }
            Err(e) => {
                error!(%record_id, error = %e, original_error = message, "Failed to record processing failure");
                if let Some(k) = key {
                    self.progress
                        .fail(k, message, retryable, Some(record_id))
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Persist an enrichment outcome on an identity record and complete it.
    ///
    /// Identity data is already structured, so neither stage collaborator runs.
    #[instrument(
        skip(self, key, outcome),
        fields(subsystem = "jobs", component = "orchestrator", op = "complete_identity", %record_id, provider = %outcome.data_source)
    )]
    pub async fn complete_identity(
        &self,
        record_id: Uuid,
        key: Option<&ProgressKey>,
        outcome: &EnrichmentOutcome,
    ) -> Result<SourceRecord> {
        self.repo
            .update_status(record_id, StatusUpdate::processing())
            .await?;
        self.repo
            .update_status(record_id, StatusUpdate::extracted(outcome.profile.to_text()))
            .await?;

        let mut structured = serde_json::to_value(&outcome.profile)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        if let Some(obj) = structured.as_object_mut() {
            obj.insert("dataSource".to_string(), json!(outcome.data_source));
            if let Some(score) = outcome.likelihood_score {
                obj.insert("likelihoodScore".to_string(), json!(score));
            }
        }

        let record = self
            .repo
            .update_status(
                record_id,
                StatusUpdate::completed(structured).with_data_source(outcome.data_source.clone()),
            )
            .await?;
        if let Some(k) = key {
            self.progress.complete(k, Some(record_id)).await;
        }
        info!(placeholder = outcome.used_placeholder(), "Identity record completed");
        Ok(record)
    }
}

fn log_if_slow(stage: &'static str, duration_ms: u64) {
    if duration_ms > defaults::SLOW_CALL_MS {
        warn!(stage, duration_ms, slow = true, "Slow collaborator call");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dossier_core::{NewSourceRecord, ObjectStore, ProgressStatus, SourceCategory};
    use dossier_db::{MemoryObjectStore, MemorySourceRecordRepository};
    use dossier_inference::mock::{MockAnalysisBackend, MockExtractor, MockFailure};

    struct Fixture {
        repo: Arc<MemorySourceRecordRepository>,
        store: Arc<MemoryObjectStore>,
        extractor: MockExtractor,
        analyzer: MockAnalysisBackend,
        progress: ProgressReporter,
    }

    impl Fixture {
        fn new(extractor: MockExtractor, analyzer: MockAnalysisBackend) -> Self {
            Self {
                repo: Arc::new(MemorySourceRecordRepository::new()),
                store: Arc::new(MemoryObjectStore::new()),
                extractor,
                analyzer,
                progress: ProgressReporter::default(),
            }
        }

        fn orchestrator(&self) -> ProcessingOrchestrator {
            ProcessingOrchestrator::new(
                self.repo.clone(),
                Arc::new(self.extractor.clone()),
                Arc::new(self.analyzer.clone()),
                StorageUploader::new(self.store.clone()),
                self.progress.clone(),
            )
        }

        async fn record(&self) -> Uuid {
            self.repo
                .create(NewSourceRecord {
                    owner_id: "user-1".to_string(),
                    category: SourceCategory::Resume,
                    file_name: "cv.pdf".to_string(),
                    declared_mime_type: "application/pdf".to_string(),
                    byte_size: 4,
                    checksum: "0".repeat(64),
                    storage_path: "user-1/2026/10/18/1_cv.pdf".to_string(),
                })
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_bytes_run_both_stages() {
        let fx = Fixture::new(
            MockExtractor::new().with_text("Ada Lovelace"),
            MockAnalysisBackend::new(),
        );
        let id = fx.record().await;
        let record = fx
            .orchestrator()
            .process(ProcessingJob::new(id, JobInput::Bytes(b"%PDF".to_vec())))
            .await
            .unwrap();

        assert_eq!(record.status, ProcessingStatus::Completed);
        assert_eq!(record.raw_text.as_deref(), Some("Ada Lovelace"));
        assert!(record.structured_data.is_some());
        assert!(record.processing_error.is_none());
        assert_eq!(fx.analyzer.seen_texts(), vec!["Ada Lovelace"]);
    }

    #[tokio::test]
    async fn test_text_input_skips_extraction() {
        let fx = Fixture::new(MockExtractor::new(), MockAnalysisBackend::new());
        let id = fx.record().await;
        let record = fx
            .orchestrator()
            .process(ProcessingJob::new(id, JobInput::Text("typed".to_string())))
            .await
            .unwrap();

        assert_eq!(record.status, ProcessingStatus::Completed);
        assert_eq!(fx.extractor.call_count(), 0);
        assert_eq!(record.raw_text.as_deref(), Some("typed"));
    }

    #[tokio::test]
    async fn test_extraction_failure_is_retryable() {
        let fx = Fixture::new(
            MockExtractor::new().failing(MockFailure::Transient),
            MockAnalysisBackend::new(),
        );
        let id = fx.record().await;
        let record = fx
            .orchestrator()
            .process(ProcessingJob::new(id, JobInput::Bytes(b"x".to_vec())))
            .await
            .unwrap();

        assert_eq!(record.status, ProcessingStatus::Failed);
        assert!(record.processing_error.is_some());
        assert!(record.retryable);
        assert_eq!(record.failed_stage, Some(ProcessingStage::Extraction));
        assert_eq!(fx.analyzer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_misconfigured_analysis_is_not_retryable() {
        let fx = Fixture::new(
            MockExtractor::new(),
            MockAnalysisBackend::new().failing(MockFailure::Misconfigured),
        );
        let id = fx.record().await;
        let record = fx
            .orchestrator()
            .process(ProcessingJob::new(id, JobInput::Bytes(b"x".to_vec())))
            .await
            .unwrap();

        assert_eq!(record.status, ProcessingStatus::Failed);
        assert!(!record.retryable);
        assert_eq!(record.failed_stage, Some(ProcessingStage::Analysis));
        assert_eq!(record.raw_text.as_deref(), Some("Mock extracted text"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_analysis_timeout_is_retryable_failure() {
        let fx = Fixture::new(
            MockExtractor::new(),
            MockAnalysisBackend::new().with_latency(Duration::from_secs(600)),
        );
        let id = fx.record().await;
        let record = fx
            .orchestrator()
            .with_analysis_timeout(Duration::from_secs(5))
            .process(ProcessingJob::new(id, JobInput::Bytes(b"x".to_vec())))
            .await
            .unwrap();

        assert_eq!(record.status, ProcessingStatus::Failed);
        assert!(record.retryable);
        assert!(record
            .processing_error
            .as_deref()
            .unwrap_or_default()
            .contains("Timed out"));
    }

    #[tokio::test]
    async fn test_stored_input_reads_back_bytes() {
        let fx = Fixture::new(MockExtractor::new(), MockAnalysisBackend::new());
        let id = fx.record().await;
        let record = fx.repo.get(id).await.unwrap().unwrap();
        fx.store
            .put(&record.storage_path, b"%PDF", "application/pdf", "tok")
            .await
            .unwrap();

        let done = fx
            .orchestrator()
            .process(ProcessingJob::new(
                id,
                JobInput::Stored {
                    token: "tok".to_string(),
                },
            ))
            .await
            .unwrap();
        assert_eq!(done.status, ProcessingStatus::Completed);
        assert_eq!(fx.extractor.seen_files(), vec!["cv.pdf"]);
    }

    #[tokio::test]
    async fn test_missing_stored_object_is_not_retryable() {
        let fx = Fixture::new(MockExtractor::new(), MockAnalysisBackend::new());
        let id = fx.record().await;

        let record = fx
            .orchestrator()
            .process(ProcessingJob::new(
                id,
                JobInput::Stored {
                    token: "tok".to_string(),
                },
            ))
            .await
            .unwrap();
        assert_eq!(record.status, ProcessingStatus::Failed);
        assert_eq!(record.failed_stage, Some(ProcessingStage::Extraction));
        assert!(!record.retryable);
        assert_eq!(fx.extractor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_completed_record_cannot_be_reprocessed() {
        let fx = Fixture::new(MockExtractor::new(), MockAnalysisBackend::new());
        let id = fx.record().await;
        let orchestrator = fx.orchestrator();
        orchestrator
            .process(ProcessingJob::new(id, JobInput::Text("a".to_string())))
            .await
            .unwrap();

        let err = orchestrator
            .process(ProcessingJob::new(id, JobInput::Text("b".to_string())))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_progress_mirrors_terminal_state() {
        let fx = Fixture::new(MockExtractor::new(), MockAnalysisBackend::new());
        let id = fx.record().await;
        let key = ProgressKey::new("s", Uuid::new_v4());
        fx.progress.begin(&key, "cv.pdf").await;

        fx.orchestrator()
            .process(ProcessingJob::new(id, JobInput::Bytes(b"x".to_vec())).with_progress(key.clone()))
            .await
            .unwrap();

        let entry = fx.progress.get(&key).await.unwrap();
        assert_eq!(entry.status, ProgressStatus::Completed);
        assert_eq!(entry.progress, 100);
        assert_eq!(entry.record_id, Some(id));
    }

    #[tokio::test]
    async fn test_record_failure_from_pending() {
        let fx = Fixture::new(MockExtractor::new(), MockAnalysisBackend::new());
        let id = fx.record().await;
        let record = fx
            .orchestrator()
            .record_failure(id, None, ProcessingStage::Extraction, "task panicked", true)
            .await
            .unwrap();
        assert_eq!(record.status, ProcessingStatus::Failed);
        assert!(record.is_retryable_failure());
    }

    #[test]
    fn test_stage_failure_retryable() {
        assert!(!stage_failure_retryable(&Error::Config("no model".into())));
        assert!(stage_failure_retryable(&Error::Transport("down".into())));
        assert!(stage_failure_retryable(&Error::timeout("analysis", 5)));
        assert!(!stage_failure_retryable(&Error::Processing {
            message: "bad utf-8".into(),
            retryable: false
        }));
    }
}
