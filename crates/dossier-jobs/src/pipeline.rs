//! Ingestion entry points.
//!
//! [`IngestionService`] ties the pieces together:
//!
//! ```text
//! validate -> checksum/path -> store bytes -> create record (PENDING)
//!          -> small: process inline and return the terminal record
//!          -> large: queue for the worker and return PENDING
//! ```
//!
//! Identity connections take a separate route through the enrichment chain
//! and end in the same record shape.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use dossier_core::{
    defaults, validation::MIME_TXT, AnalysisBackend, Error, FileValidator, NewSourceRecord,
    ObjectStore, ProcessingStage, ProcessingStatus, ProfileHints, ProgressEntry, ProgressEvent,
    Result, SourceCategory, SourceRecord, SourceRecordRepository, TextExtractor, UploadResult,
};
use dossier_db::{compute_checksum, StoragePathBuilder, StorageUploader};
use dossier_enrich::EnrichmentChain;

use crate::orchestrator::{JobInput, ProcessingJob, ProcessingOrchestrator};
use crate::progress::{ProgressKey, ProgressReporter};
use crate::retry::{RetryCoordinator, RetryPlan, StashedInput, StashedUpload};
use crate::worker::{JobQueue, ProcessingWorker, WorkerConfig, WorkerHandle};

const IDENTITY_MIME: &str = "application/json";

/// Pipeline behaviour switches.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Inputs smaller than this are processed before the upload call returns.
    pub immediate_threshold: u64,
    /// Reuse an existing non-failed record with the same checksum.
    pub dedup_uploads: bool,
    /// Add a random suffix to storage keys.
    pub unique_storage_paths: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            immediate_threshold: defaults::IMMEDIATE_PROCESSING_THRESHOLD,
            dedup_uploads: false,
            unique_storage_paths: true,
        }
    }
}

impl PipelineConfig {
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DOSSIER_IMMEDIATE_THRESHOLD_BYTES` | `1048576` | Inline processing cutoff |
    /// | `DOSSIER_DEDUP_UPLOADS` | `false` | Reuse records with identical content |
    /// | `DOSSIER_UNIQUE_STORAGE_PATHS` | `true` | Random suffix in storage keys |
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(threshold) = std::env::var("DOSSIER_IMMEDIATE_THRESHOLD_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.immediate_threshold = threshold;
        }
        if let Ok(v) = std::env::var("DOSSIER_DEDUP_UPLOADS") {
            config.dedup_uploads = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("DOSSIER_UNIQUE_STORAGE_PATHS") {
            config.unique_storage_paths = v != "false" && v != "0";
        }
        config
    }

    pub fn with_immediate_threshold(mut self, bytes: u64) -> Self {
        self.immediate_threshold = bytes;
        self
    }

    pub fn with_dedup(mut self, enabled: bool) -> Self {
        self.dedup_uploads = enabled;
        self
    }

    pub fn with_unique_storage_paths(mut self, enabled: bool) -> Self {
        self.unique_storage_paths = enabled;
        self
    }
}

/// A file upload.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub data: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
    pub owner_id: String,
    pub category: SourceCategory,
}

/// An identity connection request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityRequest {
    pub profile_url: String,
    pub owner_id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// OAuth access token for the identity provider, if the user connected one.
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
}

impl IdentityRequest {
    fn hints(&self) -> ProfileHints {
        ProfileHints {
            profile_url: self.profile_url.trim().to_string(),
            full_name: self.full_name.clone(),
            company: self.company.clone(),
            email: self.email.clone(),
            access_token: self.access_token.clone(),
        }
    }
}

/// Collaborators the pipeline runs against.
pub struct Collaborators {
    pub records: Arc<dyn SourceRecordRepository>,
    pub store: Arc<dyn ObjectStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub analyzer: Arc<dyn AnalysisBackend>,
    pub enrichment: EnrichmentChain,
}

/// Normalised input to the shared ingest path.
struct Ingest {
    owner_id: String,
    category: SourceCategory,
    file_name: String,
    mime_type: String,
    data: Vec<u8>,
    input: IngestInput,
}

enum IngestInput {
    File,
    Text(String),
}

#[derive(Clone)]
pub struct IngestionService {
    records: Arc<dyn SourceRecordRepository>,
    uploader: StorageUploader,
    validator: FileValidator,
    orchestrator: Arc<ProcessingOrchestrator>,
    queue: JobQueue,
    progress: ProgressReporter,
    retry: RetryCoordinator,
    enrichment: Arc<EnrichmentChain>,
    config: PipelineConfig,
}

impl IngestionService {
    /// Wire the pipeline and start its background worker.
    ///
    /// Keep the returned [`WorkerHandle`] alive for as long as the service is used.
    pub fn start(
        collaborators: Collaborators,
        config: PipelineConfig,
        worker_config: WorkerConfig,
    ) -> (Self, WorkerHandle) {
        let progress = ProgressReporter::default();
        let uploader = StorageUploader::new(collaborators.store);
        let orchestrator = Arc::new(ProcessingOrchestrator::new(
            collaborators.records.clone(),
            collaborators.extractor,
            collaborators.analyzer,
            uploader.clone(),
            progress.clone(),
        ));
        let worker = ProcessingWorker::new(orchestrator.clone(), worker_config).start();
        let retry = RetryCoordinator::new(collaborators.records.clone(), progress.clone());

        let service = Self {
            records: collaborators.records,
            uploader,
            validator: FileValidator::default(),
            orchestrator,
            queue: worker.queue(),
            progress,
            retry,
            enrichment: Arc::new(collaborators.enrichment),
            config,
        };
        (service, worker)
    }

    pub fn with_validator(mut self, validator: FileValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn validator(&self) -> &FileValidator {
        &self.validator
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Upload a document and process it (inline when small, queued otherwise).
    #[instrument(
        skip(self, upload, token),
        fields(subsystem = "jobs", component = "pipeline", op = "upload_file", owner_id = %upload.owner_id, category = %upload.category, byte_size = upload.data.len())
    )]
    pub async fn upload_file(&self, session_id: &str, upload: FileUpload, token: &str) -> UploadResult {
        let key = ProgressKey::new(session_id, Uuid::new_v4());
        self.progress.begin(&key, &upload.file_name).await;

        if let Err(e) = require_token(token) {
            return self.reject(&key, e).await;
        }
        let checked = self
            .validator
            .validate(&upload.file_name, &upload.mime_type, &upload.data, upload.category)
            .into_result();
        let validated = match checked {
            Ok(v) => v,
            Err(e) => return self.reject(&key, e).await,
        };

        let mime_type = validated.file_type.unwrap_or(upload.mime_type);
        self.ingest(
            &key,
            Ingest {
                owner_id: upload.owner_id,
                category: upload.category,
                file_name: upload.file_name,
                mime_type,
                data: upload.data,
                input: IngestInput::File,
            },
            token,
        )
        .await
    }

    /// Ingest typed text. Same pipeline, extraction skipped.
    #[instrument(
        skip(self, text, token),
        fields(subsystem = "jobs", component = "pipeline", op = "upload_manual_text", text_len = text.len())
    )]
    pub async fn upload_manual_text(
        &self,
        session_id: &str,
        text: &str,
        owner_id: &str,
        category: SourceCategory,
        token: &str,
    ) -> UploadResult {
        let key = ProgressKey::new(session_id, Uuid::new_v4());
        self.progress
            .begin(&key, defaults::MANUAL_TEXT_FILE_NAME)
            .await;

        if let Err(e) = require_token(token) {
            return self.reject(&key, e).await;
        }
        if let Err(e) = self.validator.validate_text(text).into_result() {
            return self.reject(&key, e).await;
        }

        self.ingest(
            &key,
            Ingest {
                owner_id: owner_id.to_string(),
                category,
                file_name: defaults::MANUAL_TEXT_FILE_NAME.to_string(),
                mime_type: MIME_TXT.to_string(),
                data: text.as_bytes().to_vec(),
                input: IngestInput::Text(text.to_string()),
            },
            token,
        )
        .await
    }

    /// Connect an identity profile through the enrichment chain.
    ///
    /// Enrichment itself cannot fail; only auth, URL validation and
    /// persistence can.
    #[instrument(
        skip(self, request, token),
        fields(subsystem = "jobs", component = "pipeline", op = "connect_identity", owner_id = %request.owner_id)
    )]
    pub async fn connect_identity(
        &self,
        session_id: &str,
        request: IdentityRequest,
        token: &str,
    ) -> UploadResult {
        let key = ProgressKey::new(session_id, Uuid::new_v4());
        self.progress
            .begin(&key, defaults::IDENTITY_FILE_NAME)
            .await;

        if let Err(e) = require_token(token) {
            return self.reject(&key, e).await;
        }
        if let Err(e) = self
            .validator
            .validate_profile_url(&request.profile_url)
            .into_result()
        {
            return self.reject(&key, e).await;
        }
        self.connect_validated(&key, request, token).await
    }

    async fn connect_validated(
        &self,
        key: &ProgressKey,
        request: IdentityRequest,
        token: &str,
    ) -> UploadResult {
        let _ticker = self.progress.start_ticker(key);
        let outcome = self.enrichment.run(&request.hints()).await;
        self.progress.advance(key, defaults::PROGRESS_UPLOADED).await;

        let data = match serde_json::to_vec(&outcome.profile) {
            Ok(data) => data,
            Err(e) => return self.reject(key, Error::Serialization(e.to_string())).await,
        };
        let stored = self
            .store_and_create(
                key,
                &request.owner_id,
                SourceCategory::Linkedin,
                defaults::IDENTITY_FILE_NAME,
                IDENTITY_MIME,
                &data,
                token,
            )
            .await;
        let record_id = match stored {
            Ok(id) => id,
            Err(e) => {
                if e.is_retryable() {
                    self.retry
                        .stash(
                            key,
                            StashedUpload {
                                owner_id: request.owner_id.clone(),
                                category: SourceCategory::Linkedin,
                                input: StashedInput::Identity(request),
                            },
                        )
                        .await;
                }
                return self.reject(key, e).await;
            }
        };

        match self
            .orchestrator
            .complete_identity(record_id, Some(key), &outcome)
            .await
        {
            Ok(record) => UploadResult::accepted(key.file_id, &record),
            Err(e) => self.fail_record(key, record_id, e).await,
        }
    }

    /// Shared path for files and text after validation.
    async fn ingest(&self, key: &ProgressKey, ingest: Ingest, token: &str) -> UploadResult {
        let checksum = compute_checksum(&ingest.data);

        if self.config.dedup_uploads {
            match self
                .records
                .find_by_checksum(&ingest.owner_id, &checksum)
                .await
            {
                Ok(Some(existing)) if existing.status != ProcessingStatus::Failed => {
                    debug!(record_id = %existing.id, %checksum, "Duplicate upload, reusing record");
                    self.mirror(key, &existing).await;
                    return UploadResult::accepted(key.file_id, &existing);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Duplicate lookup failed, continuing with upload"),
            }
        }

        let upload_ticker = self.progress.start_ticker(key);
        let stored = self
            .store_and_create_with_checksum(
                key,
                &ingest.owner_id,
                ingest.category,
                &ingest.file_name,
                &ingest.mime_type,
                &ingest.data,
                &checksum,
                token,
            )
            .await;
        drop(upload_ticker);

        let record_id = match stored {
            Ok(id) => id,
            Err(e) => {
                if e.is_retryable() {
                    let input = match ingest.input {
                        IngestInput::Text(text) => StashedInput::Text(text),
                        IngestInput::File => StashedInput::File {
                            data: ingest.data,
                            file_name: ingest.file_name,
                            mime_type: ingest.mime_type,
                        },
                    };
                    self.retry
                        .stash(
                            key,
                            StashedUpload {
                                owner_id: ingest.owner_id,
                                category: ingest.category,
                                input,
                            },
                        )
                        .await;
                }
                return self.reject(key, e).await;
            }
        };

        let byte_size = ingest.data.len() as u64;
        let input = match ingest.input {
            IngestInput::Text(text) => JobInput::Text(text),
            IngestInput::File => JobInput::Bytes(ingest.data),
        };
        self.schedule(key, record_id, byte_size, input).await
    }

    /// Inline below the threshold, queued otherwise.
    async fn schedule(
        &self,
        key: &ProgressKey,
        record_id: Uuid,
        byte_size: u64,
        input: JobInput,
    ) -> UploadResult {
        let job = ProcessingJob::new(record_id, input).with_progress(key.clone());

        if byte_size < self.config.immediate_threshold {
            debug!(%record_id, byte_size, "Processing inline");
            return match self.orchestrator.process(job).await {
                Ok(record) => UploadResult::accepted(key.file_id, &record),
                Err(e) => self.fail_record(key, record_id, e).await,
            };
        }

        debug!(%record_id, byte_size, "Queueing for background processing");
        match self.queue.enqueue(job) {
            Ok(()) => UploadResult::queued(key.file_id, record_id),
            Err(e) => self.fail_record(key, record_id, e).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn store_and_create(
        &self,
        key: &ProgressKey,
        owner_id: &str,
        category: SourceCategory,
        file_name: &str,
        mime_type: &str,
        data: &[u8],
        token: &str,
    ) -> Result<Uuid> {
        let checksum = compute_checksum(data);
        self.store_and_create_with_checksum(
            key, owner_id, category, file_name, mime_type, data, &checksum, token,
        )
        .await
    }

    /// Store the bytes and create the PENDING record.
    #[allow(clippy::too_many_arguments)]
    async fn store_and_create_with_checksum(
        &self,
        key: &ProgressKey,
        owner_id: &str,
        category: SourceCategory,
        file_name: &str,
        mime_type: &str,
        data: &[u8],
        checksum: &str,
        token: &str,
    ) -> Result<Uuid> {
        let now = Utc::now();
        let path = if self.config.unique_storage_paths {
            StoragePathBuilder::build_unique(owner_id, file_name, now)
        } else {
            StoragePathBuilder::build(owner_id, file_name, now)
        };

        let storage_path = self.uploader.upload(data, &path, mime_type, token).await?;
        self.progress.advance(key, defaults::PROGRESS_UPLOADED).await;

        let record_id = self
            .records
            .create(NewSourceRecord {
                owner_id: owner_id.to_string(),
                category,
                file_name: file_name.to_string(),
                declared_mime_type: mime_type.to_string(),
                byte_size: data.len() as i64,
                checksum: checksum.to_string(),
                storage_path,
            })
            .await?;
        self.progress.attach_record(key, record_id).await;
        info!(%record_id, file_id = %key.file_id, "Source record created");
        Ok(record_id)
    }

    /// Re-drive a failed, retryable upload.
    #[instrument(skip(self, token), fields(subsystem = "jobs", component = "pipeline", op = "retry"))]
    pub async fn retry(&self, session_id: &str, file_id: Uuid, token: &str) -> UploadResult {
        if let Err(e) = require_token(token) {
            return UploadResult::rejected(file_id, &e);
        }
        let key = ProgressKey::new(session_id, file_id);
        let plan = match self.retry.plan(&key).await {
            Ok(plan) => plan,
            Err(e) => {
                info!(error = %e, "Retry rejected");
                return UploadResult::rejected(file_id, &e);
            }
        };

        match plan {
            RetryPlan::Reprocess {
                record_id,
                stage,
                byte_size,
            } => {
                let file_name = match self.records.get(record_id).await {
                    Ok(Some(record)) => record.file_name,
                    _ => record_id.to_string(),
                };
                self.progress.begin(&key, &file_name).await;
                self.progress.attach_record(&key, record_id).await;
                let input = match stage {
                    ProcessingStage::Extraction => JobInput::Stored {
                        token: token.to_string(),
                    },
                    ProcessingStage::Analysis => JobInput::PersistedText,
                };
                self.schedule(&key, record_id, byte_size.max(0) as u64, input)
                    .await
            }
            RetryPlan::Reupload(upload) => match upload.input {
                StashedInput::File {
                    data,
                    file_name,
                    mime_type,
                } => {
                    self.progress.begin(&key, &file_name).await;
                    self.ingest(
                        &key,
                        Ingest {
                            owner_id: upload.owner_id,
                            category: upload.category,
                            file_name,
                            mime_type,
                            data,
                            input: IngestInput::File,
                        },
                        token,
                    )
                    .await
                }
                StashedInput::Text(text) => {
                    self.progress
                        .begin(&key, defaults::MANUAL_TEXT_FILE_NAME)
                        .await;
                    self.ingest(
                        &key,
                        Ingest {
                            owner_id: upload.owner_id,
                            category: upload.category,
                            file_name: defaults::MANUAL_TEXT_FILE_NAME.to_string(),
                            mime_type: MIME_TXT.to_string(),
                            data: text.as_bytes().to_vec(),
                            input: IngestInput::Text(text),
                        },
                        token,
                    )
                    .await
                }
                StashedInput::Identity(request) => {
                    self.progress
                        .begin(&key, defaults::IDENTITY_FILE_NAME)
                        .await;
                    self.connect_validated(&key, request, token).await
                }
            },
        }
    }

    pub async fn get_record(&self, id: Uuid) -> Result<Option<SourceRecord>> {
        self.records.get(id).await
    }

    pub async fn list_records(&self, owner_id: &str, limit: i64) -> Result<Vec<SourceRecord>> {
        self.records.list_for_owner(owner_id, limit.clamp(1, 500)).await
    }

    pub async fn progress_entries(&self, session_id: &str) -> Vec<ProgressEntry> {
        self.progress.entries(session_id).await
    }

    pub fn subscribe_progress(&self) -> tokio::sync::broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Drop a session's progress entries and stashed inputs.
    pub async fn end_session(&self, session_id: &str) {
        self.retry.forget_session(session_id).await;
        self.progress.end_session(session_id).await;
    }

    async fn reject(&self, key: &ProgressKey, err: Error) -> UploadResult {
        info!(file_id = %key.file_id, code = err.code(), retryable = err.is_retryable(), error = %err, "Upload rejected");
        self.progress
            .fail(key, err.to_string(), err.is_retryable(), None)
            .await;
        UploadResult::rejected(key.file_id, &err)
    }

    /// Processing could not run or finish for an existing record.
    async fn fail_record(&self, key: &ProgressKey, record_id: Uuid, err: Error) -> UploadResult {
        let stage = self
            .orchestrator
            .stage_reached(record_id)
            .await
            .unwrap_or(ProcessingStage::Extraction);
        let retryable = err.is_retryable();
        match self
            .orchestrator
            .record_failure(record_id, Some(key), stage, &err.to_string(), retryable)
            .await
        {
            Ok(record) => UploadResult::accepted(key.file_id, &record),
            Err(_) => {
                let mut result = UploadResult::rejected(key.file_id, &err);
                result.record_id = Some(record_id);
                result
            }
        }
    }

    async fn mirror(&self, key: &ProgressKey, record: &SourceRecord) {
        self.progress.attach_record(key, record.id).await;
        match record.status {
            ProcessingStatus::Completed => {
                self.progress.complete(key, Some(record.id)).await;
            }
            ProcessingStatus::Failed => {
                self.progress
                    .fail(
                        key,
                        record.processing_error.clone().unwrap_or_default(),
                        record.retryable,
                        Some(record.id),
                    )
                    .await;
            }
            ProcessingStatus::Pending | ProcessingStatus::Processing => {
                self.progress.advance(key, defaults::PROGRESS_UPLOADED).await;
            }
        }
    }
}

fn require_token(token: &str) -> Result<()> {
    if token.trim().is_empty() {
        return Err(Error::Unauthorized("Missing bearer token".to_string()));
    }
    Ok(())
}
