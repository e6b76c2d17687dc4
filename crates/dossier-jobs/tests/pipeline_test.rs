//! End-to-end tests for the ingestion pipeline.
//!
//! Everything runs in memory: the in-memory record repository and object
//! store, mock extraction/analysis backends, and an enrichment chain with
//! stub providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use dossier_core::{
    EnrichmentProvider, EnrichmentResult, Error, ObjectStore, ProcessingStage, ProcessingStatus,
    ProfileHints, ProgressStatus, Result, SourceCategory, SourceRecordRepository,
};
use dossier_db::{compute_checksum, MemoryObjectStore, MemorySourceRecordRepository};
use dossier_enrich::EnrichmentChain;
use dossier_inference::mock::{MockAnalysisBackend, MockExtractor, MockFailure};
use dossier_jobs::{
    Collaborators, FileUpload, IdentityRequest, IngestionService, PipelineConfig, WorkerConfig,
    WorkerEvent, WorkerHandle,
};

const SESSION: &str = "session-1";
const TOKEN: &str = "token-1";
const PDF: &[u8] = b"%PDF-1.7\n1 0 obj\n<<>>\nendobj\n";

/// Object store whose first `fail_first` writes fail with a transport error.
struct FlakyStore {
    inner: MemoryObjectStore,
    fail_first: usize,
    puts: AtomicUsize,
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put(&self, path: &str, data: &[u8], content_type: &str, token: &str) -> Result<()> {
        if self.puts.fetch_add(1, Ordering::SeqCst) < self.fail_first {
            return Err(Error::Transport("HTTP 503: storage unavailable".to_string()));
        }
        self.inner.put(path, data, content_type, token).await
    }

    async fn get(&self, path: &str, token: &str) -> Result<Vec<u8>> {
        self.inner.get(path, token).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

struct FailingProvider;

#[async_trait]
impl EnrichmentProvider for FailingProvider {
    fn name(&self) -> &str {
        "always_down"
    }

    async fn fetch(&self, _hints: &ProfileHints) -> EnrichmentResult {
        EnrichmentResult::failed("always_down", "service unavailable", true)
    }
}

struct Harness {
    service: IngestionService,
    worker: WorkerHandle,
    records: Arc<MemorySourceRecordRepository>,
    extractor: MockExtractor,
    analyzer: MockAnalysisBackend,
}

struct HarnessBuilder {
    extractor: MockExtractor,
    analyzer: MockAnalysisBackend,
    store: Arc<dyn ObjectStore>,
    config: PipelineConfig,
}

impl HarnessBuilder {
    fn new() -> Self {
        Self {
            extractor: MockExtractor::new().with_text("Ada Lovelace\nAnalyst"),
            analyzer: MockAnalysisBackend::new(),
            store: Arc::new(MemoryObjectStore::new()),
            config: PipelineConfig::default(),
        }
    }

    fn extractor(mut self, extractor: MockExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    fn analyzer(mut self, analyzer: MockAnalysisBackend) -> Self {
        self.analyzer = analyzer;
        self
    }

    fn store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = store;
        self
    }

    fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    fn build(self) -> Harness {
        let records = Arc::new(MemorySourceRecordRepository::new());
        let (service, worker) = IngestionService::start(
            Collaborators {
                records: records.clone(),
                store: self.store,
                extractor: Arc::new(self.extractor.clone()),
                analyzer: Arc::new(self.analyzer.clone()),
                enrichment: EnrichmentChain::new(vec![Arc::new(FailingProvider)]),
            },
            self.config,
            WorkerConfig::default().with_max_concurrent(2),
        );
        Harness {
            service,
            worker,
            records,
            extractor: self.extractor,
            analyzer: self.analyzer,
        }
    }
}

fn pdf_upload(category: SourceCategory) -> FileUpload {
    FileUpload {
        data: PDF.to_vec(),
        file_name: "cv.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
        owner_id: "user-1".to_string(),
        category,
    }
}

async fn wait_for_job(events: &mut broadcast::Receiver<WorkerEvent>, record_id: Uuid) -> WorkerEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("worker event stream closed");
            let finished = match &event {
                WorkerEvent::JobCompleted { record_id: id, .. }
                | WorkerEvent::JobFailed { record_id: id, .. } => *id == record_id,
                _ => false,
            };
            if finished {
                return event;
            }
        }
    })
    .await
    .expect("background job did not finish in time")
}

// ============================================================================
// VALIDATION AND AUTH
// ============================================================================

#[tokio::test]
async fn test_txt_resume_is_rejected_before_any_io() {
    let h = HarnessBuilder::new().build();
    let upload = FileUpload {
        data: vec![b'a'; 2048],
        file_name: "resume.txt".to_string(),
        mime_type: "text/plain".to_string(),
        owner_id: "user-1".to_string(),
        category: SourceCategory::Resume,
    };

    let result = h.service.upload_file(SESSION, upload, TOKEN).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Please upload a PDF or DOCX file."));
    assert_eq!(result.error_code.as_deref(), Some("INVALID_TYPE"));
    assert_eq!(result.retryable, Some(false));
    assert!(h.records.is_empty().await);
    assert_eq!(h.extractor.call_count(), 0);
}

#[tokio::test]
async fn test_oversized_pdf_is_rejected() {
    let h = HarnessBuilder::new().build();
    let mut data = PDF.to_vec();
    data.resize(6 * 1024 * 1024, 0);
    let upload = FileUpload {
        data,
        ..pdf_upload(SourceCategory::Resume)
    };

    let result = h.service.upload_file(SESSION, upload, TOKEN).await;
    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("File is too large. Please upload a file smaller than 5MB.")
    );
    assert_eq!(result.error_code.as_deref(), Some("FILE_TOO_LARGE"));
    assert!(h.records.is_empty().await);
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let h = HarnessBuilder::new().build();
    let result = h
        .service
        .upload_file(SESSION, pdf_upload(SourceCategory::Resume), "")
        .await;
    assert!(!result.success);
    assert_eq!(result.error_code.as_deref(), Some("UNAUTHORIZED"));
    assert_eq!(result.retryable, Some(false));
    assert!(h.records.is_empty().await);
}

// ============================================================================
// INLINE PROCESSING
// ============================================================================

#[tokio::test]
async fn test_small_upload_completes_inline() {
    let h = HarnessBuilder::new().build();
    let result = h
        .service
        .upload_file(SESSION, pdf_upload(SourceCategory::Resume), TOKEN)
        .await;

    assert!(result.success);
    assert_eq!(result.status, Some(ProcessingStatus::Completed));
    let record = h
        .service
        .get_record(result.record_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ProcessingStatus::Completed);
    assert!(record.structured_data.is_some());
    assert!(record.processing_error.is_none());
    assert_eq!(record.checksum, compute_checksum(PDF));
    assert!(record.storage_path.starts_with("user-1/"));
    assert!(record.storage_path.ends_with("_cv.pdf"));

    let entries = h.service.progress_entries(SESSION).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].file_id, result.file_id);
    assert_eq!(entries[0].status, ProgressStatus::Completed);
    assert_eq!(entries[0].progress, 100);
}

#[tokio::test]
async fn test_manual_text_skips_extraction() {
    let h = HarnessBuilder::new().build();
    let result = h
        .service
        .upload_manual_text(
            SESSION,
            "Ten years of analytical engines.",
            "user-1",
            SourceCategory::CoverLetter,
            TOKEN,
        )
        .await;

    assert!(result.success);
    assert_eq!(h.extractor.call_count(), 0);
    assert_eq!(h.analyzer.seen_texts(), vec!["Ten years of analytical engines."]);
    let record = h.records.get(result.record_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(record.file_name, "manual-input.txt");
    assert_eq!(record.status, ProcessingStatus::Completed);
}

#[tokio::test]
async fn test_empty_manual_text_is_rejected() {
    let h = HarnessBuilder::new().build();
    let result = h
        .service
        .upload_manual_text(SESSION, "   ", "user-1", SourceCategory::Resume, TOKEN)
        .await;
    assert!(!result.success);
    assert_eq!(result.error_code.as_deref(), Some("EMPTY_CONTENT"));
}

// ============================================================================
// FAILURE AND RETRY
// ============================================================================

#[tokio::test]
async fn test_extraction_failure_then_retry_reuses_record() {
    let h = HarnessBuilder::new()
        .extractor(MockExtractor::new().failing_times(1, MockFailure::Transient))
        .build();

    let first = h
        .service
        .upload_file(SESSION, pdf_upload(SourceCategory::Resume), TOKEN)
        .await;
    assert!(!first.success);
    assert_eq!(first.status, Some(ProcessingStatus::Failed));
    assert_eq!(first.retryable, Some(true));
    let record_id = first.record_id.unwrap();
    let failed = h.records.get(record_id).await.unwrap().unwrap();
    assert_eq!(failed.failed_stage, Some(ProcessingStage::Extraction));
    assert!(failed.processing_error.is_some());

    let retried = h.service.retry(SESSION, first.file_id, TOKEN).await;
    assert!(retried.success, "retry failed: {:?}", retried.error);
    assert_eq!(retried.record_id, Some(record_id));
    assert_eq!(retried.status, Some(ProcessingStatus::Completed));
    assert_eq!(h.records.len().await, 1);
    assert_eq!(h.extractor.call_count(), 2);
}

#[tokio::test]
async fn test_analysis_retry_reuses_extracted_text() {
    let h = HarnessBuilder::new()
        .analyzer(MockAnalysisBackend::new().failing_times(1, MockFailure::Transient))
        .build();

    let first = h
        .service
        .upload_file(SESSION, pdf_upload(SourceCategory::Resume), TOKEN)
        .await;
    assert_eq!(first.status, Some(ProcessingStatus::Failed));

    let retried = h.service.retry(SESSION, first.file_id, TOKEN).await;
    assert_eq!(retried.status, Some(ProcessingStatus::Completed));
    assert_eq!(h.extractor.call_count(), 1);
    assert_eq!(h.analyzer.call_count(), 2);
}

#[tokio::test]
async fn test_misconfigured_backend_cannot_be_retried() {
    let h = HarnessBuilder::new()
        .analyzer(MockAnalysisBackend::new().failing(MockFailure::Misconfigured))
        .build();

    let first = h
        .service
        .upload_file(SESSION, pdf_upload(SourceCategory::Resume), TOKEN)
        .await;
    assert_eq!(first.status, Some(ProcessingStatus::Failed));
    assert_eq!(first.retryable, Some(false));

    let retried = h.service.retry(SESSION, first.file_id, TOKEN).await;
    assert!(!retried.success);
    assert_eq!(retried.error_code.as_deref(), Some("NOT_RETRYABLE"));
    assert_eq!(h.analyzer.call_count(), 1);
}

#[tokio::test]
async fn test_storage_failure_is_replayed_from_stash() {
    let store = Arc::new(FlakyStore {
        inner: MemoryObjectStore::new(),
        fail_first: 1,
        puts: AtomicUsize::new(0),
    });
    let h = HarnessBuilder::new().store(store).build();

    let first = h
        .service
        .upload_file(SESSION, pdf_upload(SourceCategory::Resume), TOKEN)
        .await;
    assert!(!first.success);
    assert_eq!(first.retryable, Some(true));
    assert!(first.record_id.is_none());
    assert!(h.records.is_empty().await);

    let retried = h.service.retry(SESSION, first.file_id, TOKEN).await;
    assert!(retried.success);
    assert_eq!(retried.file_id, first.file_id);
    assert_eq!(retried.status, Some(ProcessingStatus::Completed));
    assert_eq!(h.records.len().await, 1);
}

// ============================================================================
// BACKGROUND PROCESSING
// ============================================================================

#[tokio::test]
async fn test_large_upload_is_processed_in_background() {
    let h = HarnessBuilder::new()
        .config(PipelineConfig::default().with_immediate_threshold(8))
        .build();
    let mut events = h.worker.events();

    let result = h
        .service
        .upload_file(SESSION, pdf_upload(SourceCategory::Resume), TOKEN)
        .await;
    assert!(result.success);
    assert_eq!(result.status, Some(ProcessingStatus::Pending));
    let record_id = result.record_id.unwrap();

    let event = wait_for_job(&mut events, record_id).await;
    assert_eq!(
        event,
        WorkerEvent::JobCompleted {
            record_id,
            status: ProcessingStatus::Completed
        }
    );
    let record = h.records.get(record_id).await.unwrap().unwrap();
    assert_eq!(record.status, ProcessingStatus::Completed);
}

#[tokio::test]
async fn test_background_panic_is_recorded_as_failure() {
    let h = HarnessBuilder::new()
        .analyzer(MockAnalysisBackend::new().failing_times(1, MockFailure::Panic))
        .config(PipelineConfig::default().with_immediate_threshold(8))
        .build();
    let mut events = h.worker.events();

    let first = h
        .service
        .upload_file(SESSION, pdf_upload(SourceCategory::Resume), TOKEN)
        .await;
    let record_id = first.record_id.unwrap();
    assert!(matches!(
        wait_for_job(&mut events, record_id).await,
        WorkerEvent::JobFailed { .. }
    ));
    let record = h.records.get(record_id).await.unwrap().unwrap();
    assert_eq!(record.status, ProcessingStatus::Failed);
    assert!(record.retryable);

    // The worker survives and keeps processing.
    let second = h
        .service
        .upload_file(SESSION, pdf_upload(SourceCategory::Resume), TOKEN)
        .await;
    let second_id = second.record_id.unwrap();
    wait_for_job(&mut events, second_id).await;
    let record = h.records.get(second_id).await.unwrap().unwrap();
    assert_eq!(record.status, ProcessingStatus::Completed);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_jobs() {
    let h = HarnessBuilder::new()
        .analyzer(MockAnalysisBackend::new().with_latency(Duration::from_millis(200)))
        .config(PipelineConfig::default().with_immediate_threshold(8))
        .build();

    let result = h
        .service
        .upload_file(SESSION, pdf_upload(SourceCategory::Resume), TOKEN)
        .await;
    let record_id = result.record_id.unwrap();
    // Let the worker pick the job up.
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.worker.shutdown().await.unwrap();
    let record = h.records.get(record_id).await.unwrap().unwrap();
    assert!(record.status.is_terminal(), "status was {}", record.status);
}

// ============================================================================
// IDENTITY AND DEDUP
// ============================================================================

#[tokio::test]
async fn test_identity_falls_back_to_placeholder() {
    let h = HarnessBuilder::new().build();
    let result = h
        .service
        .connect_identity(
            SESSION,
            IdentityRequest {
                profile_url: "https://www.linkedin.com/in/ada-lovelace".to_string(),
                owner_id: "user-1".to_string(),
                company: Some("Engines Ltd".to_string()),
                ..Default::default()
            },
            TOKEN,
        )
        .await;

    assert!(result.success);
    let record = h.records.get(result.record_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(record.status, ProcessingStatus::Completed);
    assert_eq!(record.category, SourceCategory::Linkedin);
    assert_eq!(record.data_source.as_deref(), Some("placeholder"));
    let data = record.structured_data.unwrap();
    assert_eq!(data["fullName"], "Ada Lovelace");
    assert_eq!(data["dataSource"], "placeholder");
    assert_eq!(h.analyzer.call_count(), 0);
}

#[tokio::test]
async fn test_identity_rejects_bad_url() {
    let h = HarnessBuilder::new().build();
    let result = h
        .service
        .connect_identity(
            SESSION,
            IdentityRequest {
                profile_url: "ftp://example.com/in/x".to_string(),
                owner_id: "user-1".to_string(),
                ..Default::default()
            },
            TOKEN,
        )
        .await;
    assert!(!result.success);
    assert_eq!(result.error_code.as_deref(), Some("INVALID_URL"));
    assert!(h.records.is_empty().await);
}

#[tokio::test]
async fn test_duplicates_create_new_records_by_default() {
    let h = HarnessBuilder::new().build();
    let a = h
        .service
        .upload_file(SESSION, pdf_upload(SourceCategory::Resume), TOKEN)
        .await;
    let b = h
        .service
        .upload_file(SESSION, pdf_upload(SourceCategory::Resume), TOKEN)
        .await;
    assert_ne!(a.record_id, b.record_id);
    let ra = h.records.get(a.record_id.unwrap()).await.unwrap().unwrap();
    let rb = h.records.get(b.record_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(ra.checksum, rb.checksum);
}

#[tokio::test]
async fn test_dedup_reuses_existing_record_when_enabled() {
    let h = HarnessBuilder::new()
        .config(PipelineConfig::default().with_dedup(true))
        .build();
    let a = h
        .service
        .upload_file(SESSION, pdf_upload(SourceCategory::Resume), TOKEN)
        .await;
    let b = h
        .service
        .upload_file(SESSION, pdf_upload(SourceCategory::Resume), TOKEN)
        .await;
    assert_eq!(a.record_id, b.record_id);
    assert_ne!(a.file_id, b.file_id);
    assert_eq!(h.records.len().await, 1);
    assert_eq!(h.extractor.call_count(), 1);
}

#[tokio::test]
async fn test_end_session_clears_progress() {
    let h = HarnessBuilder::new().build();
    h.service
        .upload_file(SESSION, pdf_upload(SourceCategory::Resume), TOKEN)
        .await;
    h.service.end_session(SESSION).await;
    assert!(h.service.progress_entries(SESSION).await.is_empty());
    // Persisted state is untouched.
    assert_eq!(h.service.list_records("user-1", 10).await.unwrap().len(), 1);
}
