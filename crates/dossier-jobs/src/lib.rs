//! # dossier-jobs
//!
//! Processing orchestration for dossier.
//!
//! This crate provides:
//! - The extraction/analysis state machine over source records
//! - A bounded background worker for large uploads
//! - Session-local progress tracking with a broadcast stream
//! - Explicit retry of failed uploads
//! - The [`IngestionService`] facade tying these together
//!
//! ## Example
//!
//! ```ignore
//! use dossier_jobs::{Collaborators, IngestionService, PipelineConfig, WorkerConfig};
//!
//! let (service, worker) = IngestionService::start(
//!     collaborators,
//!     PipelineConfig::from_env(),
//!     WorkerConfig::from_env(),
//! );
//!
//! let result = service.upload_file("session-1", upload, &token).await;
//!
//! // Graceful shutdown
//! worker.shutdown().await?;
//! ```

pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod worker;

// Re-export core types
pub use dossier_core::*;

pub use orchestrator::{stage_failure_retryable, JobInput, ProcessingJob, ProcessingOrchestrator};
pub use pipeline::{Collaborators, FileUpload, IdentityRequest, IngestionService, PipelineConfig};
pub use progress::{ProgressKey, ProgressReporter, TickerGuard};
pub use retry::{RetryCoordinator, RetryPlan, StashedInput, StashedUpload};
pub use worker::{JobQueue, ProcessingWorker, WorkerConfig, WorkerEvent, WorkerHandle};
