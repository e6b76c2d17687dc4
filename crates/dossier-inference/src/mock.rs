//! Mock extraction and analysis backends for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dossier_inference::mock::{MockAnalysisBackend, MockExtractor, MockFailure};
//!
//! let extractor = MockExtractor::new().with_text("Jane Doe\nEngineer");
//! let analyzer = MockAnalysisBackend::new().failing_times(1, MockFailure::Transient);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use dossier_core::{AnalysisBackend, Error, Result, TextExtractor};

/// Kind of failure a mock should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Retryable transport failure.
    Transient,
    /// Missing or misconfigured backend.
    Misconfigured,
    /// Panic inside the call.
    Panic,
}

impl MockFailure {
    fn raise(self, what: &str) -> Error {
        match self {
            MockFailure::Transient => Error::Transport(format!("mock {} unavailable", what)),
            MockFailure::Misconfigured => Error::Config(format!("mock {} not configured", what)),
            MockFailure::Panic => panic!("mock {} panicked", what),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct FailurePlan {
    failure: Option<MockFailure>,
    /// `None` fails every call.
    times: Option<usize>,
}

impl FailurePlan {
    fn should_fail(&self, call_index: usize) -> Option<MockFailure> {
        let failure = self.failure?;
        match self.times {
            Some(n) if call_index >= n => None,
            _ => Some(failure),
        }
    }
}

// =============================================================================
// EXTRACTOR
// =============================================================================

/// Mock text extractor with configurable output, latency and failures.
#[derive(Clone)]
pub struct MockExtractor {
    text: String,
    latency: Duration,
    plan: FailurePlan,
    calls: Arc<AtomicUsize>,
    inputs: Arc<Mutex<Vec<String>>>,
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExtractor {
    pub fn new() -> Self {
        Self {
            text: "Mock extracted text".to_string(),
            latency: Duration::ZERO,
            plan: FailurePlan::default(),
            calls: Arc::new(AtomicUsize::new(0)),
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every call.
    pub fn failing(mut self, failure: MockFailure) -> Self {
        self.plan = FailurePlan {
            failure: Some(failure),
            times: None,
        };
        self
    }

    /// Fail the first `n` calls, then succeed.
    pub fn failing_times(mut self, n: usize, failure: MockFailure) -> Self {
        self.plan = FailurePlan {
            failure: Some(failure),
            times: Some(n),
        };
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// File names passed to `extract`, in call order.
    pub fn seen_files(&self) -> Vec<String> {
        self.inputs.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TextExtractor for MockExtractor {
    async fn extract(&self, _data: &[u8], file_name: &str, _mime_type: &str) -> Result<String> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push(file_name.to_string());
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(failure) = self.plan.should_fail(index) {
            return Err(failure.raise("extractor"));
        }
        Ok(self.text.clone())
    }

    fn name(&self) -> &str {
        "mock_extractor"
    }
}

// =============================================================================
// ANALYSIS
// =============================================================================

/// Mock analysis backend with configurable output, latency and failures.
#[derive(Clone)]
pub struct MockAnalysisBackend {
    response: JsonValue,
    latency: Duration,
    plan: FailurePlan,
    calls: Arc<AtomicUsize>,
    texts: Arc<Mutex<Vec<String>>>,
}

impl Default for MockAnalysisBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAnalysisBackend {
    pub fn new() -> Self {
        Self {
            response: json!({
                "fullName": "Mock Candidate",
                "skills": ["testing"],
                "experience": [],
                "education": []
            }),
            latency: Duration::ZERO,
            plan: FailurePlan::default(),
            calls: Arc::new(AtomicUsize::new(0)),
            texts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_response(mut self, response: JsonValue) -> Self {
        self.response = response;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing(mut self, failure: MockFailure) -> Self {
        self.plan = FailurePlan {
            failure: Some(failure),
            times: None,
        };
        self
    }

    pub fn failing_times(mut self, n: usize, failure: MockFailure) -> Self {
        self.plan = FailurePlan {
            failure: Some(failure),
            times: Some(n),
        };
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Texts passed to `analyze`, in call order.
    pub fn seen_texts(&self) -> Vec<String> {
        self.texts.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AnalysisBackend for MockAnalysisBackend {
    async fn analyze(&self, text: &str) -> Result<JsonValue> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut texts) = self.texts.lock() {
            texts.push(text.to_string());
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(failure) = self.plan.should_fail(index) {
            return Err(failure.raise("analysis"));
        }
        Ok(self.response.clone())
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}
