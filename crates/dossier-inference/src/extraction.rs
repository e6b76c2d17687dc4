//! Text extraction backends and the registry that dispatches between them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use dossier_core::{defaults, Error, Result, TextExtractor};

// =============================================================================
// PLAIN TEXT
// =============================================================================

/// Extractor for `text/*` content: decodes UTF-8 in-process.
#[derive(Debug, Default, Clone)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, data: &[u8], file_name: &str, _mime_type: &str) -> Result<String> {
        let text = String::from_utf8(data.to_vec()).map_err(|e| Error::Processing {
            message: format!("{} is not valid UTF-8: {}", file_name, e),
            retryable: false,
        })?;
        Ok(text)
    }

    fn supports(&self, mime_type: &str) -> bool {
        mime_type.starts_with("text/")
    }

    fn name(&self) -> &str {
        "plain_text"
    }
}

// =============================================================================
// HTTP EXTRACTION SERVICE
// =============================================================================

#[derive(Deserialize)]
struct ExtractResponse {
    text: String,
}

/// Client for a document-to-text extraction service.
///
/// `POST {base}/extract` with a multipart `file` part; the service replies
/// `{"text": "..."}`.
pub struct HttpTextExtractor {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

impl HttpTextExtractor {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_secs,
        })
    }

    /// Create from `EXTRACTION_URL` and `DOSSIER_EXTRACTION_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("EXTRACTION_URL")
            .unwrap_or_else(|_| defaults::EXTRACTION_URL.to_string());
        let timeout_secs = std::env::var("DOSSIER_EXTRACTION_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::EXTRACTION_TIMEOUT_SECS);
        Self::new(base_url, timeout_secs)
    }
}

#[async_trait]
impl TextExtractor for HttpTextExtractor {
    #[instrument(skip(self, data), fields(subsystem = "inference", component = "extraction", op = "extract", byte_size = data.len()))]
    async fn extract(&self, data: &[u8], file_name: &str, mime_type: &str) -> Result<String> {
        let start = Instant::now();
        let part = Part::bytes(data.to_vec())
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .map_err(|e| Error::InvalidInput(format!("Invalid MIME type {}: {}", mime_type, e)))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/extract", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout("text extraction", self.timeout_secs)
                } else {
                    Error::from(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_http_status(status, body));
        }

        let result: ExtractResponse = response
            .json()
            .await
            .map_err(|e| Error::processing(format!("Failed to parse extraction response: {}", e)))?;

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(duration_ms = elapsed, text_len = result.text.len(), "Extraction complete");
        if elapsed > defaults::SLOW_CALL_MS {
            warn!(duration_ms = elapsed, slow = true, "Slow extraction operation");
        }
        Ok(result.text)
    }

    async fn health_check(&self) -> Result<bool> {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(e) => {
                warn!(error = %e, "Extraction service health check error");
                Ok(false)
            }
        }
    }

    fn name(&self) -> &str {
        "http_extraction"
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Ordered list of extractors; the first one that supports a MIME type wins.
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Plain text handled in-process, everything else by the extraction service.
    pub fn from_env() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(PlainTextExtractor));
        registry.register(Arc::new(HttpTextExtractor::from_env()?));
        Ok(registry)
    }

    /// Append an extractor. Earlier registrations take precedence.
    pub fn register(&mut self, extractor: Arc<dyn TextExtractor>) {
        self.extractors.push(extractor);
    }

    /// Extractor that will handle the given MIME type.
    pub fn resolve(&self, mime_type: &str) -> Option<&Arc<dyn TextExtractor>> {
        self.extractors.iter().find(|e| e.supports(mime_type))
    }

    /// Names of registered extractors, in precedence order.
    pub fn names(&self) -> Vec<String> {
        self.extractors.iter().map(|e| e.name().to_string()).collect()
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextExtractor for ExtractorRegistry {
    async fn extract(&self, data: &[u8], file_name: &str, mime_type: &str) -> Result<String> {
        let extractor = self.resolve(mime_type).ok_or_else(|| {
            Error::Config(format!("No text extractor registered for {}", mime_type))
        })?;
        debug!(extractor = extractor.name(), mime_type, "Dispatching extraction");
        extractor.extract(data, file_name, mime_type).await
    }

    fn supports(&self, mime_type: &str) -> bool {
        self.resolve(mime_type).is_some()
    }

    async fn health_check(&self) -> Result<bool> {
        for extractor in &self.extractors {
            if !extractor.health_check().await.unwrap_or(false) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn name(&self) -> &str {
        "registry"
    }
}
