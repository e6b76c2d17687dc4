//! Ollama analysis backend.
//!
//! Sends extracted text to `/api/chat` with `format: "json"` and parses the
//! reply into a JSON object of profile fields.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use dossier_core::{defaults, AnalysisBackend, Error, Result};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = defaults::OLLAMA_URL;

/// Default generation model.
pub const DEFAULT_GEN_MODEL: &str = defaults::GEN_MODEL;

/// Instruction given to the model for every analysis call.
pub const ANALYSIS_SYSTEM_PROMPT: &str = "You extract structured career information from documents. \
Reply with a single JSON object using these keys: \
\"fullName\" (string or null), \"headline\" (string or null), \"summary\" (string or null), \
\"skills\" (array of strings), \
\"experience\" (array of objects with \"title\", \"company\", \"startDate\", \"endDate\", \"highlights\"), \
\"education\" (array of objects with \"school\", \"degree\", \"fieldOfStudy\"), \
\"achievements\" (array of strings). \
Use only facts stated in the document. Use empty arrays when nothing applies.";

static FENCED_JSON: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").ok());

/// Parse a model reply into a JSON object.
///
/// Accepts bare JSON or JSON wrapped in a Markdown code fence. A reply that
/// is not an object is a retryable processing error: the next sample may
/// well be valid.
pub fn parse_analysis(content: &str) -> Result<JsonValue> {
    let trimmed = content.trim();
    let parsed = serde_json::from_str::<JsonValue>(trimmed).ok().or_else(|| {
        FENCED_JSON
            .as_ref()
            .and_then(|re| re.captures(trimmed))
            .and_then(|caps| caps.get(1))
            .and_then(|m| serde_json::from_str::<JsonValue>(m.as_str()).ok())
    });

    match parsed {
        Some(value @ JsonValue::Object(_)) => Ok(value),
        Some(_) => Err(Error::processing("Analysis reply was not a JSON object")),
        None => Err(Error::processing("Analysis reply was not valid JSON")),
    }
}

/// Ollama-backed [`AnalysisBackend`].
pub struct OllamaAnalyzer {
    client: Client,
    base_url: String,
    gen_model: String,
    timeout_secs: u64,
}

impl OllamaAnalyzer {
    /// Create a new analyzer against the given endpoint and model.
    pub fn with_config(base_url: String, gen_model: String, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "ollama",
            url = %base_url,
            model = %gen_model,
            "Initializing Ollama analyzer"
        );

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            gen_model,
            timeout_secs,
        })
    }

    /// Create from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `OLLAMA_BASE` | `http://localhost:11434` |
    /// | `OLLAMA_GEN_MODEL` | `qwen3:8b` |
    /// | `DOSSIER_ANALYSIS_TIMEOUT_SECS` | `120` |
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("OLLAMA_BASE").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string());
        let gen_model =
            std::env::var("OLLAMA_GEN_MODEL").unwrap_or_else(|_| DEFAULT_GEN_MODEL.to_string());
        let timeout_secs = std::env::var("DOSSIER_ANALYSIS_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::ANALYSIS_TIMEOUT_SECS);
        Self::with_config(base_url, gen_model, timeout_secs)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Map a failed `/api/chat` response onto the error taxonomy.
    ///
    /// A missing model is a configuration problem and must not be retried.
    fn classify_failure(&self, status: u16, body: &str) -> Error {
        let lower = body.to_lowercase();
        if status == 404 || (lower.contains("model") && lower.contains("not found")) {
            return Error::Config(format!(
                "Analysis model '{}' is not available: {}",
                self.gen_model, body
            ));
        }
        match Error::from_http_status(status, body) {
            Error::Request(msg) => Error::Processing {
                message: format!("Ollama rejected the request: {}", msg),
                retryable: false,
            },
            other => other,
        }
    }
}

/// Chat API message for `/api/chat`.
#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Request payload for the Ollama `/api/chat` endpoint.
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: JsonValue,
    /// Suppress chain-of-thought for models that support it.
    think: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[async_trait]
impl AnalysisBackend for OllamaAnalyzer {
    #[instrument(skip(self, text), fields(subsystem = "inference", component = "ollama", op = "analyze", model = %self.gen_model, text_len = text.len()))]
    async fn analyze(&self, text: &str) -> Result<JsonValue> {
        let start = Instant::now();

        let request = ChatRequest {
            model: self.gen_model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: ANALYSIS_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: text.to_string(),
                },
            ],
            stream: false,
            format: JsonValue::String("json".to_string()),
            think: false,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout("analysis", self.timeout_secs)
                } else {
                    Error::from(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(self.classify_failure(status, &body));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::processing(format!("Failed to parse Ollama response: {}", e)))?;

        let structured = parse_analysis(&result.message.content)?;
        let elapsed = start.elapsed().as_millis() as u64;
        debug!(duration_ms = elapsed, "Analysis complete");
        if elapsed > defaults::SLOW_CALL_MS {
            warn!(
                duration_ms = elapsed,
                text_len = text.len(),
                slow = true,
                "Slow analysis operation"
            );
        }
        Ok(structured)
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => Ok(true),
            Ok(resp) => {
                warn!(status = %resp.status(), "Ollama health check failed");
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "Ollama health check error");
                Ok(false)
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.gen_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn analyzer_for(server: &MockServer) -> OllamaAnalyzer {
        OllamaAnalyzer::with_config(server.uri(), "test-model".to_string(), 5).unwrap()
    }

    #[test]
    fn test_parse_bare_json() {
        let value = parse_analysis(r#"{"fullName": "Ada"}"#).unwrap();
        assert_eq!(value["fullName"], "Ada");
    }

    #[test]
    fn test_parse_fenced_json() {
        let reply = "Here you go:\n```json\n{\"skills\": [\"rust\"]}\n```";
        let value = parse_analysis(reply).unwrap();
        assert_eq!(value["skills"], json!(["rust"]));
    }

    #[test]
    fn test_parse_rejects_non_object() {
        let err = parse_analysis("[1, 2, 3]").unwrap_err();
        assert!(err.is_retryable());
        let err = parse_analysis("not json at all").unwrap_err();
        assert!(matches!(err, Error::Processing { .. }));
    }

    #[test]
    fn test_chat_request_serialization() {
        let request = ChatRequest {
            model: "m".to_string(),
            messages: vec![],
            stream: false,
            format: json!("json"),
            think: false,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["format"], "json");
        assert_eq!(value["stream"], false);
        assert_eq!(value["think"], false);
    }

    #[tokio::test]
    async fn test_analyze_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"model": "test-model", "format": "json"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "{\"fullName\": \"Ada Lovelace\", \"skills\": [\"math\"]}"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let value = analyzer_for(&server).analyze("Ada Lovelace, mathematician").await.unwrap();
        assert_eq!(value["fullName"], "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_missing_model_is_config_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_string(r#"{"error":"model \"test-model\" not found, try pulling it first"}"#),
            )
            .mount(&server)
            .await;

        let err = analyzer_for(&server).analyze("text").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = analyzer_for(&server).analyze("text").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
            .mount(&server)
            .await;

        assert!(analyzer_for(&server).health_check().await.unwrap());
    }

    #[test]
    fn test_model_name_accessor() {
        let analyzer =
            OllamaAnalyzer::with_config("http://localhost:1/".into(), "m1".into(), 1).unwrap();
        assert_eq!(analyzer.model_name(), "m1");
        assert_eq!(analyzer.base_url(), "http://localhost:1");
    }
}
