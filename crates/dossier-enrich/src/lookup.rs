//! Probabilistic enrichment lookup.
//!
//! Queries a person-enrichment API with name, company and profile URL hints.
//! The API answers with a likelihood score; matches below
//! [`defaults::MIN_LIKELIHOOD`] are treated as misses.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use dossier_core::{
    defaults, EnrichmentProvider, EnrichmentResult, Error, ProfileData, ProfileHints,
};

pub const PROVIDER_NAME: &str = "enrichment_lookup";

#[derive(Debug, Clone, PartialEq)]
pub struct LookupConfig {
    pub api_url: String,
    pub api_key: String,
    pub min_likelihood: f32,
    pub timeout_secs: u64,
}

impl LookupConfig {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            min_likelihood: defaults::MIN_LIKELIHOOD,
            timeout_secs: defaults::ENRICHMENT_TIMEOUT_SECS,
        }
    }

    /// Read `ENRICHMENT_API_URL`, `ENRICHMENT_API_KEY` and
    /// `DOSSIER_MIN_LIKELIHOOD`. `None` when URL or key is missing.
    pub fn from_env() -> Option<Self> {
        let api_url = std::env::var("ENRICHMENT_API_URL").ok()?;
        let api_key = std::env::var("ENRICHMENT_API_KEY").ok()?;
        let mut config = Self::new(api_url, api_key);
        if let Some(min) = std::env::var("DOSSIER_MIN_LIKELIHOOD")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.min_likelihood = min;
        }
        Some(config)
    }

    pub fn with_min_likelihood(mut self, min: f32) -> Self {
        self.min_likelihood = min;
        self
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    likelihood: f32,
    profile: ProfileData,
}

pub struct LookupProvider {
    client: Client,
    config: LookupConfig,
}

impl LookupProvider {
    pub fn new(config: LookupConfig) -> dossier_core::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn query(hints: &ProfileHints) -> Vec<(&'static str, String)> {
        let mut params = vec![("profile", hints.profile_url.clone())];
        if let Some(name) = &hints.full_name {
            params.push(("name", name.clone()));
        }
        if let Some(company) = &hints.company {
            params.push(("company", company.clone()));
        }
        if let Some(email) = &hints.email {
            params.push(("email", email.clone()));
        }
        params
    }

    async fn lookup(&self, hints: &ProfileHints) -> dossier_core::Result<Option<LookupResponse>> {
        let response = self
            .client
            .get(format!(
                "{}/v1/person/enrich",
                self.config.api_url.trim_end_matches('/')
            ))
            .header("X-Api-Key", &self.config.api_key)
            .query(&Self::query(hints))
            .send()
            .await?;

        let status = response.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_http_status(status, body));
        }
        Ok(Some(response.json().await?))
    }
}

#[async_trait]
impl EnrichmentProvider for LookupProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    #[instrument(skip(self, hints), fields(subsystem = "enrich", component = "lookup", op = "fetch"))]
    async fn fetch(&self, hints: &ProfileHints) -> EnrichmentResult {
        match self.lookup(hints).await {
            Ok(Some(found)) if found.likelihood >= self.config.min_likelihood => {
                debug!(likelihood = found.likelihood, "Enrichment match accepted");
                let mut profile = found.profile;
                if profile.profile_url.is_empty() {
                    profile.profile_url = hints.profile_url.clone();
                }
                EnrichmentResult::found(PROVIDER_NAME, profile, Some(found.likelihood))
            }
            Ok(Some(found)) => {
                debug!(
                    likelihood = found.likelihood,
                    min_likelihood = self.config.min_likelihood,
                    "Enrichment match below threshold"
                );
                let mut result = EnrichmentResult::failed(
                    PROVIDER_NAME,
                    format!("Match likelihood {:.2} below threshold", found.likelihood),
                    false,
                );
                result.likelihood_score = Some(found.likelihood);
                result
            }
            Ok(None) => EnrichmentResult::failed(PROVIDER_NAME, "No matching profile", false),
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "Enrichment lookup failed");
                EnrichmentResult::failed(PROVIDER_NAME, e.to_string(), e.is_retryable())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> LookupProvider {
        LookupProvider::new(LookupConfig::new(server.uri(), "key-1")).unwrap()
    }

    fn hints() -> ProfileHints {
        ProfileHints {
            profile_url: "https://www.linkedin.com/in/ada".to_string(),
            full_name: Some("Ada Lovelace".to_string()),
            company: Some("Engines Ltd".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_match_above_threshold() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/person/enrich"))
            .and(header("x-api-key", "key-1"))
            .and(query_param("name", "Ada Lovelace"))
            .and(query_param("company", "Engines Ltd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "likelihood": 0.9,
                "profile": {"fullName": "Ada Lovelace", "skills": ["math"], "profileUrl": ""}
            })))
            .mount(&server)
            .await;

        let result = provider_for(&server).fetch(&hints()).await;
        assert!(result.success);
        assert_eq!(result.likelihood_score, Some(0.9));
        let data = result.data.unwrap();
        assert_eq!(data.skills, vec!["math"]);
        assert_eq!(data.profile_url, "https://www.linkedin.com/in/ada");
    }

    #[tokio::test]
    async fn test_low_likelihood_is_a_miss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "likelihood": 0.2,
                "profile": {"fullName": "Someone Else", "profileUrl": ""}
            })))
            .mount(&server)
            .await;

        let result = provider_for(&server).fetch(&hints()).await;
        assert!(!result.success);
        assert!(!result.retryable);
        assert_eq!(result.likelihood_score, Some(0.2));
    }

    #[tokio::test]
    async fn test_not_found_is_a_miss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = provider_for(&server).fetch(&hints()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No matching profile"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let result = provider_for(&server).fetch(&hints()).await;
        assert!(!result.success);
        assert!(result.retryable);
    }
}
