//! OAuth-authenticated profile provider.
//!
//! Reads the member's own profile from the identity provider using the
//! access token obtained when the user connected their account.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use dossier_core::{
    defaults, EnrichmentProvider, EnrichmentResult, Error, ProfileData, ProfileHints,
    ProfilePosition,
};

pub const PROVIDER_NAME: &str = "oauth_profile";

/// Default identity provider API base.
pub const DEFAULT_OAUTH_API_URL: &str = "https://api.linkedin.com";

#[derive(Debug, Clone, PartialEq)]
pub struct OAuthProfileConfig {
    pub api_url: String,
    pub timeout_secs: u64,
}

impl Default for OAuthProfileConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_OAUTH_API_URL.to_string(),
            timeout_secs: defaults::ENRICHMENT_TIMEOUT_SECS,
        }
    }
}

impl OAuthProfileConfig {
    /// Read `DOSSIER_OAUTH_API_URL` and `DOSSIER_ENRICHMENT_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("DOSSIER_OAUTH_API_URL") {
            config.api_url = url;
        }
        if let Some(secs) = std::env::var("DOSSIER_ENRICHMENT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.timeout_secs = secs;
        }
        config
    }
}

/// OpenID userinfo claims plus the optional profile extensions we read.
#[derive(Debug, Deserialize)]
struct UserInfo {
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    #[serde(default)]
    headline: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    positions: Vec<UserPosition>,
}

#[derive(Debug, Deserialize)]
struct UserPosition {
    title: String,
    company: String,
    start_date: Option<String>,
    end_date: Option<String>,
}

impl UserInfo {
    fn full_name(&self) -> Option<String> {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return Some(name.trim().to_string());
        }
        let joined = [self.given_name.as_deref(), self.family_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        (!joined.trim().is_empty()).then(|| joined.trim().to_string())
    }
}

pub struct OAuthProfileProvider {
    client: Client,
    config: OAuthProfileConfig,
}

impl OAuthProfileProvider {
    pub fn new(config: OAuthProfileConfig) -> dossier_core::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    async fn fetch_profile(&self, token: &str, profile_url: &str) -> dossier_core::Result<ProfileData> {
        let response = self
            .client
            .get(format!(
                "{}/v2/userinfo",
                self.config.api_url.trim_end_matches('/')
            ))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_http_status(status, body));
        }

        let info: UserInfo = response.json().await?;
        let full_name = info
            .full_name()
            .ok_or_else(|| Error::processing("Identity provider returned no name"))?;

        Ok(ProfileData {
            full_name,
            headline: info.headline,
            location: info.location,
            summary: info.summary,
            positions: info
                .positions
                .into_iter()
                .map(|p| ProfilePosition {
                    title: p.title,
                    company: p.company,
                    start_date: p.start_date,
                    end_date: p.end_date,
                    description: None,
                })
                .collect(),
            profile_url: profile_url.to_string(),
            ..Default::default()
        })
    }
}

#[async_trait]
impl EnrichmentProvider for OAuthProfileProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    #[instrument(skip(self, hints), fields(subsystem = "enrich", component = "oauth", op = "fetch"))]
    async fn fetch(&self, hints: &ProfileHints) -> EnrichmentResult {
        let Some(token) = hints.access_token.as_deref().filter(|t| !t.is_empty()) else {
            debug!("No access token, skipping OAuth profile");
            return EnrichmentResult::failed(PROVIDER_NAME, "No access token provided", false);
        };

        match self.fetch_profile(token, &hints.profile_url).await {
            Ok(profile) => EnrichmentResult::found(PROVIDER_NAME, profile, None),
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "OAuth profile fetch failed");
                EnrichmentResult::failed(PROVIDER_NAME, e.to_string(), e.is_retryable())
            }
        }
    }
}
