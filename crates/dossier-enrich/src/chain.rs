//! Ordered provider fallback.
//!
//! Providers run sequentially in priority order; a later provider is only
//! attempted after the previous one has definitively failed. Exhausting the
//! real providers is logged and absorbed by the placeholder, so
//! [`EnrichmentChain::run`] always yields a usable profile.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use dossier_core::{
    defaults, EnrichmentProvider, EnrichmentResult, Error, ProfileData, ProfileHints,
};

use crate::lookup::{LookupConfig, LookupProvider};
use crate::oauth::{OAuthProfileConfig, OAuthProfileProvider};
use crate::placeholder::PlaceholderProvider;

/// Successful result of a chain run, plus every attempt made on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentOutcome {
    pub profile: ProfileData,
    /// Name of the provider that supplied `profile`.
    pub data_source: String,
    pub likelihood_score: Option<f32>,
    /// Results of every provider tried, including the winner.
    pub attempts: Vec<EnrichmentResult>,
}

impl EnrichmentOutcome {
    /// Whether the placeholder supplied the profile.
    pub fn used_placeholder(&self) -> bool {
        self.data_source == defaults::PLACEHOLDER_PROVIDER
    }

    /// Collapse into the winning provider's result. Always `success = true`.
    pub fn to_result(&self) -> EnrichmentResult {
        EnrichmentResult::found(
            self.data_source.clone(),
            self.profile.clone(),
            self.likelihood_score,
        )
    }
}

pub struct EnrichmentChain {
    providers: Vec<Arc<dyn EnrichmentProvider>>,
    placeholder: PlaceholderProvider,
    provider_timeout: Duration,
}

impl EnrichmentChain {
    /// Chain over `providers` in the given order, backed by the placeholder.
    pub fn new(providers: Vec<Arc<dyn EnrichmentProvider>>) -> Self {
        Self {
            providers,
            placeholder: PlaceholderProvider::new(),
            provider_timeout: Duration::from_secs(defaults::ENRICHMENT_TIMEOUT_SECS),
        }
    }

    /// OAuth profile first, then the lookup API when configured.
    pub fn from_env() -> dossier_core::Result<Self> {
        let mut providers: Vec<Arc<dyn EnrichmentProvider>> = vec![Arc::new(
            OAuthProfileProvider::new(OAuthProfileConfig::from_env())?,
        )];
        match LookupConfig::from_env() {
            Some(config) => providers.push(Arc::new(LookupProvider::new(config)?)),
            None => info!(
                subsystem = "enrich",
                component = "chain",
                "ENRICHMENT_API_URL/ENRICHMENT_API_KEY not set, lookup provider disabled"
            ),
        }
        Ok(Self::new(providers))
    }

    /// Upper bound for each provider call. A timeout counts as a retryable failure.
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Provider names in priority order, placeholder last.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.name().to_string())
            .chain(std::iter::once(defaults::PLACEHOLDER_PROVIDER.to_string()))
            .collect()
    }

    async fn attempt(&self, provider: &Arc<dyn EnrichmentProvider>, hints: &ProfileHints) -> EnrichmentResult {
        match tokio::time::timeout(self.provider_timeout, provider.fetch(hints)).await {
            Ok(result) => result,
            Err(_) => EnrichmentResult::failed(
                provider.name(),
                Error::timeout(
                    format!("enrichment via {}", provider.name()),
                    self.provider_timeout.as_secs(),
                )
                .to_string(),
                true,
            ),
        }
    }

    /// Run providers in order until one succeeds.
    #[instrument(skip(self, hints), fields(subsystem = "enrich", component = "chain", op = "run"))]
    pub async fn run(&self, hints: &ProfileHints) -> EnrichmentOutcome {
        let mut attempts = Vec::with_capacity(self.providers.len() + 1);

        for provider in &self.providers {
            let start = Instant::now();
            let result = self.attempt(provider, hints).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            if result.success {
                if let Some(profile) = result.data.clone() {
                    info!(
                        provider = provider.name(),
                        likelihood = result.likelihood_score,
                        duration_ms,
                        "Enrichment succeeded"
                    );
                    let likelihood_score = result.likelihood_score;
                    attempts.push(result);
                    return EnrichmentOutcome {
                        profile,
                        data_source: provider.name().to_string(),
                        likelihood_score,
                        attempts,
                    };
                }
            }

            warn!(
                provider = provider.name(),
                error = result.error.as_deref().unwrap_or("no data"),
                retryable = result.retryable,
                duration_ms,
                "Enrichment provider failed, trying next"
            );
            attempts.push(result);
        }

        let exhausted = Error::ProviderExhausted(
            attempts
                .iter()
                .map(|a| a.provider_used.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        );
        warn!(error = %exhausted, "Falling back to placeholder profile");

        let profile = self.placeholder.build(hints);
        debug!(full_name = %profile.full_name, "Placeholder profile built");
        attempts.push(EnrichmentResult::found(
            defaults::PLACEHOLDER_PROVIDER,
            profile.clone(),
            None,
        ));

        EnrichmentOutcome {
            profile,
            data_source: defaults::PLACEHOLDER_PROVIDER.to_string(),
            likelihood_score: None,
            attempts,
        }
    }
}
