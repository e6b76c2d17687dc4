//! Deterministic last-resort provider.

use async_trait::async_trait;
use tracing::debug;

use dossier_core::{defaults, EnrichmentProvider, EnrichmentResult, ProfileData, ProfileHints};

/// Builds a minimal profile from the hints alone. Never fails.
#[derive(Debug, Default, Clone)]
pub struct PlaceholderProvider;

impl PlaceholderProvider {
    pub fn new() -> Self {
        Self
    }

    /// Derive a minimal profile. The same hints always give the same profile.
    pub fn build(&self, hints: &ProfileHints) -> ProfileData {
        let full_name = hints
            .full_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| name_from_profile_url(&hints.profile_url))
            .unwrap_or_else(|| "Unknown Candidate".to_string());

        ProfileData {
            full_name,
            headline: hints
                .company
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .map(|c| format!("Professional at {}", c.trim())),
            profile_url: hints.profile_url.clone(),
            ..Default::default()
        }
    }
}

/// "https://www.linkedin.com/in/ada-lovelace-1a2b3c/" -> "Ada Lovelace".
///
/// Trailing slug segments containing digits are treated as disambiguators
/// and dropped.
pub fn name_from_profile_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let slug = path.trim_end_matches('/').rsplit('/').next()?;
    if slug.is_empty()
        || slug.contains([':', '.'])
        || slug.contains(char::is_whitespace)
        || matches!(slug, "in" | "pub")
    {
        return None;
    }

    let words: Vec<String> = slug
        .split(['-', '_'])
        .filter(|w| !w.is_empty() && !w.chars().any(|c| c.is_ascii_digit()))
        .map(capitalize)
        .collect();

    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl EnrichmentProvider for PlaceholderProvider {
    fn name(&self) -> &str {
        defaults::PLACEHOLDER_PROVIDER
    }

    async fn fetch(&self, hints: &ProfileHints) -> EnrichmentResult {
        let profile = self.build(hints);
        debug!(provider = self.name(), full_name = %profile.full_name, "Placeholder profile built");
        EnrichmentResult::found(self.name(), profile, None)
    }
}
