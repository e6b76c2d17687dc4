//! # dossier-enrich
//!
//! Identity enrichment for dossier.
//!
//! Providers are tried in a fixed priority order and the first success wins.
//! When every real provider fails, the deterministic placeholder supplies a
//! minimal profile so identity enrichment never blocks onboarding.
//!
//! ```rust,ignore
//! use dossier_enrich::EnrichmentChain;
//!
//! let chain = EnrichmentChain::from_env()?;
//! let outcome = chain.run(&hints).await;
//! assert!(outcome.to_result().success);
//! ```

pub mod chain;
pub mod lookup;
pub mod oauth;
pub mod placeholder;

pub use chain::{EnrichmentChain, EnrichmentOutcome};
pub use lookup::{LookupConfig, LookupProvider};
pub use oauth::{OAuthProfileConfig, OAuthProfileProvider};
pub use placeholder::PlaceholderProvider;
