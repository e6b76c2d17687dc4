//! HTTP handlers for dossier-api.

pub mod identity;
pub mod progress;
pub mod sources;
