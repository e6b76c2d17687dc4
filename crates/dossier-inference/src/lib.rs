//! # dossier-inference
//!
//! Text extraction and LLM analysis backends for dossier.
//!
//! This crate provides:
//! - In-process plain text extraction
//! - HTTP client for a document extraction service
//! - An ordered extractor registry dispatching by MIME type
//! - Ollama analysis backend (feature `ollama`, default)
//! - Mock backends with failure injection (feature `mock`)
//!
//! # Example
//!
//! ```rust,ignore
//! use dossier_inference::{ExtractorRegistry, OllamaAnalyzer};
//!
//! let extractor = ExtractorRegistry::from_env()?;
//! let analyzer = OllamaAnalyzer::from_env()?;
//! let text = extractor.extract(&bytes, "cv.pdf", "application/pdf").await?;
//! let fields = analyzer.analyze(&text).await?;
//! ```

pub mod extraction;

#[cfg(feature = "ollama")]
pub mod ollama;

// Mock backends for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use extraction::{ExtractorRegistry, HttpTextExtractor, PlainTextExtractor};

#[cfg(feature = "ollama")]
pub use ollama::OllamaAnalyzer;
