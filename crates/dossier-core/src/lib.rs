//! # dossier-core
//!
//! Core types, traits, and abstractions for the dossier ingestion pipeline.
//!
//! This crate provides the foundational data structures and trait definitions
//! that other dossier crates depend on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod traits;
pub mod validation;

// Re-export commonly used types at crate root
pub use error::{Error, ErrorKind, Result};
pub use events::{EventBus, ProgressEvent};
pub use models::*;
pub use traits::*;
pub use validation::{detect_executable, AllowedType, FileValidator};
