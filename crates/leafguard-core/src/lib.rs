//! LeafGuard Core
//!
//! Core types and error handling shared across LeafGuard components.
//!
//! This crate provides:
//! - The error taxonomy used by the classification engine and its callers
//! - Embedding and label value types

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Embedding, Label, UNKNOWN_LABEL};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{Embedding, Label, UNKNOWN_LABEL};
}
