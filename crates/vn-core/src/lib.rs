//! vn-core: shared error type, configuration, and media-domain enums.
//!
//! This crate is the foundational dependency for the other vn-* crates. It
//! owns the unified [`Error`], the JSON-backed [`Config`](config::Config), and
//! the closed enums (codecs, containers, issue types, remediation methods)
//! that the pipeline reasons about.

pub mod config;
pub mod error;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use media::*;
