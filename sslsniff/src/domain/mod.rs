//! Domain model for sslsniff
//!
//! This module contains core domain types and errors that provide:
//! - The capture direction and its printed name
//! - Structured error handling per lifecycle step

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{op_name, Direction};

pub use errors::{
    AttachError, DecodeError, LinkError, LoadError, SnifferError, TransportError,
};
