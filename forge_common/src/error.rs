//! Error handling for the forge toolkit.
//!
//! Structural errors (invariant violations caught while emitting or
//! transforming IR) travel through this type. Semantic errors (unresolved
//! operators, ambiguous overloads) are reported through the log handler
//! instead and produce empty values; see the builder's expression layer.

use thiserror::Error;

/// The main error type for the forge toolkit
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForgeError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Unknown label {label}")]
    UnknownLabel { label: u32 },

    #[error("Registry error: {message}")]
    Registry { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error("Runtime error: {message}")]
    Runtime { message: String },
}

/// Result type alias for forge operations
pub type ForgeResult<T> = Result<T, ForgeError>;

impl ForgeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn registry(message: impl Into<String>) -> Self {
        Self::Registry { message: message.into() }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported { message: message.into() }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime { message: message.into() }
    }
}
