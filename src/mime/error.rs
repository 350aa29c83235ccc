//! Error types for the MIME registry.

use thiserror::Error;

/// Errors raised while building a MIME registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MimeError {
    /// The string is not of the form `type/subtype[;params]`.
    #[error("invalid MIME type '{value}': expected type/subtype with optional ';' parameters")]
    InvalidFormat {
        /// The rejected MIME string.
        value: String,
    },
}

impl MimeError {
    /// Creates an invalid-format error.
    pub fn invalid_format(value: impl Into<String>) -> Self {
        Self::InvalidFormat {
            value: value.into(),
        }
    }
}
