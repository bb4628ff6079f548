//! # Validation Errors
//!
//! Errors raised before any network I/O happens. They are always locally
//! detectable and never worth retrying.

use thiserror::Error;

/// Result alias for argument validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Argument or configuration rejected before touching the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Keys must contain at least one byte.
    #[error("key must not be empty")]
    EmptyKey,

    /// Keys are limited to `MAX_KEY_LEN` bytes.
    #[error("key must be no more than {max} bytes in length, got {len}")]
    KeyTooLong { len: usize, max: usize },

    /// The server splits request lines on whitespace.
    #[error("key may not contain whitespace at position={position} key={key}")]
    KeyWhitespace { position: usize, key: String },

    /// Control characters would corrupt the request line.
    #[error("key may not contain control characters at position={position} key={key}")]
    KeyControl { position: usize, key: String },

    /// A multi-key retrieval needs at least one key.
    #[error("at least one key is required")]
    NoKeys,

    /// Endpoint string could not be split into host and port.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_position() {
        let err = ValidationError::KeyWhitespace {
            position: 3,
            key: "abc def".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "key may not contain whitespace at position=3 key=abc def"
        );
    }

    #[test]
    fn display_key_too_long() {
        let err = ValidationError::KeyTooLong { len: 251, max: 250 };
        assert_eq!(
            err.to_string(),
            "key must be no more than 250 bytes in length, got 251"
        );
    }
}
