//! # Key Rules
//!
//! Purpose: Reject keys the ASCII protocol cannot carry before a request
//! line is ever built.
//!
//! ## Design Principles
//! 1. **Fail Fast**: Validation runs on the caller's task, before any I/O.
//! 2. **Precise Errors**: Report the byte position of the first bad char.
//! 3. **Borrow-Friendly API**: Accept `&str`, never copy on the happy path.

use crate::error::{ValidationError, ValidationResult};

/// Maximum key length in bytes accepted by memcached.
pub const MAX_KEY_LEN: usize = 250;

/// Validates a single key: 1..=250 bytes, no whitespace, no control chars.
///
/// # Examples
/// ```rust
/// use mcpool_common::{validate_key, ValidationError};
///
/// assert!(validate_key("user:42").is_ok());
/// assert_eq!(validate_key(""), Err(ValidationError::EmptyKey));
/// ```
pub fn validate_key(key: &str) -> ValidationResult<()> {
    if key.is_empty() {
        return Err(ValidationError::EmptyKey);
    }
    if key.len() > MAX_KEY_LEN {
        return Err(ValidationError::KeyTooLong {
            len: key.len(),
            max: MAX_KEY_LEN,
        });
    }
    for (position, ch) in key.char_indices() {
        if ch.is_whitespace() {
            return Err(ValidationError::KeyWhitespace {
                position,
                key: key.to_string(),
            });
        }
        if ch.is_control() {
            return Err(ValidationError::KeyControl {
                position,
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

/// Validates every key of a multi-key retrieval.
pub fn validate_keys<I, S>(keys: I) -> ValidationResult<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = 0usize;
    for key in keys {
        validate_key(key.as_ref())?;
        seen += 1;
    }
    if seen == 0 {
        return Err(ValidationError::NoKeys);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_punctuation() {
        assert!(validate_key("1234567890-=~!@#$%^&*()_+").is_ok());
    }

    #[test]
    fn rejects_long_keys() {
        let key = "k".repeat(MAX_KEY_LEN + 1);
        assert_eq!(
            validate_key(&key),
            Err(ValidationError::KeyTooLong { len: 251, max: 250 })
        );
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN)).is_ok());
    }

    #[test]
    fn rejects_whitespace_and_control() {
        assert!(matches!(
            validate_key("a b"),
            Err(ValidationError::KeyWhitespace { position: 1, .. })
        ));
        assert!(matches!(
            validate_key("ab\r\n"),
            Err(ValidationError::KeyWhitespace { position: 2, .. })
        ));
        assert!(matches!(
            validate_key("ab\u{7f}"),
            Err(ValidationError::KeyControl { position: 2, .. })
        ));
    }

    #[test]
    fn validates_key_lists() {
        assert!(validate_keys(["a", "b"]).is_ok());
        assert_eq!(
            validate_keys(Vec::<String>::new()),
            Err(ValidationError::NoKeys)
        );
        assert!(validate_keys(["a", "b c"]).is_err());
    }
}
