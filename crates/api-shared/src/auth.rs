//! API key checking.
//!
//! The expected key is resolved once at startup and passed in; nothing here reads the
//! environment.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing API key")]
    Missing,
    #[error("invalid API key")]
    Invalid,
}

/// Validates the provided API key against the expected one.
///
/// # Errors
///
/// Returns `AuthError::Missing` if no key was sent and `AuthError::Invalid` if it does not
/// match.
pub fn validate_api_key(provided: Option<&str>, expected: &str) -> Result<(), AuthError> {
    match provided {
        None => Err(AuthError::Missing),
        Some(key) if key == expected => Ok(()),
        Some(_) => Err(AuthError::Invalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_api_key() {
        assert_eq!(validate_api_key(Some("s3cret"), "s3cret"), Ok(()));
        assert_eq!(validate_api_key(Some("guess"), "s3cret"), Err(AuthError::Invalid));
        assert_eq!(validate_api_key(None, "s3cret"), Err(AuthError::Missing));
    }
}
