//! Secret store error types.

use thiserror::Error;

/// Errors talking to the secret store.
///
/// "Nothing at this path" is not an error: reads and listings return
/// `Ok(None)` for that case.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport failure (connect, TLS, body read).
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {}", errors.join("; "))]
    Status { status: u16, errors: Vec<String> },

    /// The backend answered with a body we could not interpret.
    #[error("malformed backend response: {0}")]
    Decode(String),

    /// The configured backend address is not a valid URL.
    #[error("invalid backend address: {0}")]
    InvalidAddress(#[from] url::ParseError),

    /// The backend could not be reached or refused the credential.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Create an Unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a Decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Returns true if the backend rejected the credential.
    pub fn is_auth(&self) -> bool {
        matches!(self, StoreError::Status { status: 401 | 403, .. })
    }
}

/// Secret store result type.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_joins_errors() {
        let err = StoreError::Status {
            status: 403,
            errors: vec!["permission denied".into(), "token expired".into()],
        };
        assert_eq!(
            err.to_string(),
            "backend returned 403: permission denied; token expired"
        );
        assert!(err.is_auth());
        assert!(!StoreError::unavailable("down").is_auth());
    }
}
