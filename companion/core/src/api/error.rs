//! REST error taxonomy

use thiserror::Error;

/// Errors from the REST backend
#[derive(Error, Debug)]
pub enum ApiError {
    /// Credential missing, expired or rejected (401/403)
    #[error("session is no longer valid")]
    Unauthorized,

    /// Non-success status
    #[error("server returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Server-provided message, or the status reason
        message: String,
    },

    /// Request never completed (connection, DNS, TLS, body read)
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body did not have the expected shape
    #[error("malformed response: {0}")]
    Decode(String),

    /// No authenticated session to take a credential from
    #[error("not logged in")]
    NoSession,
}

impl ApiError {
    /// Whether the user has to log in again
    #[must_use]
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::NoSession)
    }

    /// Whether the same call may succeed later (network trouble, server
    /// overload)
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Result type for REST calls
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ApiError::Unauthorized.is_session_invalid());
        assert!(!ApiError::Unauthorized.is_transient());

        let overloaded = ApiError::Status {
            status: 503,
            message: "busy".into(),
        };
        assert!(overloaded.is_transient());
        assert!(!overloaded.is_session_invalid());

        let rejected = ApiError::Status {
            status: 422,
            message: "content required".into(),
        };
        assert!(!rejected.is_transient());
        assert_eq!(rejected.to_string(), "server returned 422: content required");
    }
}
