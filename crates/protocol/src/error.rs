//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Serialization errors
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // Control plane errors
    /// The server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The request could not be delivered.
    #[error("request failed: {0}")]
    Request(String),

    /// The server returned something that is not a usable process id.
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    // Connection errors
    /// Connection was closed unexpectedly.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Operation timed out.
    #[error("operation timed out: {0}")]
    Timeout(String),

    // Session errors
    /// Session with the given ID was not found.
    #[error("session not found: {session_id}")]
    SessionNotFound {
        /// The missing session identifier.
        session_id: String,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Conversions from underlying crate errors

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display() {
        let err = ProtocolError::HttpStatus {
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "server returned 500: boom");
    }

    #[test]
    fn test_invalid_session_id_display() {
        let err = ProtocolError::InvalidSessionId(String::new());
        assert_eq!(err.to_string(), "invalid session id: \"\"");
    }

    #[test]
    fn test_session_not_found_display() {
        let err = ProtocolError::SessionNotFound {
            session_id: "terminal_3".to_string(),
        };
        assert_eq!(err.to_string(), "session not found: terminal_3");
    }

    #[test]
    fn test_timeout_display() {
        let err = ProtocolError::Timeout("flush".to_string());
        assert_eq!(err.to_string(), "operation timed out: flush");
    }

    #[test]
    fn test_from_serde_json_syntax_error() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ProtocolError = err.into();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }
}
