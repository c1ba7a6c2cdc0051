//! Error types for the gateway and the transport-status translation.

use thiserror::Error;
use tonic::{Code, Status};

use crate::repository::RepositoryError;

/// Errors surfaced by the daemon connection gateway.
///
/// Callers never inspect `tonic::Status` codes: every transport failure is
/// normalized into one of these variants by [`translate`] before it leaves
/// the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The caller supplied a malformed request. Raised before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The daemon does not know the requested agent.
    #[error("agent not found")]
    AgentNotFound,

    /// The bounded call timeout expired.
    #[error("operation timed out")]
    Timeout,

    /// A connection could not be established, repaired, or used.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The daemon accepted the RPC but reported a business failure.
    /// Carries the daemon's own message, not a transport condition.
    #[error("agent operation failed: {0}")]
    OperationFailed(String),

    /// Any other transport error, passed through with its message intact.
    #[error("rpc failed: {}", .0.message())]
    Rpc(Status),

    /// A storage transaction failed as a whole. Per-record failures inside
    /// a sync batch never surface here; they are logged and skipped.
    #[error("storage failure: {0}")]
    Storage(#[from] RepositoryError),
}

/// Map a transport status onto the gateway's error vocabulary.
///
/// Total and deterministic: the same status code always yields the same
/// variant, independent of call site. Codes without a dedicated variant
/// pass through unchanged inside [`GatewayError::Rpc`].
pub fn translate(status: Status) -> GatewayError {
    match status.code() {
        Code::NotFound => GatewayError::AgentNotFound,
        Code::InvalidArgument => GatewayError::InvalidArgument(status.message().to_string()),
        Code::DeadlineExceeded => GatewayError::Timeout,
        Code::Unavailable => GatewayError::ConnectionFailed(status.message().to_string()),
        _ => GatewayError::Rpc(status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_not_found() {
        let err = translate(Status::not_found("agent missing"));
        assert!(matches!(err, GatewayError::AgentNotFound));
    }

    #[test]
    fn test_translate_invalid_argument_keeps_message() {
        let err = translate(Status::invalid_argument("bad operation"));
        match err {
            GatewayError::InvalidArgument(msg) => assert_eq!(msg, "bad operation"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_translate_deadline_exceeded() {
        let err = translate(Status::deadline_exceeded("too slow"));
        assert!(matches!(err, GatewayError::Timeout));
    }

    #[test]
    fn test_translate_unavailable() {
        let err = translate(Status::unavailable("connection refused"));
        match err {
            GatewayError::ConnectionFailed(reason) => assert_eq!(reason, "connection refused"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_translate_internal_preserves_original() {
        let err = translate(Status::internal("x"));
        match err {
            GatewayError::Rpc(status) => {
                assert_eq!(status.code(), Code::Internal);
                assert_eq!(status.message(), "x");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_translate_is_deterministic() {
        for _ in 0..3 {
            assert!(matches!(
                translate(Status::not_found("a")),
                GatewayError::AgentNotFound
            ));
            assert!(matches!(
                translate(Status::deadline_exceeded("b")),
                GatewayError::Timeout
            ));
        }
    }
}
