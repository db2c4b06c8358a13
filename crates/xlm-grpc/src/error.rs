// ABOUTME: Error types for the xlm-grpc crate.
// ABOUTME: Structured errors for channel creation, RPC calls and token streams.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the transport binding.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Invalid server address format.
    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    /// Failed to connect to the server.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The backend answered with a non-OK gRPC status.
    #[error("rpc failed with {code:?}: {message}")]
    Rpc { code: tonic::Code, message: String },

    /// The call did not resolve within its configured deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Stream was closed unexpectedly.
    #[error("stream closed unexpectedly")]
    StreamClosed,
}

impl TransportError {
    /// The gRPC status code carried by this error, if any.
    pub fn code(&self) -> Option<tonic::Code> {
        match self {
            TransportError::Rpc { code, .. } => Some(*code),
            TransportError::Timeout { .. } => Some(tonic::Code::DeadlineExceeded),
            TransportError::ConnectionFailed(_) => Some(tonic::Code::Unavailable),
            _ => None,
        }
    }
}

impl From<tonic::Status> for TransportError {
    fn from(status: tonic::Status) -> Self {
        TransportError::Rpc {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

impl From<tonic::transport::Error> for TransportError {
    fn from(err: tonic::transport::Error) -> Self {
        TransportError::ConnectionFailed(err.to_string())
    }
}
