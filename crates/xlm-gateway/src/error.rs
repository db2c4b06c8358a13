// ABOUTME: Error types for the gateway.
// ABOUTME: Session, relay, supervisor and configuration failures with their HTTP mapping.

use std::time::Duration;

use thiserror::Error;
use xlm_grpc::TransportError;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// The backend refused the proposed client identity.
    #[error("registration denied for client '{client_name}'")]
    RegistrationDenied { client_name: String },

    /// The backend refused the requested capability set.
    #[error("capability negotiation denied for provider '{provider}'")]
    NegotiationDenied { provider: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("prompt cannot be empty")]
    EmptyPrompt,

    /// The session was unregistered and can no longer issue calls.
    #[error("session {client_id} has been invalidated")]
    SessionInvalidated { client_id: String },

    /// The downstream sink stopped accepting events.
    #[error("event sink closed")]
    SinkClosed,

    #[error("request cancelled")]
    Cancelled,

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Every relay slot is taken.
    #[error("gateway busy: {in_flight} streams in flight")]
    Busy { in_flight: usize },

    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Whether this failure belongs to the caller rather than the gateway or backend.
    pub fn is_client_error(&self) -> bool {
        matches!(self, GatewayError::EmptyPrompt)
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
