// ABOUTME: Re-exports generated protobuf types for the XLM ecosystem protocol.
// ABOUTME: Single source of truth for the backend service and its message types.

#![allow(clippy::derive_partial_eq_without_eq)]

/// Generated protobuf types for the `xlmeco` package.
pub mod xlmeco {
    tonic::include_proto!("xlmeco");
}

pub use xlmeco::*;

pub mod client {
    pub use super::xlmeco::xlm_ecosystem_service_client::XlmEcosystemServiceClient;
}

pub mod server {
    pub use super::xlmeco::xlm_ecosystem_service_server::{
        XlmEcosystemService, XlmEcosystemServiceServer,
    };
}
