// ABOUTME: Transport binding for the XLM ecosystem backend.
// ABOUTME: Provides channel creation, the EcosystemTransport trait and its tonic implementation.

pub mod channel;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod transport;
pub mod types;

// Channel creation
pub use channel::{create_channel, ChannelConfig, KeepAlive};

// Error types
pub use error::TransportError;

// Transport
pub use transport::{CallTimeouts, EcosystemTransport, GrpcTransport, TokenStream};

// Domain types
pub use types::{
    CapabilityPreference, ChatRequest, ProviderDescriptor, CAPABILITY_AGENTS, CAPABILITY_CHAT,
    CAPABILITY_EMBEDDING, CAPABILITY_RAG,
};

#[cfg(feature = "mock")]
pub use mock::{MockTransport, Rpc};

// Re-export proto types for convenience
pub use xlm_proto;
