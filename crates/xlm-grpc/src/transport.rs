// ABOUTME: The EcosystemTransport trait and its tonic-backed implementation.
// ABOUTME: One method per backend RPC, each bounded by a caller-configurable deadline.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tonic::transport::Channel;
use xlm_proto::client::XlmEcosystemServiceClient;
use xlm_proto::{
    ChatRequest as ChatRequestProto, ClientRegistrationRequest, ClientUnregistrationRequest,
    EmbeddingRequest, EmptyRequest, ProviderRequest,
};

use crate::channel::{create_channel, ChannelConfig};
use crate::error::TransportError;
use crate::types::{CapabilityPreference, ChatRequest, ProviderDescriptor};

/// Incremental response fragments of one streaming chat call, in arrival order.
///
/// Dropping the stream cancels the underlying call.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Deadlines applied to backend calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    /// Registration, listing, capability queries, embeddings, sync chat.
    pub unary: Duration,
    /// Capability negotiation.
    pub negotiation: Duration,
    /// Opening a streaming chat and the lifetime of the stream.
    pub stream: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            unary: Duration::from_secs(30),
            negotiation: Duration::from_secs(10),
            stream: Duration::from_secs(300),
        }
    }
}

/// Logical operations offered by the ecosystem backend.
///
/// Implementations must be safe to share across concurrent requests.
#[async_trait]
pub trait EcosystemTransport: Send + Sync {
    /// Propose `client_id` under `name`. Returns the backend's acknowledgement.
    async fn register_client(&self, name: &str, client_id: &str) -> Result<bool, TransportError>;

    /// Send the full preference mapping for `client_id`.
    async fn set_preferred_providers(
        &self,
        client_id: &str,
        preference: &CapabilityPreference,
    ) -> Result<bool, TransportError>;

    async fn get_provider_capabilities(
        &self,
        client_id: &str,
        provider: &str,
    ) -> Result<ProviderDescriptor, TransportError>;

    async fn list_providers(&self) -> Result<Vec<ProviderDescriptor>, TransportError>;

    async fn get_embedding(&self, client_id: &str, text: &str) -> Result<Vec<f32>, TransportError>;

    async fn unregister_client(&self, client_id: &str) -> Result<bool, TransportError>;

    /// Unary chat returning the whole completion.
    async fn sync_chat(&self, request: &ChatRequest) -> Result<String, TransportError>;

    /// Open a server-streaming chat call.
    async fn async_chat(&self, request: &ChatRequest) -> Result<TokenStream, TransportError>;
}

/// Transport over a shared tonic channel.
///
/// The generated client is cloned per call; clones share the channel, so
/// concurrent calls are multiplexed without any lock.
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    client: XlmEcosystemServiceClient<Channel>,
    timeouts: CallTimeouts,
}

impl GrpcTransport {
    pub fn new(channel: Channel, timeouts: CallTimeouts) -> Self {
        Self {
            client: XlmEcosystemServiceClient::new(channel),
            timeouts,
        }
    }

    /// Create the channel and wrap it.
    pub async fn connect(
        config: &ChannelConfig,
        timeouts: CallTimeouts,
    ) -> Result<Self, TransportError> {
        let channel = create_channel(config).await?;
        Ok(Self::new(channel, timeouts))
    }

    pub fn timeouts(&self) -> CallTimeouts {
        self.timeouts
    }

    fn client(&self) -> XlmEcosystemServiceClient<Channel> {
        self.client.clone()
    }
}

fn request<T>(message: T, deadline: Duration) -> tonic::Request<T> {
    let mut req = tonic::Request::new(message);
    req.set_timeout(deadline);
    req
}

/// Await an RPC, mapping status and deadline failures.
async fn bounded<T, F>(
    operation: &'static str,
    after: Duration,
    call: F,
) -> Result<T, TransportError>
where
    F: Future<Output = Result<tonic::Response<T>, tonic::Status>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(Ok(response)) => Ok(response.into_inner()),
        Ok(Err(status)) => {
            tracing::debug!(operation, code = ?status.code(), message = %status.message(), "rpc failed");
            Err(status.into())
        }
        Err(_) => Err(TransportError::Timeout { operation, after }),
    }
}

#[async_trait]
impl EcosystemTransport for GrpcTransport {
    async fn register_client(&self, name: &str, client_id: &str) -> Result<bool, TransportError> {
        let mut client = self.client();
        let msg = ClientRegistrationRequest {
            client_name: name.to_string(),
            client_id: client_id.to_string(),
        };
        let after = self.timeouts.unary;
        let resp = bounded("registerClient", after, client.register_client(request(msg, after)))
            .await?;
        Ok(resp.success)
    }

    async fn set_preferred_providers(
        &self,
        client_id: &str,
        preference: &CapabilityPreference,
    ) -> Result<bool, TransportError> {
        let mut client = self.client();
        let after = self.timeouts.negotiation;
        let msg = preference.to_request(client_id);
        let resp = bounded(
            "setPreferredProviders",
            after,
            client.set_preferred_providers(request(msg, after)),
        )
        .await?;
        Ok(resp.success)
    }

    async fn get_provider_capabilities(
        &self,
        client_id: &str,
        provider: &str,
    ) -> Result<ProviderDescriptor, TransportError> {
        let mut client = self.client();
        let after = self.timeouts.unary;
        let msg = ProviderRequest {
            client_id: client_id.to_string(),
            provider: provider.to_string(),
        };
        let resp = bounded(
            "getProviderCapabilities",
            after,
            client.get_provider_capabilities(request(msg, after)),
        )
        .await?;
        Ok(resp.into())
    }

    async fn list_providers(&self) -> Result<Vec<ProviderDescriptor>, TransportError> {
        let mut client = self.client();
        let after = self.timeouts.unary;
        let resp = bounded(
            "listProviders",
            after,
            client.list_providers(request(EmptyRequest {}, after)),
        )
        .await?;
        Ok(resp.providers.into_iter().map(Into::into).collect())
    }

    async fn get_embedding(&self, client_id: &str, text: &str) -> Result<Vec<f32>, TransportError> {
        let mut client = self.client();
        let after = self.timeouts.unary;
        let msg = EmbeddingRequest {
            client_id: client_id.to_string(),
            text: text.to_string(),
        };
        let resp = bounded("getEmbedding", after, client.get_embedding(request(msg, after))).await?;
        Ok(resp.embedding)
    }

    async fn unregister_client(&self, client_id: &str) -> Result<bool, TransportError> {
        let mut client = self.client();
        let after = self.timeouts.unary;
        let msg = ClientUnregistrationRequest {
            client_id: client_id.to_string(),
        };
        let resp = bounded(
            "unregisterClient",
            after,
            client.unregister_client(request(msg, after)),
        )
        .await?;
        Ok(resp.success)
    }

    async fn sync_chat(&self, req: &ChatRequest) -> Result<String, TransportError> {
        let mut client = self.client();
        let after = self.timeouts.unary;
        let msg = ChatRequestProto::from(req);
        let resp = bounded("syncChat", after, client.sync_chat(request(msg, after))).await?;
        Ok(resp.completion)
    }

    async fn async_chat(&self, req: &ChatRequest) -> Result<TokenStream, TransportError> {
        let mut client = self.client();
        let after = self.timeouts.stream;
        let msg = ChatRequestProto::from(req);
        let streaming = bounded("asyncChat", after, client.async_chat(request(msg, after))).await?;

        tracing::debug!(
            client_id = %req.client_id,
            provider = %req.provider,
            model = %req.model,
            "streaming chat opened"
        );

        Ok(Box::pin(streaming.map(|part| {
            part.map(|p| p.token).map_err(TransportError::from)
        })))
    }
}
