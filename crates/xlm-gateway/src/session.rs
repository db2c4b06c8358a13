// ABOUTME: Client identity and session lifecycle against the ecosystem backend.
// ABOUTME: Registration, capability negotiation, read-path queries and the one-time startup handshake.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;
use xlm_grpc::{
    CapabilityPreference, ChatRequest, EcosystemTransport, ProviderDescriptor,
    CAPABILITY_EMBEDDING,
};

use crate::config::{NegotiationPolicy, SessionConfig};
use crate::error::{GatewayError, Result};

/// The identity this process presents to the backend.
///
/// The id is generated client-side and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    id: String,
    name: String,
}

impl ClientIdentity {
    /// Fresh identity with a v4 UUID.
    pub fn generate(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A chat request issued on behalf of a live session.
///
/// Only [`Session::chat_request`] creates one, so the client id it carries is
/// always one the backend acknowledged and the prompt is never blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest(ChatRequest);

impl SessionRequest {
    pub fn as_chat(&self) -> &ChatRequest {
        &self.0
    }

    pub fn client_id(&self) -> &str {
        &self.0.client_id
    }

    pub fn prompt(&self) -> &str {
        &self.0.prompt
    }

    pub fn provider(&self) -> &str {
        &self.0.provider
    }

    pub fn model(&self) -> &str {
        &self.0.model
    }
}

/// Where a registered session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Registered,
    CapabilityNegotiated,
    /// Unregistered; no further calls may be issued.
    Invalidated,
}

/// A registered client session. Only [`Session::register`] creates one, so
/// holding a `Session` means the backend acknowledged its identity.
pub struct Session {
    identity: ClientIdentity,
    transport: Arc<dyn EcosystemTransport>,
    state: RwLock<SessionState>,
    preference: RwLock<CapabilityPreference>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    /// Register a freshly generated identity under `name`.
    ///
    /// A denied identity is dropped here and never reaches a chat call.
    pub async fn register(transport: Arc<dyn EcosystemTransport>, name: &str) -> Result<Self> {
        let identity = ClientIdentity::generate(name);
        info!(client_name = %name, client_id = %identity.id(), "Registering client");

        let acknowledged = transport.register_client(name, identity.id()).await?;
        if !acknowledged {
            warn!(client_name = %name, client_id = %identity.id(), "Registration denied");
            return Err(GatewayError::RegistrationDenied {
                client_name: name.to_string(),
            });
        }

        info!(client_id = %identity.id(), "Client registered");
        Ok(Self {
            identity,
            transport,
            state: RwLock::new(SessionState::Registered),
            preference: RwLock::new(CapabilityPreference::new()),
        })
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn client_id(&self) -> &str {
        self.identity.id()
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The preference mapping last acknowledged by the backend.
    pub fn preference(&self) -> CapabilityPreference {
        self.preference
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn transport(&self) -> Arc<dyn EcosystemTransport> {
        Arc::clone(&self.transport)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state() == SessionState::Invalidated {
            return Err(GatewayError::SessionInvalidated {
                client_id: self.client_id().to_string(),
            });
        }
        Ok(())
    }

    /// Request `capabilities` from `provider`.
    ///
    /// Sends a single-provider mapping, which replaces whatever was negotiated before.
    pub async fn negotiate_capabilities<I, S>(&self, provider: &str, capabilities: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.negotiate(CapabilityPreference::single(provider, capabilities))
            .await
    }

    /// Send a full preference mapping.
    pub async fn negotiate(&self, preference: CapabilityPreference) -> Result<()> {
        self.ensure_active()?;

        let acknowledged = self
            .transport
            .set_preferred_providers(self.client_id(), &preference)
            .await?;
        if !acknowledged {
            let provider = preference
                .providers()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
                .join(",");
            return Err(GatewayError::NegotiationDenied { provider });
        }

        info!(client_id = %self.client_id(), preference = ?preference, "Capabilities negotiated");
        *self
            .preference
            .write()
            .unwrap_or_else(PoisonError::into_inner) = preference;
        self.set_state(SessionState::CapabilityNegotiated);
        Ok(())
    }

    /// Build a chat request on behalf of this session.
    pub fn chat_request(
        &self,
        prompt: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<SessionRequest> {
        self.ensure_active()?;
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(GatewayError::EmptyPrompt);
        }
        Ok(SessionRequest(ChatRequest {
            client_id: self.client_id().to_string(),
            prompt,
            provider: provider.into(),
            model: model.into(),
        }))
    }

    pub async fn list_providers(&self) -> Result<Vec<ProviderDescriptor>> {
        Ok(self.transport.list_providers().await?)
    }

    pub async fn provider_capabilities(&self, provider: &str) -> Result<ProviderDescriptor> {
        self.ensure_active()?;
        Ok(self
            .transport
            .get_provider_capabilities(self.client_id(), provider)
            .await?)
    }

    pub async fn embedding(&self, text: &str) -> Result<Vec<f32>> {
        self.ensure_active()?;
        Ok(self.transport.get_embedding(self.client_id(), text).await?)
    }

    /// Embed `text` only when `provider` reports embedding support.
    pub async fn embed_if_supported(&self, provider: &str, text: &str) -> Result<Option<Vec<f32>>> {
        let descriptor = self.provider_capabilities(provider).await?;
        if !descriptor.supports(CAPABILITY_EMBEDDING) {
            info!(provider = %provider, "Provider does not support embeddings");
            return Ok(None);
        }
        self.embedding(text).await.map(Some)
    }

    /// Best-effort unregistration. The session is invalidated whatever the outcome.
    ///
    /// Returns the backend's acknowledgement; a second call is a no-op.
    pub async fn unregister(&self) -> Result<bool> {
        if self.state() == SessionState::Invalidated {
            return Ok(true);
        }
        self.set_state(SessionState::Invalidated);

        let acknowledged = self.transport.unregister_client(self.client_id()).await?;
        if acknowledged {
            info!(client_id = %self.client_id(), "Client unregistered");
        } else {
            warn!(client_id = %self.client_id(), "Backend did not acknowledge unregistration");
        }
        Ok(acknowledged)
    }
}

/// Performs the registration handshake at most once per process.
///
/// Concurrent callers of [`SessionManager::establish`] wait on the same
/// handshake; nothing dependent runs before it completes.
pub struct SessionManager {
    transport: Arc<dyn EcosystemTransport>,
    config: SessionConfig,
    session: OnceCell<Arc<Session>>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn EcosystemTransport>, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            session: OnceCell::new(),
        }
    }

    /// Register and negotiate, or return the already established session.
    pub async fn establish(&self) -> Result<Arc<Session>> {
        self.session
            .get_or_try_init(|| self.handshake())
            .await
            .map(Arc::clone)
    }

    /// The established session, if the handshake has completed.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.session.get().cloned()
    }

    async fn handshake(&self) -> Result<Arc<Session>> {
        let session =
            Session::register(Arc::clone(&self.transport), &self.config.client_name).await?;

        let provider = &self.config.provider;
        match session
            .negotiate_capabilities(provider, self.config.capabilities.iter().cloned())
            .await
        {
            Ok(()) => {}
            Err(e) if self.config.negotiation_policy == NegotiationPolicy::Continue => {
                warn!(
                    provider = %provider,
                    error = %e,
                    "Capability negotiation failed, continuing with backend defaults"
                );
            }
            Err(e) => {
                if let Err(cleanup) = session.unregister().await {
                    warn!(error = %cleanup, "Unregister after aborted negotiation failed");
                }
                return Err(e);
            }
        }

        Ok(Arc::new(session))
    }
}
