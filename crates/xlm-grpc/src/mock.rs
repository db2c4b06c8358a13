// ABOUTME: Scripted in-memory EcosystemTransport for tests.
// ABOUTME: Records calls per RPC and replays configured replies, streams and failures.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};

use crate::error::TransportError;
use crate::transport::{EcosystemTransport, TokenStream};
use crate::types::{CapabilityPreference, ChatRequest, ProviderDescriptor};

/// Backend operations, for call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rpc {
    RegisterClient,
    UnregisterClient,
    ListProviders,
    GetProviderCapabilities,
    SetPreferredProviders,
    SyncChat,
    AsyncChat,
    GetEmbedding,
}

/// How a scripted stream ends after its tokens.
#[derive(Debug, Clone)]
enum StreamEnd {
    Complete,
    Fail(TransportError),
    Hang,
}

#[derive(Debug)]
struct MockState {
    calls: HashMap<Rpc, usize>,
    registration_ok: bool,
    negotiation_ok: bool,
    unregister_ok: bool,
    registered: Vec<(String, String)>,
    preferences: HashMap<String, CapabilityPreference>,
    providers: Vec<ProviderDescriptor>,
    tokens: Vec<String>,
    stream_end: StreamEnd,
    completion: Result<String, TransportError>,
    hang_sync_chat: bool,
    embedding: Vec<f32>,
    chat_requests: Vec<ChatRequest>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            calls: HashMap::new(),
            registration_ok: true,
            negotiation_ok: true,
            unregister_ok: true,
            registered: Vec::new(),
            preferences: HashMap::new(),
            providers: Vec::new(),
            tokens: Vec::new(),
            stream_end: StreamEnd::Complete,
            completion: Ok(String::new()),
            hang_sync_chat: false,
            embedding: vec![0.1, 0.2, 0.3],
            chat_requests: Vec::new(),
        }
    }
}

/// In-memory backend. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    streams_dropped: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, rpc: Rpc) {
        *self.state().calls.entry(rpc).or_insert(0) += 1;
    }

    // --- scripting -------------------------------------------------------

    /// Answer `success=false` to registration.
    pub fn deny_registration(self) -> Self {
        self.state().registration_ok = false;
        self
    }

    /// Answer `success=false` to capability negotiation.
    pub fn deny_negotiation(self) -> Self {
        self.state().negotiation_ok = false;
        self
    }

    pub fn deny_unregister(self) -> Self {
        self.state().unregister_ok = false;
        self
    }

    pub fn with_provider(self, descriptor: ProviderDescriptor) -> Self {
        self.state().providers.push(descriptor);
        self
    }

    /// Tokens replayed by every streaming chat.
    pub fn with_tokens<I, S>(self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    /// End every stream with `error` once the scripted tokens are sent.
    pub fn fail_stream_with(self, error: TransportError) -> Self {
        self.state().stream_end = StreamEnd::Fail(error);
        self
    }

    /// Keep every stream open forever once the scripted tokens are sent.
    pub fn hang_stream(self) -> Self {
        self.state().stream_end = StreamEnd::Hang;
        self
    }

    /// Completion returned by unary chat.
    pub fn with_completion(self, completion: impl Into<String>) -> Self {
        self.state().completion = Ok(completion.into());
        self
    }

    pub fn fail_sync_chat_with(self, error: TransportError) -> Self {
        self.state().completion = Err(error);
        self
    }

    pub fn hang_sync_chat(self) -> Self {
        self.state().hang_sync_chat = true;
        self
    }

    pub fn with_embedding(self, embedding: Vec<f32>) -> Self {
        self.state().embedding = embedding;
        self
    }

    // --- inspection ------------------------------------------------------

    pub fn calls(&self, rpc: Rpc) -> usize {
        self.state().calls.get(&rpc).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    /// `(name, client_id)` pairs the backend acknowledged.
    pub fn registered(&self) -> Vec<(String, String)> {
        self.state().registered.clone()
    }

    /// The active preference mapping for `client_id`.
    pub fn preference(&self, client_id: &str) -> Option<CapabilityPreference> {
        self.state().preferences.get(client_id).cloned()
    }

    /// Every chat request seen, sync and streaming, in call order.
    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.state().chat_requests.clone()
    }

    /// Streams the consumer has dropped, whether finished or abandoned.
    pub fn streams_dropped(&self) -> usize {
        self.streams_dropped.load(Ordering::SeqCst)
    }
}

/// Counts the stream as dropped when the consumer lets go of it.
struct TrackedStream {
    inner: TokenStream,
    dropped: Arc<AtomicUsize>,
}

impl Stream for TrackedStream {
    type Item = Result<String, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EcosystemTransport for MockTransport {
    async fn register_client(&self, name: &str, client_id: &str) -> Result<bool, TransportError> {
        self.record(Rpc::RegisterClient);
        let mut state = self.state();
        if state.registration_ok {
            state
                .registered
                .push((name.to_string(), client_id.to_string()));
        }
        Ok(state.registration_ok)
    }

    async fn set_preferred_providers(
        &self,
        client_id: &str,
        preference: &CapabilityPreference,
    ) -> Result<bool, TransportError> {
        self.record(Rpc::SetPreferredProviders);
        let mut state = self.state();
        if state.negotiation_ok {
            state
                .preferences
                .insert(client_id.to_string(), preference.clone());
        }
        Ok(state.negotiation_ok)
    }

    async fn get_provider_capabilities(
        &self,
        _client_id: &str,
        provider: &str,
    ) -> Result<ProviderDescriptor, TransportError> {
        self.record(Rpc::GetProviderCapabilities);
        self.state()
            .providers
            .iter()
            .find(|p| p.provider_name == provider)
            .cloned()
            .ok_or_else(|| TransportError::Rpc {
                code: tonic::Code::NotFound,
                message: format!("unknown provider: {}", provider),
            })
    }

    async fn list_providers(&self) -> Result<Vec<ProviderDescriptor>, TransportError> {
        self.record(Rpc::ListProviders);
        Ok(self.state().providers.clone())
    }

    async fn get_embedding(&self, _client_id: &str, _text: &str) -> Result<Vec<f32>, TransportError> {
        self.record(Rpc::GetEmbedding);
        Ok(self.state().embedding.clone())
    }

    async fn unregister_client(&self, client_id: &str) -> Result<bool, TransportError> {
        self.record(Rpc::UnregisterClient);
        let mut state = self.state();
        state.preferences.remove(client_id);
        Ok(state.unregister_ok)
    }

    async fn sync_chat(&self, request: &ChatRequest) -> Result<String, TransportError> {
        self.record(Rpc::SyncChat);
        let (hang, completion) = {
            let mut state = self.state();
            state.chat_requests.push(request.clone());
            (state.hang_sync_chat, state.completion.clone())
        };
        if hang {
            std::future::pending::<()>().await;
        }
        completion
    }

    async fn async_chat(&self, request: &ChatRequest) -> Result<TokenStream, TransportError> {
        self.record(Rpc::AsyncChat);
        let (tokens, end) = {
            let mut state = self.state();
            state.chat_requests.push(request.clone());
            (state.tokens.clone(), state.stream_end.clone())
        };

        let fragments = stream::iter(tokens.into_iter().map(Ok::<String, TransportError>));
        let inner: TokenStream = match end {
            StreamEnd::Complete => Box::pin(fragments),
            StreamEnd::Fail(error) => Box::pin(fragments.chain(stream::iter([Err(error)]))),
            StreamEnd::Hang => Box::pin(fragments.chain(stream::pending())),
        };

        Ok(Box::pin(TrackedStream {
            inner,
            dropped: Arc::clone(&self.streams_dropped),
        }))
    }
}
