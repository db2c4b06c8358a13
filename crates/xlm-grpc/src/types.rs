// ABOUTME: Domain types exchanged with the ecosystem backend.
// ABOUTME: Chat requests, provider descriptors and capability preferences, with proto conversions.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use xlm_proto::{
    ChatRequest as ChatRequestProto, ProviderCapabilitiesRequest, ProviderCapabilitiesResponse,
    ProviderInfo, ProviderSelectionRequest,
};

pub const CAPABILITY_CHAT: &str = "chat";
pub const CAPABILITY_EMBEDDING: &str = "embedding";
pub const CAPABILITY_RAG: &str = "rag";
pub const CAPABILITY_AGENTS: &str = "agents";

/// One chat invocation against the backend.
///
/// Built per call and dropped when the call completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub client_id: String,
    pub prompt: String,
    pub provider: String,
    pub model: String,
}

impl ChatRequest {
    /// Same client, provider and model with a different prompt.
    pub fn with_prompt(&self, prompt: impl Into<String>) -> Self {
        Self {
            client_id: self.client_id.clone(),
            prompt: prompt.into(),
            provider: self.provider.clone(),
            model: self.model.clone(),
        }
    }
}

impl From<&ChatRequest> for ChatRequestProto {
    fn from(req: &ChatRequest) -> Self {
        ChatRequestProto {
            client_id: req.client_id.clone(),
            prompt: req.prompt.clone(),
            provider: req.provider.clone(),
            model_name: req.model.clone(),
        }
    }
}

/// What a provider reports about itself. Fetched on demand, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderDescriptor {
    pub provider_name: String,
    pub service_level: String,
    pub capabilities: BTreeMap<String, bool>,
}

impl ProviderDescriptor {
    /// Whether the provider marks `capability` as supported. Unknown tags are unsupported.
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.get(capability).copied().unwrap_or(false)
    }
}

impl From<ProviderInfo> for ProviderDescriptor {
    fn from(info: ProviderInfo) -> Self {
        Self {
            provider_name: info.provider_name,
            service_level: info.service_level,
            capabilities: info.capabilities.into_iter().collect(),
        }
    }
}

impl From<ProviderCapabilitiesResponse> for ProviderDescriptor {
    fn from(resp: ProviderCapabilitiesResponse) -> Self {
        Self {
            provider_name: resp.provider_name,
            service_level: resp.service_level,
            capabilities: resp.capabilities.into_iter().collect(),
        }
    }
}

/// Requested capability tags per provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityPreference {
    providers: BTreeMap<String, BTreeSet<String>>,
}

impl CapabilityPreference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preference naming a single provider.
    pub fn single<I, S>(provider: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pref = Self::new();
        pref.set(provider, capabilities);
        pref
    }

    /// Replace the capability set for `provider`.
    pub fn set<I, S>(&mut self, provider: impl Into<String>, capabilities: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.providers.insert(
            provider.into(),
            capabilities.into_iter().map(Into::into).collect(),
        );
    }

    pub fn get(&self, provider: &str) -> Option<&BTreeSet<String>> {
        self.providers.get(provider)
    }

    pub fn providers(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.providers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Wire form of this preference for `client_id`.
    pub fn to_request(&self, client_id: &str) -> ProviderSelectionRequest {
        ProviderSelectionRequest {
            client_id: client_id.to_string(),
            provider_capabilities: self
                .providers
                .iter()
                .map(|(provider, caps)| {
                    (
                        provider.clone(),
                        ProviderCapabilitiesRequest {
                            capabilities: caps.iter().cloned().collect(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Rebuild a preference from its wire form.
    pub fn from_request(req: &ProviderSelectionRequest) -> Self {
        let mut pref = Self::new();
        for (provider, caps) in &req.provider_capabilities {
            pref.set(provider.clone(), caps.capabilities.iter().cloned());
        }
        pref
    }
}
