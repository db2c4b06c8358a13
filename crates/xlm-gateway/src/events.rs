// ABOUTME: Events published to downstream clients while a chat is relayed.
// ABOUTME: Token fragments and titles, each tagged with the request they belong to.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

/// Correlates every event with the relay run that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One incremental fragment of a streamed response.
///
/// Fragments carry no sequence number; order is arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEvent {
    pub text: String,
}

/// What the push channel carries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RelayEvent {
    ChatResponse {
        request_id: RequestId,
        message: String,
    },
    ChatTitle {
        request_id: RequestId,
        title: String,
    },
}

impl RelayEvent {
    pub fn token(request_id: RequestId, token: &TokenEvent) -> Self {
        RelayEvent::ChatResponse {
            request_id,
            message: token.text.clone(),
        }
    }

    pub fn title(request_id: RequestId, title: impl Into<String>) -> Self {
        RelayEvent::ChatTitle {
            request_id,
            title: title.into(),
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            RelayEvent::ChatResponse { request_id, .. } | RelayEvent::ChatTitle { request_id, .. } => {
                *request_id
            }
        }
    }

    /// JSON text frame for the push channel.
    pub fn to_json(&self) -> String {
        // Only strings and UUIDs inside, serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}
