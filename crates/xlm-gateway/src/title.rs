// ABOUTME: Best-effort title generation for a completed chat response.
// ABOUTME: A secondary unary chat whose failures degrade to a placeholder instead of propagating.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use xlm_grpc::EcosystemTransport;

use crate::session::SessionRequest;

pub const DEFAULT_PLACEHOLDER: &str = "Untitled";

/// Summarisation prompt wrapped around the accumulated response.
pub fn title_prompt(text: &str) -> String {
    format!(
        "Generate a concise 3-5 word title for this response:\n{}\n  Only return that Title in your response.",
        text
    )
}

/// Outcome of title generation. Always renders to a non-empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Title {
    Generated(String),
    Placeholder(String),
}

impl Title {
    pub fn as_str(&self) -> &str {
        match self {
            Title::Generated(s) | Title::Placeholder(s) => s,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Title::Placeholder(_))
    }

    pub fn into_string(self) -> String {
        match self {
            Title::Generated(s) | Title::Placeholder(s) => s,
        }
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct TitleGenerator {
    transport: Arc<dyn EcosystemTransport>,
    placeholder: String,
    timeout: Duration,
}

impl TitleGenerator {
    pub fn new(transport: Arc<dyn EcosystemTransport>) -> Self {
        Self {
            transport,
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Blank placeholders are ignored so a title is never empty.
    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        let placeholder = placeholder.into();
        if !placeholder.trim().is_empty() {
            self.placeholder = placeholder;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn placeholder(&self) -> Title {
        Title::Placeholder(self.placeholder.clone())
    }

    /// Title `text`, using the provider and model of `origin`.
    pub async fn generate(&self, origin: &SessionRequest, text: &str) -> Title {
        let request = origin.as_chat().with_prompt(title_prompt(text));

        match tokio::time::timeout(self.timeout, self.transport.sync_chat(&request)).await {
            Ok(Ok(completion)) => {
                let title = clean(&completion);
                if title.is_empty() {
                    warn!(provider = %origin.provider(), "Title generation returned nothing");
                    return self.placeholder();
                }
                debug!(title = %title, "Title generated");
                Title::Generated(title)
            }
            Ok(Err(e)) => {
                warn!(code = ?e.code(), error = %e, "Title generation failed");
                self.placeholder()
            }
            Err(_) => {
                warn!(after = ?self.timeout, "Title generation timed out");
                self.placeholder()
            }
        }
    }
}

fn clean(completion: &str) -> String {
    completion
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_text() {
        let prompt = title_prompt("Hello there!");
        assert!(prompt.starts_with("Generate a concise 3-5 word title"));
        assert!(prompt.contains("\nHello there!\n"));
        assert!(prompt.ends_with("Only return that Title in your response."));
    }

    #[test]
    fn test_clean_strips_quotes_and_whitespace() {
        assert_eq!(clean("  \"Friendly Greeting\" \n"), "Friendly Greeting");
        assert_eq!(clean(" \n "), "");
    }

    #[test]
    fn test_title_accessors() {
        let title = Title::Placeholder(DEFAULT_PLACEHOLDER.to_string());
        assert!(title.is_placeholder());
        assert_eq!(title.to_string(), "Untitled");

        let title = Title::Generated("Greeting".to_string());
        assert!(!title.is_placeholder());
        assert_eq!(title.into_string(), "Greeting");
    }

    use crate::session::Session;
    use xlm_grpc::{MockTransport, Rpc, TransportError};

    async fn origin(mock: &MockTransport) -> SessionRequest {
        Session::register(Arc::new(mock.clone()), "title-test")
            .await
            .unwrap()
            .chat_request("Hello", "openai", "gpt-4")
            .unwrap()
    }

    fn generator(mock: &MockTransport) -> TitleGenerator {
        TitleGenerator::new(Arc::new(mock.clone()))
    }

    #[tokio::test]
    async fn test_generated_title_uses_origin_provider_and_model() {
        let mock = MockTransport::new().with_completion(" 'Friendly Greeting' ");

        let title = generator(&mock).generate(&origin(&mock).await, "Hello!").await;

        assert_eq!(title, Title::Generated("Friendly Greeting".to_string()));
        let sent = &mock.chat_requests()[0];
        assert_eq!(sent.prompt, title_prompt("Hello!"));
        assert_eq!((sent.provider.as_str(), sent.model.as_str()), ("openai", "gpt-4"));
    }

    #[tokio::test]
    async fn test_transport_error_yields_placeholder() {
        let mock = MockTransport::new().fail_sync_chat_with(TransportError::Rpc {
            code: tonic::Code::Unavailable,
            message: "provider down".to_string(),
        });

        let title = generator(&mock).generate(&origin(&mock).await, "Hello!").await;

        assert_eq!(title, Title::Placeholder("Untitled".to_string()));
        assert_eq!(mock.calls(Rpc::SyncChat), 1);
    }

    #[tokio::test]
    async fn test_hung_call_times_out_to_placeholder() {
        let mock = MockTransport::new().hang_sync_chat();

        let title = tokio::time::timeout(
            Duration::from_secs(2),
            generator(&mock)
                .with_timeout(Duration::from_millis(50))
                .generate(&origin(&mock).await, "Hello!"),
        )
        .await
        .expect("generate returns once its own timeout fires");

        assert_eq!(title, Title::Placeholder("Untitled".to_string()));
    }

    #[tokio::test]
    async fn test_custom_placeholder() {
        let mock = MockTransport::new().fail_sync_chat_with(TransportError::StreamClosed);

        let title = generator(&mock)
            .with_placeholder("New chat")
            .generate(&origin(&mock).await, "Hello!")
            .await;

        assert_eq!(title, Title::Placeholder("New chat".to_string()));
    }

    #[tokio::test]
    async fn test_blank_placeholder_keeps_default() {
        let mock = MockTransport::new();

        let title = generator(&mock)
            .with_placeholder("")
            .generate(&origin(&mock).await, "Hello!")
            .await;

        assert_eq!(title, Title::Placeholder(DEFAULT_PLACEHOLDER.to_string()));
        assert!(!title.as_str().is_empty());
    }
}
