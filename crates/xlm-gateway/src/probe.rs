// ABOUTME: End-to-end smoke test of an ecosystem backend.
// ABOUTME: Registers, inspects providers, chats both ways, embeds and unregisters, reporting to a writer.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tracing::{info, warn};
use xlm_grpc::{EcosystemTransport, CAPABILITY_CHAT, CAPABILITY_EMBEDDING};

use crate::config::NegotiationPolicy;
use crate::relay::StreamingRelay;
use crate::session::Session;
use crate::title::TitleGenerator;

pub const DEFAULT_PROBE_PROMPT: &str = "Hello! Briefly introduce yourself.";

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub client_name: String,
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub stream_timeout: Duration,
    /// Whether a refused negotiation ends the run.
    pub negotiation_policy: NegotiationPolicy,
}

/// What the probe observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    pub client_id: String,
    pub providers: Vec<String>,
    pub negotiated: bool,
    pub completion: String,
    pub streamed: Vec<String>,
    pub embedding_len: Option<usize>,
    pub unregistered: bool,
}

/// Run the probe sequence, writing progress to `out`.
///
/// Registration denial aborts immediately. Once registered, the client is
/// unregistered even when a later step fails.
pub async fn run_probe<W: Write + Send>(
    transport: Arc<dyn EcosystemTransport>,
    options: &ProbeOptions,
    out: &mut W,
) -> Result<ProbeReport> {
    let session = Session::register(Arc::clone(&transport), &options.client_name)
        .await
        .context("registering probe client")?;
    writeln!(out, "Registered as {} ({})", options.client_name, session.client_id())?;

    let mut report = ProbeReport {
        client_id: session.client_id().to_string(),
        ..ProbeReport::default()
    };

    let outcome = exercise(&session, transport, options, out, &mut report).await;

    match session.unregister().await {
        Ok(acknowledged) => {
            report.unregistered = acknowledged;
            writeln!(out, "Unregistered: {}", acknowledged)?;
        }
        Err(e) => {
            warn!(error = %e, "Probe unregister failed");
            writeln!(out, "Unregister failed: {}", e)?;
        }
    }

    outcome.map(|()| report)
}

async fn exercise<W: Write + Send>(
    session: &Session,
    transport: Arc<dyn EcosystemTransport>,
    options: &ProbeOptions,
    out: &mut W,
    report: &mut ProbeReport,
) -> Result<()> {
    let providers = session.list_providers().await.context("listing providers")?;
    writeln!(out, "Providers ({}):", providers.len())?;
    for provider in &providers {
        writeln!(out, "  {} [{}]", provider.provider_name, provider.service_level)?;
    }
    report.providers = providers.into_iter().map(|p| p.provider_name).collect();

    let descriptor = session
        .provider_capabilities(&options.provider)
        .await
        .with_context(|| format!("querying capabilities of {}", options.provider))?;
    writeln!(out, "Capabilities of {}:", descriptor.provider_name)?;
    for (capability, supported) in &descriptor.capabilities {
        writeln!(out, "  {}: {}", capability, supported)?;
    }

    match session
        .negotiate_capabilities(&options.provider, [CAPABILITY_CHAT, CAPABILITY_EMBEDDING])
        .await
    {
        Ok(()) => {
            report.negotiated = true;
            writeln!(out, "Negotiated chat and embedding with {}", options.provider)?;
        }
        Err(e) if options.negotiation_policy == NegotiationPolicy::Continue => {
            warn!(provider = %options.provider, error = %e, "Negotiation failed, continuing");
            writeln!(out, "Negotiation failed ({}), continuing with backend defaults", e)?;
        }
        Err(e) => return Err(anyhow::Error::new(e).context("negotiating capabilities")),
    }

    let request = session.chat_request(
        options.prompt.as_str(),
        options.provider.as_str(),
        options.model.as_str(),
    )?;
    report.completion = transport
        .sync_chat(request.as_chat())
        .await
        .context("synchronous chat")?;
    writeln!(out, "Sync chat: {}", report.completion)?;

    let titles = TitleGenerator::new(Arc::clone(&transport));
    let relay = StreamingRelay::new(transport, titles, options.stream_timeout);
    let mut tokens = relay
        .stream_chat(&request)
        .await
        .context("opening streaming chat")?;
    write!(out, "Streaming chat: ")?;
    let streamed = tokio::time::timeout(options.stream_timeout, async {
        while let Some(token) = tokens.next().await {
            let token = token.context("streaming chat")?;
            write!(out, "{}", token.text)?;
            out.flush()?;
            report.streamed.push(token.text);
        }
        anyhow::Ok(())
    })
    .await;
    writeln!(out)?;
    streamed.context("streaming chat timed out")??;
    info!(fragments = report.streamed.len(), "Probe stream complete");

    match session
        .embed_if_supported(&options.provider, &options.prompt)
        .await
        .context("requesting embedding")?
    {
        Some(embedding) => {
            writeln!(out, "Embedding: {} dimensions", embedding.len())?;
            report.embedding_len = Some(embedding.len());
        }
        None => writeln!(out, "Embedding: not supported by {}", options.provider)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use xlm_grpc::{MockTransport, ProviderDescriptor, Rpc};

    fn provider(name: &str, embedding: bool) -> ProviderDescriptor {
        let mut capabilities = BTreeMap::new();
        capabilities.insert(CAPABILITY_CHAT.to_string(), true);
        capabilities.insert(CAPABILITY_EMBEDDING.to_string(), embedding);
        ProviderDescriptor {
            provider_name: name.to_string(),
            service_level: "LEVEL_2".to_string(),
            capabilities,
        }
    }

    fn options(provider: &str) -> ProbeOptions {
        ProbeOptions {
            client_name: "probe".to_string(),
            provider: provider.to_string(),
            model: "gpt-4".to_string(),
            prompt: "Hello".to_string(),
            stream_timeout: Duration::from_secs(5),
            negotiation_policy: NegotiationPolicy::Abort,
        }
    }

    #[tokio::test]
    async fn test_full_sequence() {
        let mock = MockTransport::new()
            .with_provider(provider("openai", true))
            .with_tokens(["Hel", "lo!"])
            .with_completion("Hi there")
            .with_embedding(vec![0.5; 4]);
        let mut out = Vec::new();

        let report = run_probe(Arc::new(mock.clone()), &options("openai"), &mut out)
            .await
            .unwrap();

        assert_eq!(report.providers, vec!["openai"]);
        assert!(report.negotiated);
        assert_eq!(report.completion, "Hi there");
        assert_eq!(report.streamed, vec!["Hel", "lo!"]);
        assert_eq!(report.embedding_len, Some(4));
        assert!(report.unregistered);
        assert_eq!(mock.calls(Rpc::UnregisterClient), 1);

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("Streaming chat: Hello!\n"));
        assert!(printed.contains("Embedding: 4 dimensions"));
    }

    #[tokio::test]
    async fn test_denied_negotiation_aborts_under_abort_policy() {
        let mock = MockTransport::new()
            .with_provider(provider("openai", true))
            .deny_negotiation();
        let mut out = Vec::new();

        let err = run_probe(Arc::new(mock.clone()), &options("openai"), &mut out)
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("negotiating capabilities"));
        assert_eq!(mock.calls(Rpc::SyncChat), 0);
        assert_eq!(mock.calls(Rpc::AsyncChat), 0);
        assert_eq!(mock.calls(Rpc::UnregisterClient), 1);
    }

    #[tokio::test]
    async fn test_denied_negotiation_continues_under_continue_policy() {
        let mock = MockTransport::new()
            .with_provider(provider("openai", true))
            .with_tokens(["Hi"])
            .with_completion("Hi")
            .deny_negotiation();
        let mut out = Vec::new();
        let options = ProbeOptions {
            negotiation_policy: NegotiationPolicy::Continue,
            ..options("openai")
        };

        let report = run_probe(Arc::new(mock.clone()), &options, &mut out)
            .await
            .unwrap();

        assert!(!report.negotiated);
        assert_eq!(report.streamed, vec!["Hi"]);
        assert_eq!(mock.calls(Rpc::SyncChat), 1);
        assert_eq!(mock.calls(Rpc::AsyncChat), 1);
        assert!(String::from_utf8(out)
            .unwrap()
            .contains("continuing with backend defaults"));
    }

    #[tokio::test]
    async fn test_skips_embedding_when_unsupported() {
        let mock = MockTransport::new().with_provider(provider("claude", false));
        let mut out = Vec::new();

        let report = run_probe(Arc::new(mock.clone()), &options("claude"), &mut out)
            .await
            .unwrap();

        assert_eq!(report.embedding_len, None);
        assert_eq!(mock.calls(Rpc::GetEmbedding), 0);
    }

    #[tokio::test]
    async fn test_denied_registration_stops_everything() {
        let mock = MockTransport::new().deny_registration();
        let mut out = Vec::new();

        assert!(run_probe(Arc::new(mock.clone()), &options("openai"), &mut out)
            .await
            .is_err());
        assert_eq!(mock.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_unregisters_after_failed_step() {
        // unknown provider fails the capability query
        let mock = MockTransport::new();
        let mut out = Vec::new();

        assert!(run_probe(Arc::new(mock.clone()), &options("missing"), &mut out)
            .await
            .is_err());
        assert_eq!(mock.calls(Rpc::UnregisterClient), 1);
        assert_eq!(mock.calls(Rpc::SyncChat), 0);
    }
}
