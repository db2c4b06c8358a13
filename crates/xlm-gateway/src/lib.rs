// ABOUTME: Library root for xlm-gateway.
// ABOUTME: Exports the session, relay, title, supervisor and server modules plus the run entry point.

pub mod config;
pub mod error;
pub mod events;
pub mod probe;
pub mod relay;
pub mod server;
pub mod session;
pub mod sink;
pub mod supervisor;
pub mod title;

pub use config::{GatewayConfig, NegotiationPolicy, Overrides};
pub use error::{GatewayError, Result};
pub use events::{RelayEvent, RequestId, TokenEvent};
pub use probe::{run_probe, ProbeOptions, ProbeReport};
pub use relay::{RelayOutcome, StreamingRelay};
pub use server::AppState;
pub use session::{ClientIdentity, Session, SessionManager, SessionRequest, SessionState};
pub use sink::{ChannelSink, EventHub, EventSink};
pub use supervisor::RelaySupervisor;
pub use title::{Title, TitleGenerator};

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use xlm_grpc::{EcosystemTransport, GrpcTransport};

/// Establish the backend session and assemble the shared handler state.
///
/// Nothing is served before the handshake succeeds.
pub async fn bootstrap(
    transport: Arc<dyn EcosystemTransport>,
    config: &GatewayConfig,
    shutdown: CancellationToken,
) -> Result<AppState> {
    let manager = SessionManager::new(Arc::clone(&transport), config.session.clone());
    let session = manager.establish().await?;

    let titles = TitleGenerator::new(Arc::clone(&transport))
        .with_placeholder(config.title.placeholder.clone())
        .with_timeout(config.call_timeouts().unary);
    let relay = StreamingRelay::new(transport, titles, config.call_timeouts().stream);

    Ok(AppState {
        session,
        relay: Arc::new(relay),
        supervisor: RelaySupervisor::new(config.server.max_concurrent_streams),
        hub: EventHub::default(),
        provider: config.session.provider.clone(),
        model: config.session.model.clone(),
        shutdown,
    })
}

/// Run the gateway until Ctrl+C or SIGTERM.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    info!(
        backend = %config.backend.address,
        provider = %config.session.provider,
        model = %config.session.model,
        "xlm-gateway starting"
    );

    let transport = GrpcTransport::connect(&config.channel_config(), config.call_timeouts())
        .await
        .with_context(|| format!("connecting to backend at {}", config.backend.address))?;
    let transport: Arc<dyn EcosystemTransport> = Arc::new(transport);

    let shutdown = CancellationToken::new();
    let state = bootstrap(transport, &config, shutdown.clone())
        .await
        .context("establishing backend session")?;
    info!(client_id = %state.session.client_id(), "Session established");

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.server.listen_addr))?;

    let on_signal = shutdown.clone();
    let served = server::serve(listener, state.clone(), async move {
        server::shutdown_signal().await;
        on_signal.cancel();
    })
    .await;

    shutdown.cancel();
    state.supervisor.shutdown().await;
    if let Err(e) = state.session.unregister().await {
        warn!(error = %e, "Unregister on shutdown failed");
    }

    served.context("serving HTTP")?;
    info!("Gateway shut down gracefully");
    Ok(())
}
