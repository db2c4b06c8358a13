// ABOUTME: Entry point for the xlm-gateway binary.
// ABOUTME: Runs the chat gateway or a one-shot probe against an ecosystem backend.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use xlm_gateway::config::{GatewayConfig, NegotiationPolicy, Overrides};
use xlm_gateway::probe::{self, ProbeOptions, DEFAULT_PROBE_PROMPT};
use xlm_grpc::{CallTimeouts, ChannelConfig, EcosystemTransport, GrpcTransport};

/// Default ecosystem backend address
const DEFAULT_BACKEND: &str = "http://127.0.0.1:50051";

#[derive(Parser)]
#[command(name = "xlm-gateway")]
#[command(about = "Chat gateway relaying XLM ecosystem token streams to web clients")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging for the gateway
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP and WebSocket gateway
    Serve {
        /// Config file path
        #[arg(short, long, env = "XLM_GATEWAY_CONFIG")]
        config: Option<PathBuf>,

        /// Backend address (host:port or URL)
        #[arg(long, env = "XLM_BACKEND")]
        backend: Option<String>,

        /// Address to listen on
        #[arg(long)]
        listen: Option<String>,

        /// Client name announced at registration
        #[arg(long)]
        client_name: Option<String>,

        /// Provider to negotiate and chat with
        #[arg(long)]
        provider: Option<String>,

        /// Model requested from the provider
        #[arg(long)]
        model: Option<String>,
    },

    /// Exercise every backend operation once and report the results
    Probe {
        /// Backend address (host:port or URL)
        #[arg(long, env = "XLM_BACKEND", default_value = DEFAULT_BACKEND)]
        backend: String,

        #[arg(long, default_value = "openai")]
        provider: String,

        #[arg(long, default_value = "gpt-4")]
        model: String,

        #[arg(long, default_value = DEFAULT_PROBE_PROMPT)]
        prompt: String,

        #[arg(long, default_value = "xlm-probe")]
        client_name: String,

        /// Whether a refused capability negotiation stops the probe
        #[arg(long, value_enum, default_value_t = NegotiationPolicy::Abort)]
        negotiation_policy: NegotiationPolicy,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    xlm_log::init_for("xlm-gateway", cli.verbose);

    match cli.command {
        Commands::Serve {
            config,
            backend,
            listen,
            client_name,
            provider,
            model,
        } => {
            let config = GatewayConfig::load(config.as_deref())
                .context("loading configuration")?
                .apply(Overrides {
                    backend,
                    listen_addr: listen,
                    client_name,
                    provider,
                    model,
                })
                .context("applying command-line overrides")?;
            xlm_gateway::run(config).await
        }
        Commands::Probe {
            backend,
            provider,
            model,
            prompt,
            client_name,
            negotiation_policy,
        } => {
            let timeouts = CallTimeouts::default();
            let transport = GrpcTransport::connect(&ChannelConfig::new(&backend), timeouts)
                .await
                .with_context(|| format!("connecting to backend at {}", backend))?;
            let transport: Arc<dyn EcosystemTransport> = Arc::new(transport);

            let options = ProbeOptions {
                client_name,
                provider,
                model,
                prompt,
                stream_timeout: timeouts.stream,
                negotiation_policy,
            };
            probe::run_probe(transport, &options, &mut std::io::stdout()).await?;
            Ok(())
        }
    }
}
