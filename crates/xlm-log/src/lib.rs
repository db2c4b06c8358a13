// ABOUTME: Shared logging setup for xlm binaries
// ABOUTME: init() for plain stderr logging, init_for() to focus on one crate

use tracing_subscriber::EnvFilter;

/// Logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

/// Crate-focused logging to stderr. Default: INFO for the named crate, WARN elsewhere.
/// `verbose` raises the named crate to DEBUG, which includes per-call transport logs.
pub fn init_for(crate_name: &str, verbose: bool) {
    let filter = EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into())
        .add_directive(crate_directive(crate_name, verbose));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn crate_directive(crate_name: &str, verbose: bool) -> tracing_subscriber::filter::Directive {
    let level = if verbose { "debug" } else { "info" };
    format!("{}={}", crate_name.replace('-', "_"), level)
        .parse()
        .unwrap_or_else(|_| tracing::Level::INFO.into())
}
