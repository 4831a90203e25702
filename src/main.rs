use clap::Parser;
use std::sync::Arc;
use switchyard::config::Config;
use switchyard::state::RuntimeState;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

/// switchyard — reconfigurable layer-7 reverse proxy and load balancer
#[derive(Parser)]
#[command(name = "switchyard", version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "./config.yaml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    tracing::info!("switchyard v{}", env!("CARGO_PKG_VERSION"));

    let state = Arc::new(RuntimeState::new());

    // Cold start: configuration errors are fatal here, tolerated on reload
    tracing::info!(config = cli.config, "Loading configuration");
    let config = Config::load(&cli.config).await?;
    switchyard::reload::apply(&state, &config, true).await?;
    tracing::info!("Proxy is running — send SIGHUP to reload, Ctrl+C to stop");

    let mut hangups = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = hangups.recv() => {
                tracing::info!(config = cli.config, "Reload signal received");
                match Config::load(&cli.config).await {
                    Ok(config) => {
                        if let Err(e) = switchyard::reload::apply(&state, &config, false).await {
                            tracing::error!(error = %e, "Reload failed, keeping current config");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Config reload failed, keeping current config");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("Shutting down");
    switchyard::reload::shutdown(&state).await;

    Ok(())
}
