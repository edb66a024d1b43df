mod adapters;
mod config;
mod core;
mod protocol;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use config::{Cli, Config};
use core::{MdnsManager, MdnsSdEngine, NoopWatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();

    let config = Config::from_cli(&cli);
    startup_diagnostics(&config);

    let cancel = CancellationToken::new();
    let engine = Arc::new(MdnsSdEngine::new()?);
    let manager = Arc::new(MdnsManager::with_hooks(
        engine,
        Arc::new(NoopWatcher),
        cancel.clone(),
    ));

    // IPC adapter
    {
        let manager = manager.clone();
        let path = config.pipe_path.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = adapters::pipe::start(manager, path, cancel).await {
                tracing::error!(error = %e, "IPC adapter failed");
            }
        });
    }

    // Interface watcher: restart the engine when addresses churn
    if !config.no_watch {
        let (if_tx, if_rx) = flume::unbounded();
        tokio::spawn(core::netwatch::poll_interfaces(if_tx, cancel.clone()));
        core::netwatch::watch(manager.clone(), if_rx, cancel.clone());
    }

    tracing::info!("Ready.");

    shutdown_signal().await;
    tracing::info!("Shutting down...");
    manager.shutdown();

    Ok(())
}

/// Wait for Ctrl+C.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for Ctrl+C");
}

/// Print startup diagnostics.
fn startup_diagnostics(config: &Config) {
    tracing::info!("Herald v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!("Platform: {}", std::env::consts::OS);

    match hostname::get() {
        Ok(h) => tracing::info!("Hostname: {}", h.to_string_lossy()),
        Err(e) => tracing::warn!(error = %e, "Could not determine hostname"),
    }

    tracing::info!("mDNS engine: mdns-sd");
    tracing::info!("IPC: {}", config.pipe_path.display());
    if config.no_watch {
        tracing::info!("Interface watcher: disabled");
    }
}
