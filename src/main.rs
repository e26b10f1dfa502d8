//! fwld - the foxhole-fw daemon.
//!
//! Wires the log pipeline, rule engine, and ban manager together and runs
//! them until SIGINT or SIGTERM requests a graceful shutdown.

use anyhow::Context;
use clap::Parser;
use foxhole_fw::config::{Config, ConfigStore, ConfigWatcher, LoggingConfig};
use foxhole_fw::firewall::{new_backend, BanManager};
use foxhole_fw::pipeline::{start_log_pipeline, CHANNEL_CAPACITY};
use foxhole_fw::rules::Engine;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Log-driven intrusion response daemon for HTTP-facing servers.
#[derive(Debug, Parser)]
#[command(name = "fwld", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "/etc/foxhole-fw/config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config).context("failed to load config")?;
    init_tracing(&config.logging);

    info!(version = env!("CARGO_PKG_VERSION"), "foxhole-fw starting");
    info!(
        path = %cli.config.display(),
        backend = config.backend.kind.as_str(),
        "config loaded"
    );

    // Root shutdown token, cancelled on SIGINT/SIGTERM.
    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            token.cancel();
        });
    }

    let store = Arc::new(ConfigStore::new(config.clone()));

    let watcher = match ConfigWatcher::spawn(cli.config.clone(), Arc::clone(&store)) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            error!(error = %e, "config watcher disabled");
            None
        }
    };

    let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (decisions_tx, decisions_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let mut handles = start_log_pipeline(token.clone(), &config, events_tx)
        .context("failed to start log pipeline")?;

    let backend =
        new_backend(&config, token.clone()).context("failed to create firewall backend")?;
    info!(backend = %backend.name(), "firewall backend initialized");

    let engine = Engine::new(Arc::clone(&store));
    let manager = BanManager::new(backend, &config.backend);

    handles.push(tokio::spawn({
        let token = token.clone();
        async move { engine.run(token, events_rx, decisions_tx).await }
    }));
    handles.push(tokio::spawn({
        let token = token.clone();
        async move { manager.run(token, decisions_rx).await }
    }));

    // Block until shutdown is requested, then stop the watcher explicitly
    // and join the pipeline tasks; channel closure cascades stage by stage.
    token.cancelled().await;
    info!("shutting down");

    if let Some(watcher) = watcher {
        watcher.stop().await;
    }
    for handle in handles {
        let _ = handle.await;
    }

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => { let _ = result; }
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
