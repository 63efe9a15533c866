//! On-demand exporter for home devices.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use homeprobe_exporter::{Dispatcher, ExporterConfig, HttpServer, ScrapeStats, TargetRegistry};

/// Probe home devices on demand and serve their telemetry for Prometheus.
#[derive(Parser, Debug)]
#[command(name = "homeprobe-exporter")]
#[command(about = "Probe home devices on demand and serve their telemetry for Prometheus")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, default_value = "homeprobe.json5")]
    config: PathBuf,

    /// HTTP listen address (overrides config).
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level (overrides config).
    #[arg(long)]
    log_level: Option<String>,

    /// Serve exporter self-metrics on /metrics (overrides config).
    #[arg(long)]
    self_metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = ExporterConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Apply CLI overrides
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.self_metrics {
        config.server.self_metrics = true;
    }

    // Initialize logging
    homeprobe_common::init_tracing(&config.logging)?;

    info!(
        config = %args.config.display(),
        targets = config.targets.len(),
        "Starting homeprobe exporter"
    );

    // Parse listen address
    let listen_addr: SocketAddr = config
        .server
        .listen
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.server.listen))?;

    // Create components
    let registry = Arc::new(TargetRegistry::from_config(&config).context("Failed to build targets")?);
    let stats = Arc::new(ScrapeStats::new());
    let dispatcher = Arc::new(Dispatcher::new(registry, stats.clone()));

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start HTTP server
    let http_server = HttpServer::new(dispatcher, listen_addr, config.server.self_metrics);
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(shutdown_rx).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for the server to drain
    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    info!(requests = stats.requests(), "Exporter stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
