//! Dial-out telemetry exporter for optical transport devices.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use optiwatch_common::init_tracing;
use optiwatch_exporter::{
    DialoutServer, Dispatcher, ExporterConfig, HttpServer, SessionRegistry,
};

/// Dial-out telemetry exporter.
#[derive(Parser, Debug)]
#[command(name = "optiwatch-exporter")]
#[command(about = "Receive dial-out telemetry and export it as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// Dial-out listen address (overrides config).
    #[arg(long)]
    dialout_listen: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    http_listen: Option<String>,

    /// Log level (overrides config).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    // Apply CLI overrides
    if let Some(listen) = args.dialout_listen {
        config.dialout.listen = listen;
    }
    if let Some(listen) = args.http_listen {
        config.http.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging)?;

    info!("Starting optiwatch exporter");

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Shared state: the session registry feeds both the dial-out receiver
    // and the probe handler.
    let registry = Arc::new(SessionRegistry::new());
    let dispatcher = Arc::new(Dispatcher::standard());

    let http_listen = config
        .http
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid HTTP listen address: {}", e))?;

    // Bind failures here are the only process-fatal errors.
    let dialout_server =
        DialoutServer::bind(config.dialout.clone(), registry.clone(), dispatcher).await?;
    let http_server = HttpServer::new(registry.clone(), http_listen);

    let dialout_shutdown = shutdown_rx.clone();
    let dialout_task = tokio::spawn(async move {
        if let Err(e) = dialout_server.run(dialout_shutdown).await {
            error!("Dial-out server error: {}", e);
        }
    });

    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).unwrap();
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = dialout_task.await;
        let _ = http_task.await;
    })
    .await;

    info!(
        sessions_active = registry.session_count(),
        "Exporter stopped"
    );
    Ok(())
}
