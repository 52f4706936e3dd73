//! # Relay Server
//!
//! Runs the email queue processor until interrupted.

use anyhow::Context;
use relay_config::ConfigLoader;
use relay_core::telemetry::init_tracing;
use relay_server::app::Application;
use relay_server::startup::{install_metrics_exporter, print_banner, print_startup_info};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // The subscriber may not be installed yet.
        eprintln!("Application error: {:#}", e);
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config_loader =
        ConfigLoader::from_default_location().context("Failed to load configuration")?;
    let config_dir = config_loader.config_dir().to_string();
    let config = config_loader.into_config();

    init_tracing(&config.observability.logging).context("Failed to initialize logging")?;

    print_banner();
    info!("Starting Relay...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_dir);
    print_startup_info(&config);

    install_metrics_exporter(&config.observability)
        .context("Failed to start metrics exporter")?;

    let app = Application::build(config)
        .await
        .context("Failed to build application")?;
    app.start().context("Failed to start queue processor")?;

    shutdown_signal().await;

    app.shutdown().await;
    info!("Relay shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
