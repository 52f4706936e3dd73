//! Server startup utilities.

use metrics_exporter_prometheus::PrometheusBuilder;
use relay_config::{AppConfig, ObservabilityConfig};
use relay_core::{RelayError, RelayResult};
use std::net::SocketAddr;
use tracing::info;

/// Histogram buckets in seconds, from fast log sends to slow SMTP relays.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Installs the Prometheus recorder with its scrape endpoint and registers
/// the queue metric descriptions.
///
/// Must be called from within a Tokio runtime.
pub fn install_metrics_exporter(config: &ObservabilityConfig) -> RelayResult<()> {
    if !config.metrics_enabled {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    let addr: SocketAddr = config.metrics_addr.parse().map_err(|e| {
        RelayError::Configuration(format!("Invalid metrics address '{}': {}", config.metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(DURATION_BUCKETS)
        .map_err(|e| RelayError::Configuration(format!("Invalid histogram buckets: {}", e)))?
        .install()
        .map_err(|e| RelayError::Internal(format!("Failed to install metrics exporter: {}", e)))?;

    relay_queue::metrics::register_metrics();
    info!("Prometheus metrics available on http://{}/metrics", addr);
    Ok(())
}

/// Prints the startup banner.
pub fn print_banner() {
    info!(r#"
    ____       __
   / __ \___  / /___ ___  __
  / /_/ / _ \/ / __ `/ / / /
 / _, _/  __/ / /_/ / /_/ /
/_/ |_|\___/_/\__,_/\__, /
                   /____/
    "#);
}

/// Prints the effective queue settings.
pub fn print_startup_info(config: &AppConfig) {
    let separator = "=".repeat(60);
    info!("{}", separator);
    info!("Environment:  {}", config.app.environment);
    info!("Transport:    {:?}", config.transport.kind);
    info!(
        "Store:        {}",
        if config.queue.persistence_enabled {
            config.queue.database_url.as_str()
        } else {
            "in-memory"
        }
    );
    info!(
        "Queue:        batch {} every {}ms, {} retries",
        config.queue.batch_size, config.queue.tick_interval_ms, config.queue.max_retries
    );
    info!(
        "Rate limit:   {}/min, {}/hour",
        config.rate_limit.per_minute,
        config.rate_limit.effective_per_hour()
    );
    info!("{}", separator);
}
