//! Application configuration structures.

use relay_core::telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Queue and processor configuration.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Send rate ceilings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retention of terminal jobs.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Outbound transport selection.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Template rendering context.
    #[serde(default)]
    pub templates: TemplateConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "relay".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Queue and processor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Jobs claimed per processor tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delay between processor ticks in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Delivery attempts allowed per job before it fails terminally.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay of the exponential retry backoff in milliseconds.
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,

    /// Upper bound of a single retry delay in milliseconds.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Jobs of one batch delivered in parallel. Zero means "batch size".
    #[serde(default)]
    pub concurrency: usize,

    /// Timeout of a single transport send in milliseconds.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Store jobs in SQLite instead of memory.
    #[serde(default)]
    pub persistence_enabled: bool,

    /// SQLite URL used when persistence is enabled.
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            tick_interval_ms: default_tick_interval_ms(),
            max_retries: default_max_retries(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            concurrency: 0,
            send_timeout_ms: default_send_timeout_ms(),
            persistence_enabled: false,
            database_url: default_database_url(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_retry_delay_ms() -> u64 {
    60_000 // 1 minute
}

fn default_max_retry_delay_ms() -> u64 {
    3_600_000 // 1 hour
}

fn default_send_timeout_ms() -> u64 {
    30_000
}

fn default_database_url() -> String {
    "sqlite://relay.db?mode=rwc".to_string()
}

impl QueueConfig {
    /// Returns the tick interval as a Duration.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Returns the base retry delay as a Duration.
    #[must_use]
    pub const fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    /// Returns the retry delay cap as a Duration.
    #[must_use]
    pub const fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    /// Returns the send timeout as a Duration.
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Returns the effective in-tick concurrency.
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency == 0 {
            self.batch_size.max(1)
        } else {
            self.concurrency
        }
    }
}

/// Send rate ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sends allowed per rolling minute.
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,

    /// Sends allowed per rolling hour; defaults to ten times `per_minute`.
    #[serde(default)]
    pub per_hour: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            per_hour: None,
        }
    }
}

fn default_per_minute() -> u32 {
    60
}

impl RateLimitConfig {
    /// Returns the hourly ceiling, falling back to ten times the minute ceiling.
    #[must_use]
    pub fn effective_per_hour(&self) -> u32 {
        self.per_hour
            .unwrap_or_else(|| self.per_minute.saturating_mul(10))
    }
}

/// Retention of terminal jobs before the cleanup pass prunes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Seconds a `sent` job is kept.
    #[serde(default = "default_sent_retention")]
    pub sent_retention_secs: u64,

    /// Seconds a `cancelled` job is kept.
    #[serde(default = "default_cancelled_retention")]
    pub cancelled_retention_secs: u64,

    /// Seconds an exhausted `failed` job is kept.
    #[serde(default = "default_failed_retention")]
    pub failed_retention_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sent_retention_secs: default_sent_retention(),
            cancelled_retention_secs: default_cancelled_retention(),
            failed_retention_secs: default_failed_retention(),
        }
    }
}

fn default_sent_retention() -> u64 {
    86_400 // 1 day
}

fn default_cancelled_retention() -> u64 {
    86_400
}

fn default_failed_retention() -> u64 {
    86_400 * 7 // 7 days
}

/// Which transport delivers messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Write messages to the log (development).
    #[default]
    Log,
    /// Relay through an SMTP server.
    Smtp,
}

/// Outbound transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Transport implementation.
    #[serde(default)]
    pub kind: TransportKind,

    /// Envelope sender address.
    #[serde(default = "default_from_address")]
    pub from_address: String,

    /// Display name of the sender.
    #[serde(default)]
    pub from_name: Option<String>,

    /// SMTP settings, required when `kind = "smtp"`.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            from_address: default_from_address(),
            from_name: None,
            smtp: None,
        }
    }
}

fn default_from_address() -> String {
    "no-reply@localhost".to_string()
}

/// SMTP relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Relay host name.
    pub host: String,
    /// Relay port.
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Login user name.
    #[serde(default)]
    pub username: Option<String>,
    /// Login password.
    #[serde(default)]
    pub password: Option<String>,
    /// Upgrade the connection with STARTTLS.
    #[serde(default = "default_starttls")]
    pub starttls: bool,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_starttls() -> bool {
    true
}

/// Template rendering context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Site name exposed to templates as `{{siteName}}`.
    #[serde(default = "default_site_name")]
    pub site_name: String,

    /// Site URL exposed to templates as `{{siteUrl}}`.
    #[serde(default = "default_site_url")]
    pub site_url: String,

    /// Theme used when a request names none or an unknown one.
    #[serde(default = "default_theme")]
    pub default_theme: String,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            site_name: default_site_name(),
            site_url: default_site_url(),
            default_theme: default_theme(),
        }
    }
}

fn default_site_name() -> String {
    "Relay".to_string()
}

fn default_site_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_theme() -> String {
    "default".to_string()
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing subscriber settings.
    #[serde(default)]
    pub logging: TelemetryConfig,

    /// Install the Prometheus exporter.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,

    /// Listen address of the Prometheus scrape endpoint.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            logging: TelemetryConfig::default(),
            metrics_enabled: default_metrics_enabled(),
            metrics_addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}
