//! Configuration validation module.
//!
//! Collects every problem in one pass so a bad deployment reports all of
//! them at startup.

use crate::{AppConfig, TransportKind};
use std::fmt;
use url::Url;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// A count that must be at least one was zero.
    ZeroValue { name: String },
    /// Timeout or interval value must be positive.
    NonPositiveDuration { name: String, value: u64 },
    /// Retry delay cap is below the base delay.
    RetryDelayCapTooSmall { base: u64, max: u64 },
    /// Hourly ceiling below the per-minute ceiling.
    HourlyLimitBelowMinute { per_minute: u32, per_hour: u32 },
    /// URL format is invalid.
    InvalidUrl { url_type: String, message: String },
    /// Sender address is not a plausible mailbox.
    InvalidFromAddress { value: String },
    /// SMTP transport selected without SMTP settings.
    MissingSmtpSettings,
    /// SMTP host is empty.
    EmptySmtpHost,
    /// Username given without password, or the reverse.
    IncompleteSmtpCredentials,
    /// Persistence enabled without a database URL.
    MissingDatabaseUrl,
    /// Metrics listen address cannot be parsed.
    InvalidListenAddress { value: String },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroValue { name } => write!(f, "'{}' must be at least 1", name),
            Self::NonPositiveDuration { name, value } => {
                write!(f, "Duration '{}' must be positive, got {}", name, value)
            }
            Self::RetryDelayCapTooSmall { base, max } => {
                write!(
                    f,
                    "max_retry_delay_ms ({}) cannot be less than base_retry_delay_ms ({})",
                    max, base
                )
            }
            Self::HourlyLimitBelowMinute { per_minute, per_hour } => {
                write!(
                    f,
                    "per_hour ({}) cannot be less than per_minute ({})",
                    per_hour, per_minute
                )
            }
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {} URL: {}", url_type, message)
            }
            Self::InvalidFromAddress { value } => {
                write!(f, "Invalid sender address: '{}'", value)
            }
            Self::MissingSmtpSettings => {
                write!(f, "SMTP settings required when transport kind is 'smtp'")
            }
            Self::EmptySmtpHost => write!(f, "SMTP host cannot be empty"),
            Self::IncompleteSmtpCredentials => {
                write!(f, "SMTP username and password must be set together")
            }
            Self::MissingDatabaseUrl => {
                write!(f, "Database URL required when persistence is enabled")
            }
            Self::InvalidListenAddress { value } => {
                write!(f, "Invalid metrics listen address: '{}'", value)
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Result of configuration validation containing all errors found.
#[derive(Debug)]
pub struct ValidationResult {
    errors: Vec<ConfigValidationError>,
}

impl ValidationResult {
    fn new() -> Self {
        Self { errors: Vec::new() }
    }

    fn add_error(&mut self, error: ConfigValidationError) {
        self.errors.push(error);
    }

    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the validation errors.
    pub fn errors(&self) -> &[ConfigValidationError] {
        &self.errors
    }

    /// Converts to Result, returning Err with all errors if any exist.
    pub fn into_result(self) -> Result<(), Vec<ConfigValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut result = ValidationResult::new();

        Self::validate_queue(&config.queue, &mut result);
        Self::validate_rate_limit(&config.rate_limit, &mut result);
        Self::validate_transport(&config.transport, &mut result);
        Self::validate_templates(&config.templates, &mut result);
        Self::validate_observability(&config.observability, &mut result);

        result.into_result()
    }

    fn validate_queue(config: &crate::QueueConfig, result: &mut ValidationResult) {
        if config.batch_size == 0 {
            result.add_error(ConfigValidationError::ZeroValue {
                name: "queue.batch_size".to_string(),
            });
        }

        for (name, value) in [
            ("queue.tick_interval_ms", config.tick_interval_ms),
            ("queue.base_retry_delay_ms", config.base_retry_delay_ms),
            ("queue.send_timeout_ms", config.send_timeout_ms),
        ] {
            if value == 0 {
                result.add_error(ConfigValidationError::NonPositiveDuration {
                    name: name.to_string(),
                    value,
                });
            }
        }

        if config.max_retry_delay_ms < config.base_retry_delay_ms {
            result.add_error(ConfigValidationError::RetryDelayCapTooSmall {
                base: config.base_retry_delay_ms,
                max: config.max_retry_delay_ms,
            });
        }

        if config.persistence_enabled && config.database_url.trim().is_empty() {
            result.add_error(ConfigValidationError::MissingDatabaseUrl);
        }
    }

    fn validate_rate_limit(config: &crate::RateLimitConfig, result: &mut ValidationResult) {
        if config.per_minute == 0 {
            result.add_error(ConfigValidationError::ZeroValue {
                name: "rate_limit.per_minute".to_string(),
            });
        }

        let per_hour = config.effective_per_hour();
        if per_hour < config.per_minute {
            result.add_error(ConfigValidationError::HourlyLimitBelowMinute {
                per_minute: config.per_minute,
                per_hour,
            });
        }
    }

    fn validate_transport(config: &crate::TransportConfig, result: &mut ValidationResult) {
        let from = config.from_address.trim();
        let plausible = from
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
        if !plausible {
            result.add_error(ConfigValidationError::InvalidFromAddress {
                value: config.from_address.clone(),
            });
        }

        if config.kind != TransportKind::Smtp {
            return;
        }

        match &config.smtp {
            None => result.add_error(ConfigValidationError::MissingSmtpSettings),
            Some(smtp) => {
                if smtp.host.trim().is_empty() {
                    result.add_error(ConfigValidationError::EmptySmtpHost);
                }
                if smtp.username.is_some() != smtp.password.is_some() {
                    result.add_error(ConfigValidationError::IncompleteSmtpCredentials);
                }
            }
        }
    }

    fn validate_templates(config: &crate::TemplateConfig, result: &mut ValidationResult) {
        if let Err(e) = Url::parse(&config.site_url) {
            result.add_error(ConfigValidationError::InvalidUrl {
                url_type: "site".to_string(),
                message: e.to_string(),
            });
        }
    }

    fn validate_observability(config: &crate::ObservabilityConfig, result: &mut ValidationResult) {
        if config.metrics_enabled && config.metrics_addr.parse::<std::net::SocketAddr>().is_err() {
            result.add_error(ConfigValidationError::InvalidListenAddress {
                value: config.metrics_addr.clone(),
            });
        }
    }
}

/// Formats validation errors for display.
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    let mut output = String::from("Configuration validation failed:\n");
    for (i, error) in errors.iter().enumerate() {
        output.push_str(&format!("  {}. {}\n", i + 1, error));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SmtpConfig;

    fn valid_config() -> AppConfig {
        AppConfig::default()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.queue.batch_size = 0;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.contains(&ConfigValidationError::ZeroValue {
            name: "queue.batch_size".to_string()
        }));
    }

    #[test]
    fn test_zero_retry_budget_is_allowed() {
        let mut config = valid_config();
        config.queue.max_retries = 0;

        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_retry_cap_below_base() {
        let mut config = valid_config();
        config.queue.base_retry_delay_ms = 10_000;
        config.queue.max_retry_delay_ms = 5_000;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigValidationError::RetryDelayCapTooSmall { .. })));
    }

    #[test]
    fn test_hourly_limit_below_minute() {
        let mut config = valid_config();
        config.rate_limit.per_minute = 100;
        config.rate_limit.per_hour = Some(50);

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ConfigValidationError::HourlyLimitBelowMinute {
                per_minute: 100,
                per_hour: 50
            }]
        );
    }

    #[test]
    fn test_smtp_requires_settings() {
        let mut config = valid_config();
        config.transport.kind = TransportKind::Smtp;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.contains(&ConfigValidationError::MissingSmtpSettings));

        config.transport.smtp = Some(SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: Some("mailer".to_string()),
            password: None,
            starttls: true,
        });
        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors, vec![ConfigValidationError::IncompleteSmtpCredentials]);
    }

    #[test]
    fn test_invalid_site_url() {
        let mut config = valid_config();
        config.templates.site_url = "not a url".to_string();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigValidationError::InvalidUrl { .. })));
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = valid_config();
        config.queue.batch_size = 0;
        config.rate_limit.per_minute = 0;
        config.transport.from_address = "nobody".to_string();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.len() >= 3);

        let formatted = format_validation_errors(&errors);
        assert!(formatted.starts_with("Configuration validation failed:"));
        assert!(formatted.contains("1."));
    }
}
