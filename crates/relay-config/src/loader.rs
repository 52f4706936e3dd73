//! Configuration loader with layered sources.

use crate::{format_validation_errors, AppConfig, ConfigValidator};
use config::{Config, ConfigError, Environment, File};
use relay_core::RelayError;
use std::path::Path;
use tracing::{debug, info, warn};

/// Environment variable selecting the environment overlay file.
pub const ENVIRONMENT_VAR: &str = "RELAY_ENVIRONMENT";

/// Loads and validates the layered configuration once at startup.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config: AppConfig,
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Local overrides
    /// 4. Environment variables with `RELAY__` prefix
    pub fn new(config_dir: impl Into<String>) -> Result<Self, RelayError> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir)?;

        Ok(Self { config, config_dir })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, RelayError> {
        Self::new("./config")
    }

    /// The validated configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Directory the layers were read from.
    pub fn config_dir(&self) -> &str {
        &self.config_dir
    }

    /// Consumes the loader, returning the configuration.
    pub fn into_config(self) -> AppConfig {
        self.config
    }

    /// Loads configuration from the specified directory.
    fn load_config(config_dir: &str) -> Result<AppConfig, RelayError> {
        // Load .env file if present
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment =
            std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string());

        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = format!("{}/{}.toml", config_dir, name);
            if Path::new(&path).exists() {
                debug!("Loading config layer from: {}", path);
                builder = builder.add_source(File::with_name(&path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_error_to_relay_error)?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .map_err(config_error_to_relay_error)?;
        app_config.app.environment = environment;

        ConfigValidator::validate(&app_config).map_err(|errors| {
            RelayError::Configuration(format_validation_errors(&errors))
        })?;

        if app_config.app.environment == "production"
            && app_config.transport.kind == crate::TransportKind::Log
        {
            warn!("Log transport selected in production; no mail will leave this host");
        }

        Ok(app_config)
    }
}

fn config_error_to_relay_error(err: ConfigError) -> RelayError {
    RelayError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_loads_default_layer() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
[queue]
batch_size = 4
max_retries = 5

[rate_limit]
per_minute = 10
"#,
        )
        .unwrap();

        let loader = ConfigLoader::new(dir.path().to_string_lossy()).unwrap();
        assert_eq!(loader.config_dir(), dir.path().to_string_lossy().as_ref());

        let config = loader.into_config();
        assert_eq!(config.queue.batch_size, 4);
        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.rate_limit.effective_per_hour(), 100);
    }

    #[test]
    fn test_local_layer_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), "[queue]\nbatch_size = 4\n").unwrap();
        fs::write(dir.path().join("local.toml"), "[queue]\nbatch_size = 8\n").unwrap();

        let loader = ConfigLoader::new(dir.path().to_string_lossy()).unwrap();
        assert_eq!(loader.config().queue.batch_size, 8);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), "[queue]\nbatch_size = 0\n").unwrap();

        let err = ConfigLoader::new(dir.path().to_string_lossy())
            .err()
            .unwrap();
        assert!(matches!(err, RelayError::Configuration(_)));
    }
}
