//! Configuration Loader
//!
//! Layers, lowest precedence first:
//!
//! 1. Built-in defaults (`FiscalConfig::default()`)
//! 2. Optional TOML file (`FISCAL_CONFIG_PATH`, default `config/fiscal.toml`)
//! 3. `FISCAL__SECTION__KEY` environment variables

use super::error::{ConfigResult, ConfigurationError};
use super::FiscalConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const CONFIG_PATH_ENV: &str = "FISCAL_CONFIG_PATH";
pub const ENVIRONMENT_ENV: &str = "FISCAL_ENV";
pub const DEFAULT_CONFIG_PATH: &str = "config/fiscal.toml";

/// Owner of the validated configuration
#[derive(Debug)]
pub struct ConfigManager {
    config: FiscalConfig,
    environment: String,
    source_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let path = env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from_path(&path)
    }

    /// Load configuration from a specific file; a missing file falls back to
    /// defaults plus environment overrides
    pub fn load_from_path(path: &Path) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        let file_present = path.is_file();

        debug!(
            environment = %environment,
            path = %path.display(),
            file_present,
            "Loading fiscal configuration"
        );

        let defaults = Config::try_from(&FiscalConfig::default())?;
        let built = Config::builder()
            .add_source(defaults)
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("FISCAL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: FiscalConfig = built.try_deserialize()?;
        config.validate()?;

        info!(
            environment = %environment,
            path = %path.display(),
            exchange = %config.queues.exchange,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            source_path: file_present.then(|| path.to_path_buf()),
        }))
    }

    /// Parse a TOML document on top of the defaults, without environment
    /// overrides
    pub fn from_toml_str(contents: &str) -> ConfigResult<FiscalConfig> {
        let defaults = Config::try_from(&FiscalConfig::default())?;
        let config: FiscalConfig = Config::builder()
            .add_source(defaults)
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Wrap an already-built configuration after validating it
    pub fn from_config(config: FiscalConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            source_path: None,
        }))
    }

    pub fn config(&self) -> &FiscalConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Detect environment from `FISCAL_ENV`, defaulting to development
    pub fn detect_environment() -> String {
        env::var(ENVIRONMENT_ENV).unwrap_or_else(|_| "development".to_string())
    }

    /// Read a file eagerly so a present-but-unreadable file is reported
    /// instead of silently skipped
    pub fn read_file(path: &Path) -> ConfigResult<String> {
        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusinessExhaustionPolicy;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::load_from_path(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(manager.config(), &FiscalConfig::default());
        assert!(manager.source_path().is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[retry]
base_delay_ms = 500
business_exhaustion = "dead_letter"

[retry.max_retries]
emit = 3

[queues]
prefix = "nfe"
"#
        )
        .unwrap();

        let manager = ConfigManager::load_from_path(file.path()).unwrap();
        let config = manager.config();
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.retry.max_retries.emit, 3);
        // Untouched keys keep their defaults
        assert_eq!(config.retry.max_retries.query, 10);
        assert_eq!(
            config.retry.business_exhaustion,
            BusinessExhaustionPolicy::DeadLetter
        );
        assert_eq!(config.queues.prefix, "nfe");
        assert!(manager.source_path().is_some());
    }

    #[test]
    fn test_invalid_file_fails_validation() {
        let err = ConfigManager::from_toml_str(
            r#"
[retry]
base_delay_ms = 10000
max_delay_ms = 1000
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn test_read_file_reports_missing_path() {
        let err = ConfigManager::read_file(Path::new("/nonexistent/fiscal.toml")).unwrap_err();
        assert!(matches!(err, ConfigurationError::FileReadError { .. }));
    }
}
