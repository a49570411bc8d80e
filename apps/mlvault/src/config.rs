//! # Application Configuration
//!
//! Loaded from an optional TOML file:
//!
//! ```toml
//! [vault]
//! retry_budget = 5
//! conflict_retries = 32
//!
//! [vault.validation]
//! rate_metrics = "clamp"
//!
//! [log]
//! format = "json"
//! filter = "mlvault=debug"
//! ```
//!
//! `MLVAULT_LOG_FORMAT` and `MLVAULT_LOG` override the `[log]` table.

use mlvault_core::{VaultConfig, VaultError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "mlvault.toml";

/// Default tracing filter.
pub const DEFAULT_LOG_FILTER: &str = "mlvault=info,mlvault_core=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive. `RUST_LOG` still wins when set.
    pub filter: Option<String>,
}

impl LogConfig {
    #[must_use]
    pub fn filter_or_default(&self) -> &str {
        self.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub vault: VaultConfig,
    pub log: LogConfig,
}

impl AppConfig {
    /// Parse and check a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, VaultError> {
        let config: Self =
            toml::from_str(text).map_err(|e| VaultError::SerializationError(format!("config: {}", e)))?;
        config.vault.check()?;
        Ok(config)
    }

    /// Load `path`, or [`DEFAULT_CONFIG_FILE`] if present, or the defaults.
    ///
    /// An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, VaultError> {
        let path = match path {
            Some(path) => path,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if !fallback.is_file() {
                    return Ok(Self::default());
                }
                fallback
            }
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| VaultError::IoError(format!("Cannot read config '{}': {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Apply `MLVAULT_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(format) = lookup("MLVAULT_LOG_FORMAT") {
            self.log.format = if format.eq_ignore_ascii_case("json") {
                LogFormat::Json
            } else {
                LogFormat::Text
            };
        }
        if let Some(filter) = lookup("MLVAULT_LOG") {
            self.log.filter = Some(filter);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use mlvault_core::RatePolicy;

    #[test]
    fn empty_file_yields_defaults() {
        assert_eq!(AppConfig::from_toml("").unwrap(), AppConfig::default());
    }

    #[test]
    fn tables_are_read() {
        let config = AppConfig::from_toml(
            r#"
            [vault]
            retry_budget = 5

            [vault.validation]
            rate_metrics = "clamp"

            [log]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.vault.retry_budget, 5);
        assert_eq!(config.vault.validation.rate_metrics, RatePolicy::Clamp);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.filter_or_default(), DEFAULT_LOG_FILTER);
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = AppConfig::from_toml("[vault]\nretry_budgets = 5\n").unwrap_err();
        assert_eq!(err.kind(), "SerializationError");
    }

    #[test]
    fn invalid_values_rejected() {
        let err = AppConfig::from_toml("[vault]\nconflict_retries = 0\n").unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn env_overrides_log_settings() {
        let mut config = AppConfig::default();
        config.apply_overrides(|key| match key {
            "MLVAULT_LOG_FORMAT" => Some("JSON".to_string()),
            "MLVAULT_LOG" => Some("mlvault_core=debug".to_string()),
            _ => None,
        });
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.filter.as_deref(), Some("mlvault_core=debug"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/mlvault.toml"))).unwrap_err();
        assert_eq!(err.kind(), "IoError");
    }
}
