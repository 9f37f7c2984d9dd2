//! Runtime configuration: optional `config.toml`, then `COVID_*` environment overrides.

use crate::constants;
use crate::error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub storage: StorageConfig,
    pub dashboard: DashboardSettings,
    pub server: ServerConfig,
    pub metrics: MetricsConfig,
}

/// Remote CSV endpoint and how hard to try reaching it
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: constants::DEFAULT_SOURCE_URL.to_string(),
            timeout_secs: 60,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("data") }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    /// How long a loaded snapshot is served before the file is checked again
    pub cache_ttl_secs: u64,
    /// Reject datasets whose freshness marker is older than this
    pub stale_after_hours: Option<u64>,
    pub default_entities: Vec<String>,
    pub vaccination_entities: Vec<String>,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            stale_after_hours: None,
            default_entities: constants::default_entities(),
            vaccination_entities: constants::default_vaccination_entities(),
        }
    }
}

impl DashboardSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus listener address, e.g. "127.0.0.1:9898". Exporter is off when unset.
    pub addr: Option<String>,
}

impl Config {
    /// Load from an explicit path, or from `config.toml` when present, then apply `COVID_*` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Config::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config_content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&config_content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("COVID_DATA_URL").filter(|v| !v.trim().is_empty()) {
            self.source.url = url;
        }
        if let Some(dir) = lookup("COVID_DATA_DIR").filter(|v| !v.trim().is_empty()) {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup("COVID_FETCH_TIMEOUT_SECS") {
            self.source.timeout_secs = v.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "COVID_FETCH_TIMEOUT_SECS",
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("COVID_SERVER_PORT") {
            self.server.port = v.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "COVID_SERVER_PORT",
                value: v.clone(),
            })?;
        }
        if let Some(addr) = lookup("COVID_METRICS_ADDR").filter(|v| !v.trim().is_empty()) {
            self.metrics.addr = Some(addr);
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.source.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "source.max_attempts",
                value: "0".to_string(),
            });
        }
        if self.source.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "source.timeout_secs",
                value: "0".to_string(),
            });
        }
        if let Some(hours) = self.dashboard.stale_after_hours {
            if hours == 0 || hours > constants::MAX_STALE_AFTER_HOURS {
                return Err(ConfigError::Invalid {
                    key: "dashboard.stale_after_hours",
                    value: hours.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_sections_absent() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.source.url, constants::DEFAULT_SOURCE_URL);
        assert_eq!(config.source.max_attempts, 3);
        assert_eq!(config.storage.data_dir, PathBuf::from("data"));
        assert_eq!(config.dashboard.cache_ttl_secs, 3600);
        assert_eq!(config.dashboard.default_entities.len(), 4);
        assert!(config.metrics.addr.is_none());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [source]
            url = "http://localhost/owid.csv"

            [dashboard]
            stale_after_hours = 48
            "#,
        )
        .unwrap();
        assert_eq!(config.source.url, "http://localhost/owid.csv");
        assert_eq!(config.source.timeout_secs, 60);
        assert_eq!(config.dashboard.stale_after_hours, Some(48));
        assert_eq!(config.dashboard.cache_ttl_secs, 3600);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("COVID_DATA_DIR", "/tmp/covid"),
            ("COVID_SERVER_PORT", "9000"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/covid"));
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|k| (k == "COVID_SERVER_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "COVID_SERVER_PORT", .. }));
    }

    #[test]
    fn test_zero_attempts_is_rejected() {
        let mut config = Config::from_toml_str("[source]\nmax_attempts = 0\n").unwrap();
        assert!(config.apply_overrides(|_| None).is_err());
    }

    #[test]
    fn test_stale_after_hours_is_bounded() {
        for bad in ["0", "9223372036854775807"] {
            let mut config = Config::from_toml_str(&format!("[dashboard]\nstale_after_hours = {bad}\n")).unwrap();
            let err = config.apply_overrides(|_| None).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key: "dashboard.stale_after_hours", .. }));
        }

        let mut config = Config::from_toml_str("[dashboard]\nstale_after_hours = 48\n").unwrap();
        assert!(config.apply_overrides(|_| None).is_ok());
        assert_eq!(config.dashboard.stale_after_hours, Some(48));
    }
}
