//! Configuration file management.
//!
//! Loaded from `$DOCSHARD_DATA_DIR/config.toml`; every section and field
//! falls back to its default when absent.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use docshard_index::IndexConfig;
use docshard_migrate::MigrationConfig;
use docshard_sequence::SequenceConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "DOCSHARD_DATA_DIR";

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub indexing: IndexConfig,
    #[serde(default)]
    pub sequence: SequenceConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
    /// How long a statement waits on a locked database.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Per-subscriber event buffer.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_event_buffer() -> usize {
    1000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::parse(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.sequence.validate()?;
        if self.migration.batch_size == 0 {
            anyhow::bail!("migration.batch_size must be at least 1");
        }
        if !matches!(
            self.advanced.log_level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            anyhow::bail!("unknown log level '{}'", self.advanced.log_level);
        }
        Ok(())
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.busy_timeout_ms)
    }

    /// Tracing directive for our crates.
    pub fn log_directive(&self) -> String {
        format!("docshard={}", self.advanced.log_level)
    }

    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".docshard"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/docshard"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.storage.busy_timeout_ms, 5000);
        assert_eq!(config.migration.batch_size, 500);
        assert_eq!(config.indexing.ddl_timeout_secs, 30);
        assert_eq!(config.indexing.tiers.free, 10);
        assert_eq!(config.sequence.block_size, 10_000);
        assert_eq!(config.log_directive(), "docshard=info");
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn test_partial_file() {
        let config = DaemonConfig::parse(
            r#"
            [sequence]
            block_size = 250
            node_id = "edge-1"

            [indexing.tiers]
            standard = 80
            "#,
        )
        .expect("parse");
        assert_eq!(config.sequence.block_size, 250);
        assert_eq!(config.sequence.prealloc_threshold, 0.1);
        assert_eq!(config.sequence.node_id, "edge-1");
        assert_eq!(config.indexing.tiers.standard, 80);
        assert_eq!(config.indexing.tiers.enterprise, 500);
        assert_eq!(config.migration.max_error_samples, 50);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = DaemonConfig::parse("[sequence]\nprealloc_threshold = 1.5\n").expect("parse");
        assert!(config.validate().is_err());

        let config = DaemonConfig::parse("[advanced]\nlog_level = \"loud\"\n").expect("parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = DaemonConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let _parsed: DaemonConfig = toml::from_str(&toml_str).expect("parse");
    }
}
