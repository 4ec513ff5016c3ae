//! Configuration loading for Lectern.
//!
//! Configuration is read from a TOML file whose path comes from `--config`
//! or `LECTERN_CONFIG`. Every section has defaults, so an empty file is a
//! valid configuration; `validate` rejects values that cannot work.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default cache lifetime: five minutes, applied to every query shape.
pub const DEFAULT_TTL_SECS: u64 = 5 * 60;

/// Default prefix for derived cache keys.
pub const DEFAULT_KEY_PREFIX: &str = "lectern-cache";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LecternConfig {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub feed: FeedSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub store: StoreConfig,
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            store: StoreConfig::default(),
        }
    }
}

/// Which persistence medium backs the cache.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local map; `capacity_bytes` emulates a storage quota.
    Memory {
        #[serde(default)]
        capacity_bytes: Option<u64>,
    },
    /// LMDB environment on disk; survives restarts.
    Lmdb { path: PathBuf, map_size_mb: usize },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory {
            capacity_bytes: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedSettings {
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    #[serde(default = "default_mention_user_limit")]
    pub mention_user_limit: usize,
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
            mention_user_limit: default_mention_user_limit(),
            max_suggestions: default_max_suggestions(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_max_message_chars() -> usize {
    400
}

fn default_mention_user_limit() -> usize {
    50
}

fn default_max_suggestions() -> usize {
    5
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or LECTERN_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl LecternConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: LecternConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.ttl_secs",
                reason: "must be > 0".to_string(),
            });
        }
        if self.cache.key_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "cache.key_prefix",
                reason: "must not be empty".to_string(),
            });
        }
        if let StoreConfig::Lmdb { path, map_size_mb } = &self.cache.store {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "cache.store.path",
                    reason: "must not be empty".to_string(),
                });
            }
            if *map_size_mb == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "cache.store.map_size_mb",
                    reason: "must be > 0".to_string(),
                });
            }
        }
        if self.feed.max_message_chars == 0 {
            return Err(ConfigError::InvalidValue {
                field: "feed.max_message_chars",
                reason: "must be > 0".to_string(),
            });
        }
        if self.feed.mention_user_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "feed.mention_user_limit",
                reason: "must be > 0".to_string(),
            });
        }
        if self.feed.max_suggestions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "feed.max_suggestions",
                reason: "must be > 0".to_string(),
            });
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "logging.filter",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("LECTERN_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
