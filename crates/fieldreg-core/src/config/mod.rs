//! Runtime configuration for the registry and its sync engine.
//!
//! `SyncSettings` come from defaults overridden by environment variables.
//! `RegistryConfig` is the persisted JSON file shared by local clients.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::normalize_text_option;

pub const ENV_BATCH_SIZE: &str = "FIELDREG_SYNC_BATCH_SIZE";
pub const ENV_PUSH_CHUNK: &str = "FIELDREG_SYNC_PUSH_CHUNK";
pub const ENV_INTERVAL_SECS: &str = "FIELDREG_SYNC_INTERVAL_SECS";
pub const ENV_TIMEOUT_SECS: &str = "FIELDREG_SYNC_TIMEOUT_SECS";

const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_PUSH_CHUNK: usize = 10;
const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Failed to access config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Bounds and cadence of sync cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Change log entries drained per cycle
    pub batch_size: usize,
    /// Entries sent per push request
    pub push_chunk_size: usize,
    /// Period of the background trigger while online
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Upper bound for a single remote request
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            push_chunk_size: DEFAULT_PUSH_CHUNK,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl SyncSettings {
    /// Apply `FIELDREG_SYNC_*` overrides from `lookup` on top of `self`.
    pub fn with_lookup(self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let settings = Self {
            batch_size: parse_or(&lookup, ENV_BATCH_SIZE, self.batch_size)?,
            push_chunk_size: parse_or(&lookup, ENV_PUSH_CHUNK, self.push_chunk_size)?,
            interval: Duration::from_secs(parse_or(
                &lookup,
                ENV_INTERVAL_SECS,
                self.interval.as_secs(),
            )?),
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                ENV_TIMEOUT_SECS,
                self.request_timeout.as_secs(),
            )?),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch size must be at least 1".to_string()));
        }
        if self.push_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "push chunk size must be at least 1".to_string(),
            ));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid("sync interval must be positive".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Persisted client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryConfig {
    #[serde(default)]
    pub db_path: Option<String>,
    /// File backing the loopback remote used by `sync --remote`
    #[serde(default)]
    pub remote_path: Option<String>,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl RegistryConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config =
            serde_json::from_str::<Self>(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.normalize();
        config.sync.validate()?;
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| ConfigError::Invalid(format!("Failed to serialize config: {error}")))?;
        std::fs::write(path, serialized).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn db_path(&self) -> Option<PathBuf> {
        normalize_text_option(self.db_path.clone()).map(PathBuf::from)
    }

    pub fn remote_path(&self) -> Option<PathBuf> {
        normalize_text_option(self.remote_path.clone()).map(PathBuf::from)
    }

    fn normalize(&mut self) {
        self.db_path = normalize_text_option(self.db_path.take());
        self.remote_path = normalize_text_option(self.remote_path.take());
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    let Some(raw) = normalize_text_option(lookup(name)) else {
        return Ok(default);
    };
    raw.parse()
        .map_err(|_| ConfigError::Invalid(format!("{name} must be a positive integer, got '{raw}'")))
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
