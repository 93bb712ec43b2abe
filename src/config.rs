//! Configuration loading helpers.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::device::{DirectoryStore, DEFAULT_SEGMENT_PREFIX};
use crate::log::{LogFilesConfig, RotationThreshold};
use crate::metadata::DEFAULT_METADATA_CACHE_CAPACITY;
use crate::pipeline::{IdleConfig, LogQueueConfig, LogQueueOptions, NotifyMode};

const ENV_PREFIX: &str = "OXILOG__";

/// Errors returned by configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error while reading config files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Invalid value for a key.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Raw value string.
        value: String,
    },
    /// Unknown configuration key.
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    /// Missing required configuration field.
    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Top-level configuration schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OxilogConfig {
    /// Queue and appender configuration.
    pub queue: Option<QueueConfigSpec>,
    /// Appender idle strategy configuration.
    pub idle: Option<IdleConfigSpec>,
    /// Log file configuration.
    pub log: Option<LogConfigSpec>,
    /// Metadata cache configuration.
    pub cache: Option<CacheConfigSpec>,
}

impl OxilogConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration from the `OXILOG_CONFIG` env var (if set),
    /// then apply `OXILOG__section__field` overrides.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let config_path = env::var("OXILOG_CONFIG").ok();
        let mut config = match config_path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment overrides in-place.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        for (key, value) in env::vars() {
            let Some(path) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let path = path.to_ascii_lowercase();
            let parts: Vec<&str> = path.split("__").collect();
            let value = value.trim().to_string();

            match parts.as_slice() {
                ["queue", "consumer_max_batch"] => {
                    self.queue_mut().consumer_max_batch = Some(parse_value(&key, &value)?);
                }
                ["queue", "capacity"] => {
                    self.queue_mut().capacity = Some(parse_value(&key, &value)?);
                }
                ["queue", "notify_mode"] => {
                    self.queue_mut().notify_mode = Some(value);
                }
                ["idle", "spin_threshold"] => {
                    self.idle_mut().spin_threshold = Some(parse_value(&key, &value)?);
                }
                ["idle", "short_park_threshold"] => {
                    self.idle_mut().short_park_threshold = Some(parse_value(&key, &value)?);
                }
                ["idle", "short_park_us"] => {
                    self.idle_mut().short_park_us = Some(parse_value(&key, &value)?);
                }
                ["idle", "long_park_ms"] => {
                    self.idle_mut().long_park_ms = Some(parse_value(&key, &value)?);
                }
                ["log", "dir"] => {
                    self.log_mut().dir = Some(PathBuf::from(value));
                }
                ["log", "prefix"] => {
                    self.log_mut().prefix = Some(value);
                }
                ["log", "write_buffer_size"] => {
                    self.log_mut().write_buffer_size = Some(parse_value(&key, &value)?);
                }
                ["log", "rotation_threshold_bytes"] => {
                    self.log_mut().rotation_threshold_bytes = Some(parse_value(&key, &value)?);
                }
                ["log", "rotation_max_age_ms"] => {
                    self.log_mut().rotation_max_age_ms = Some(parse_value(&key, &value)?);
                }
                ["cache", "capacity"] => {
                    self.cache_mut().capacity = Some(parse_value(&key, &value)?);
                }
                _ => return Err(ConfigError::UnknownKey(key)),
            }
        }

        Ok(())
    }

    /// Build a `LogQueueConfig` using defaults plus overrides.
    pub fn to_queue_config(&self) -> Result<LogQueueConfig, ConfigError> {
        let mut config = LogQueueConfig::default().with_idle(self.to_idle_config());
        if let Some(queue) = &self.queue {
            queue.apply_to(&mut config)?;
        }
        Ok(config)
    }

    /// Build an `IdleConfig` using defaults plus overrides.
    pub fn to_idle_config(&self) -> IdleConfig {
        let mut config = IdleConfig::default();
        if let Some(idle) = &self.idle {
            idle.apply_to(&mut config);
        }
        config
    }

    /// Build a `LogFilesConfig` using defaults plus overrides.
    pub fn to_log_files_config(&self) -> LogFilesConfig {
        let mut config = LogFilesConfig::default();
        if let Some(size) = self.log.as_ref().and_then(|log| log.write_buffer_size) {
            config.write_buffer_size = size.max(1);
        }
        config
    }

    /// Build the rotation thresholds using defaults plus overrides.
    pub fn to_rotation_threshold(&self) -> RotationThreshold {
        let mut threshold = RotationThreshold::default();
        if let Some(log) = &self.log {
            if let Some(bytes) = log.rotation_threshold_bytes {
                threshold.max_bytes = (bytes > 0).then_some(bytes);
            }
            if let Some(ms) = log.rotation_max_age_ms {
                threshold.max_age = (ms > 0).then(|| Duration::from_millis(ms));
            }
        }
        threshold
    }

    /// Metadata cache capacity
    pub fn cache_capacity(&self) -> usize {
        self.cache
            .as_ref()
            .and_then(|cache| cache.capacity)
            .unwrap_or(DEFAULT_METADATA_CACHE_CAPACITY)
    }

    /// Build the full set of options for `TransactionLogQueue::open`.
    pub fn to_options(&self) -> Result<LogQueueOptions, ConfigError> {
        Ok(LogQueueOptions::default()
            .with_queue(self.to_queue_config()?)
            .with_log(self.to_log_files_config())
            .with_rotation(self.to_rotation_threshold())
            .with_metadata_cache_capacity(self.cache_capacity()))
    }

    /// Open the directory store named by `log.dir`.
    pub fn open_store(&self) -> Result<DirectoryStore, ConfigError> {
        let log = self
            .log
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField("log.dir".into()))?;
        let dir = log
            .dir
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField("log.dir".into()))?;
        let prefix = log.prefix.as_deref().unwrap_or(DEFAULT_SEGMENT_PREFIX);
        Ok(DirectoryStore::with_prefix(dir, prefix)?)
    }

    fn queue_mut(&mut self) -> &mut QueueConfigSpec {
        self.queue.get_or_insert_with(QueueConfigSpec::default)
    }

    fn idle_mut(&mut self) -> &mut IdleConfigSpec {
        self.idle.get_or_insert_with(IdleConfigSpec::default)
    }

    fn log_mut(&mut self) -> &mut LogConfigSpec {
        self.log.get_or_insert_with(LogConfigSpec::default)
    }

    fn cache_mut(&mut self) -> &mut CacheConfigSpec {
        self.cache.get_or_insert_with(CacheConfigSpec::default)
    }
}

/// Queue configuration overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueConfigSpec {
    /// Elements drained per batch.
    pub consumer_max_batch: Option<usize>,
    /// Queue capacity; 0 or absent means unbounded.
    pub capacity: Option<usize>,
    /// "first_waiter" or "direct".
    pub notify_mode: Option<String>,
}

impl QueueConfigSpec {
    fn apply_to(&self, config: &mut LogQueueConfig) -> Result<(), ConfigError> {
        if let Some(value) = self.consumer_max_batch {
            config.consumer_max_batch = value.max(1);
        }
        if let Some(value) = self.capacity {
            config.queue_capacity = (value > 0).then_some(value);
        }
        if let Some(mode) = &self.notify_mode {
            config.notify_mode = parse_notify_mode(mode)?;
        }
        Ok(())
    }
}

/// Idle strategy overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdleConfigSpec {
    /// Idle iterations spent spinning.
    pub spin_threshold: Option<u64>,
    /// Idle iterations before long parks.
    pub short_park_threshold: Option<u64>,
    /// Short park in microseconds.
    pub short_park_us: Option<u64>,
    /// Long park in milliseconds.
    pub long_park_ms: Option<u64>,
}

impl IdleConfigSpec {
    fn apply_to(&self, config: &mut IdleConfig) {
        if let Some(value) = self.spin_threshold {
            config.spin_threshold = value;
        }
        if let Some(value) = self.short_park_threshold {
            config.short_park_threshold = value.max(config.spin_threshold);
        }
        if let Some(value) = self.short_park_us {
            config.short_park = Duration::from_micros(value);
        }
        if let Some(value) = self.long_park_ms {
            config.long_park = Duration::from_millis(value);
        }
    }
}

/// Log file overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfigSpec {
    /// Directory holding the segments.
    pub dir: Option<PathBuf>,
    /// Segment file name prefix.
    pub prefix: Option<String>,
    /// Write buffer size in bytes.
    pub write_buffer_size: Option<usize>,
    /// Rotate at this segment size; 0 disables size rotation.
    pub rotation_threshold_bytes: Option<u64>,
    /// Rotate at this segment age; 0 disables age rotation.
    pub rotation_max_age_ms: Option<u64>,
}

/// Metadata cache overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfigSpec {
    /// Number of append index positions kept.
    pub capacity: Option<usize>,
}

fn parse_notify_mode(value: &str) -> Result<NotifyMode, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "first_waiter" => Ok(NotifyMode::FirstWaiter),
        "direct" => Ok(NotifyMode::Direct),
        other => Err(ConfigError::InvalidValue {
            key: "queue.notify_mode".into(),
            value: other.into(),
        }),
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
