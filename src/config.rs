//! Pipeline configuration
//!
//! Every field has a default, so an empty YAML document (or no file at all)
//! yields a working configuration. Files are YAML; JSON is accepted too since
//! it is a YAML subset.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How much context a corrective retry gives the oracle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryContext {
    /// Source text plus the validation issues
    #[default]
    IssuesOnly,
    /// Source text, the issues and the rejected attempt
    IssuesAndPriorAttempt,
}

/// Transform stage retry and timeout settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Retries after a transient oracle failure
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    /// Upper bound for a single oracle call
    pub oracle_timeout_secs: u64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 8_000,
            oracle_timeout_secs: 120,
        }
    }
}

/// Validation retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidateConfig {
    /// Corrective transforms after an invalid result
    pub max_retries: u32,
    pub retry_context: RetryContext,
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_context: RetryContext::default(),
        }
    }
}

/// Progress channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Events buffered per session before slow subscribers start losing them
    pub buffer: usize,
    pub heartbeat_secs: u64,
    pub idle_timeout_secs: u64,
}

impl ProgressConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            buffer: 256,
            heartbeat_secs: 15,
            idle_timeout_secs: 600,
        }
    }
}

/// Fingerprint cache settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum resolved entries; unbounded when absent
    pub capacity: Option<u64>,
}

/// Top-level configuration for the conversion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Components processed concurrently per run
    pub worker_limit: usize,
    /// Bumped whenever instructions change, invalidating cached outcomes
    pub stage_config_version: u32,
    pub transform: TransformConfig,
    pub validate: ValidateConfig,
    pub progress: ProgressConfig,
    pub cache: CacheConfig,
    /// Command line of the oracle process, e.g. `python3 oracle.py`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle_command: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_limit: 4,
            stage_config_version: 1,
            transform: TransformConfig::default(),
            validate: ValidateConfig::default(),
            progress: ProgressConfig::default(),
            cache: CacheConfig::default(),
            oracle_command: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to an empty mapping
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Load `path` if given, else the default location if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_limit == 0 {
            return Err(ConfigError::Invalid("worker_limit must be at least 1".into()));
        }
        if self.progress.buffer == 0 {
            return Err(ConfigError::Invalid("progress.buffer must be at least 1".into()));
        }
        if self.progress.heartbeat_secs == 0 {
            return Err(ConfigError::Invalid(
                "progress.heartbeat_secs must be at least 1".into(),
            ));
        }
        if self.transform.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "transform.backoff_multiplier must be >= 1.0".into(),
            ));
        }
        if self.cache.capacity == Some(0) {
            return Err(ConfigError::Invalid("cache.capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// `<config dir>/testport/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("testport").join("config.yaml"))
}
