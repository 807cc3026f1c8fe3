//! Core configuration.
//!
//! # Responsibility
//! - Describe host-tunable knobs (logging, database path, resolver timing).
//! - Load them from JSON with defaults for every missing field.
//!
//! # Invariants
//! - `resolver.debounce_ms` is strictly positive after validation.
//! - `resolver.positive_ttl_ms`, when set, is strictly positive.
//! - `log_level` is one of `trace|debug|info|warn|error` after validation.

use crate::logging::{default_log_level, normalize_level};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default quiet period before a resolution cycle starts.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Errors from configuration loading/validation.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config json: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Reference resolution timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Quiet period after the last edit before scanning.
    pub debounce_ms: u64,
    /// Lifetime of positive cache entries. `None` keeps them for the whole
    /// session; negative entries always live for the session.
    pub positive_ttl_ms: Option<u64>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            positive_ttl_ms: None,
        }
    }
}

impl ResolverConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn positive_ttl(&self) -> Option<Duration> {
        self.positive_ttl_ms.map(Duration::from_millis)
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = u64::try_from(debounce.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Top-level core configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub log_level: String,
    /// Absolute directory for rolling log files; logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    /// SQLite file path; an in-memory store is used when unset.
    pub db_path: Option<PathBuf>,
    pub resolver: ResolverConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level().to_string(),
            log_dir: None,
            db_path: None,
            resolver: ResolverConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Parses and validates a JSON document. Missing fields take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        normalize_level(&self.log_level).map_err(ConfigError::Invalid)?;
        if self.resolver.debounce_ms == 0 {
            return Err(ConfigError::Invalid(
                "resolver.debounce_ms must be greater than zero".to_string(),
            ));
        }
        if self.resolver.positive_ttl_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "resolver.positive_ttl_ms must be greater than zero when set".to_string(),
            ));
        }
        if let Some(dir) = &self.log_dir {
            if !dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "log_dir must be an absolute path, got `{}`",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}
