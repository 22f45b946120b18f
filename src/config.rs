//! Configuration
//!
//! Loaded from an optional TOML file, then overridden by `KEEPER_*`
//! environment variables. Every section has defaults, so an empty file (or
//! no file) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::issuer::CurveParams;
use crate::{
    DEFAULT_BASE_RATE, DEFAULT_COMMIT_ATTEMPTS, DEFAULT_COMMIT_BACKOFF_MS, DEFAULT_CURVE_FLOOR,
    DEFAULT_CURVE_MIDPOINT, DEFAULT_CURVE_STEEPNESS, DEFAULT_PROVIDER_TIMEOUT_SECS,
    DEFAULT_SLOT_PERIOD_SECS, DEFAULT_SUPPLY_CEILING, DEFAULT_WAKE_INTERVAL_SECS,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    Env { key: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub economy: EconomyConfig,
    pub keeper: ScheduleConfig,
    pub provider: ProviderConfig,
    pub commit: CommitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the HTTP API
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path; in-memory store when unset
    pub path: Option<PathBuf>,
}

/// Bonding curve parameters, in whole tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    pub base_rate: f64,
    pub floor: f64,
    pub midpoint: f64,
    pub steepness: f64,
    pub supply_ceiling: f64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            base_rate: DEFAULT_BASE_RATE,
            floor: DEFAULT_CURVE_FLOOR,
            midpoint: DEFAULT_CURVE_MIDPOINT,
            steepness: DEFAULT_CURVE_STEEPNESS,
            supply_ceiling: DEFAULT_SUPPLY_CEILING,
        }
    }
}

impl EconomyConfig {
    pub fn curve_params(&self) -> CurveParams {
        CurveParams {
            base_rate: self.base_rate,
            floor: self.floor,
            midpoint: self.midpoint,
            steepness: self.steepness,
            supply_ceiling: self.supply_ceiling,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Length of one rotation slot
    pub slot_period_secs: u64,
    /// Timer loop wake interval
    pub wake_interval_secs: u64,
    /// Bound on each completion call
    pub provider_timeout_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            slot_period_secs: DEFAULT_SLOT_PERIOD_SECS,
            wake_interval_secs: DEFAULT_WAKE_INTERVAL_SECS,
            provider_timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
        }
    }
}

impl ScheduleConfig {
    pub fn wake_interval(&self) -> Duration {
        Duration::from_secs(self.wake_interval_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

/// OpenAI-compatible chat completions endpoint (Ollama works too)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434/v1".to_string(),
            model: "llama3.2".to_string(),
            api_key: None,
            temperature: 0.8,
            max_tokens: 400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    pub max_attempts: u32,
    /// First retry delay; doubles on each further attempt
    pub backoff_ms: u64,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_COMMIT_ATTEMPTS,
            backoff_ms: DEFAULT_COMMIT_BACKOFF_MS,
        }
    }
}

impl KeeperConfig {
    /// Defaults, then `path` if given, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `KEEPER_*` overrides from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("KEEPER_ADDR") {
            self.server.addr = v;
        }
        if let Some(v) = lookup("KEEPER_DB") {
            self.store.path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("KEEPER_PROVIDER_URL") {
            self.provider.url = v;
        }
        if let Some(v) = lookup("KEEPER_MODEL") {
            self.provider.model = v;
        }
        if let Some(v) = lookup("KEEPER_API_KEY") {
            self.provider.api_key = Some(v);
        }
        if let Some(v) = lookup("KEEPER_SLOT_PERIOD_SECS") {
            self.keeper.slot_period_secs = parse_env("KEEPER_SLOT_PERIOD_SECS", &v)?;
        }
        if let Some(v) = lookup("KEEPER_PROVIDER_TIMEOUT_SECS") {
            self.keeper.provider_timeout_secs = parse_env("KEEPER_PROVIDER_TIMEOUT_SECS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keeper.slot_period_secs == 0 {
            return Err(ConfigError::Invalid("keeper.slot_period_secs must be > 0".into()));
        }
        if self.keeper.wake_interval_secs == 0 {
            return Err(ConfigError::Invalid("keeper.wake_interval_secs must be > 0".into()));
        }
        if self.keeper.provider_timeout_secs == 0 {
            return Err(ConfigError::Invalid("keeper.provider_timeout_secs must be > 0".into()));
        }
        if self.commit.max_attempts == 0 {
            return Err(ConfigError::Invalid("commit.max_attempts must be > 0".into()));
        }
        self.economy
            .curve_params()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}
