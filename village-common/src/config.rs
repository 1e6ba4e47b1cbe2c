//! Pipeline-wide configuration (spec §6), loadable from TOML with
//! environment-variable overrides, one typed getter per value kind.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Top-level config, one field group per component. All fields have
/// documented defaults so a completely absent config file is a valid
/// (default) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub auto_canary: bool,
    pub auto_rollout: bool,
    pub auto_sweep: bool,
    pub max_concurrent_rollouts: usize,
    pub rollout_tick_interval_ms: u64,
    pub rollback_thresholds: RollbackThresholds,
    pub sweep: SweepManagerConfig,
    pub canary: CanaryRunnerConfig,
    pub registry: RegistryConfig,
    pub house_activity: HouseActivityConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_canary: true,
            auto_rollout: false,
            auto_sweep: false,
            max_concurrent_rollouts: 3,
            rollout_tick_interval_ms: 60_000,
            rollback_thresholds: RollbackThresholds::default(),
            sweep: SweepManagerConfig::default(),
            canary: CanaryRunnerConfig::default(),
            registry: RegistryConfig::default(),
            house_activity: HouseActivityConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn rollout_tick_interval(&self) -> Duration {
        Duration::from_millis(self.rollout_tick_interval_ms)
    }

    /// Load a config from a TOML file, falling back to defaults for any
    /// field the file omits (`#[serde(default)]` at every level), then
    /// apply environment-variable overrides via [`apply_env_overrides`].
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Read(path.display().to_string(), e.to_string()))?;
                toml::from_str(&raw).map_err(|e| ConfigError::Parse(path.display().to_string(), e.to_string()))?
            }
            None => Self::default(),
        };
        apply_env_overrides(&mut config)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackThresholds {
    pub max_failure_rate: f64,
    pub max_disconnect_rate: f64,
    pub min_session_count: u64,
}

impl Default for RollbackThresholds {
    fn default() -> Self {
        Self {
            max_failure_rate: 0.10,
            max_disconnect_rate: 0.15,
            min_session_count: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepManagerConfig {
    pub max_concurrent_sweeps: usize,
    pub default_rate_limit: u32,
    pub default_max_repos_per_run: u32,
}

impl Default for SweepManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sweeps: 3,
            default_rate_limit: 10,
            default_max_repos_per_run: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanaryRunnerConfig {
    pub max_concurrency: usize,
    pub default_timeout_ms: u64,
    pub retry_count: u32,
}

impl Default for CanaryRunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            default_timeout_ms: 60_000,
            retry_count: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub max_versions_per_provider: usize,
    pub max_builds: usize,
    pub auto_deprecate_days: i64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_versions_per_provider: 20,
            max_builds: 100,
            auto_deprecate_days: 90,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HouseActivityConfig {
    pub broadcast_coalesce_ms: u64,
}

impl Default for HouseActivityConfig {
    fn default() -> Self {
        Self {
            broadcast_coalesce_ms: 50,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(String, String),
    #[error("failed to parse config file {0}: {1}")]
    Parse(String, String),
    #[error("invalid value for {var}: {value}")]
    InvalidEnvValue { var: String, value: String },
}

/// Typed `VILLAGE_`-prefixed environment overrides: one getter per value
/// type, failing fast since config load happens once at startup.
fn apply_env_overrides(config: &mut PipelineConfig) -> Result<(), ConfigError> {
    if let Some(v) = env_bool("VILLAGE_AUTO_CANARY")? {
        config.auto_canary = v;
    }
    if let Some(v) = env_bool("VILLAGE_AUTO_ROLLOUT")? {
        config.auto_rollout = v;
    }
    if let Some(v) = env_bool("VILLAGE_AUTO_SWEEP")? {
        config.auto_sweep = v;
    }
    if let Some(v) = env_usize("VILLAGE_MAX_CONCURRENT_ROLLOUTS")? {
        config.max_concurrent_rollouts = v;
    }
    if let Some(v) = env_u64("VILLAGE_ROLLOUT_TICK_INTERVAL_MS")? {
        config.rollout_tick_interval_ms = v;
    }
    if let Some(v) = env_u32("VILLAGE_SWEEP_DEFAULT_RATE_LIMIT")? {
        config.sweep.default_rate_limit = v;
    }
    Ok(())
}

fn env_bool(name: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.as_str() {
            "1" | "true" | "TRUE" | "yes" => Ok(Some(true)),
            "0" | "false" | "FALSE" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnvValue { var: name.to_string(), value: raw }),
        },
        Err(_) => Ok(None),
    }
}

fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
    env_parse(name)
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
    env_parse(name)
}

fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
    env_parse(name)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvValue { var: name.to_string(), value: raw }),
        Err(_) => Ok(None),
    }
}
