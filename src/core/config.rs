use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::core::scheduler::{DeliveryDefaults, EngineLimits};

pub const CONFIG_FILE: &str = "toolhub.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HubConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_api_host")]
    pub api_host: String,

    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_workers")]
    pub default_workers: usize,

    #[serde(default = "default_isolated_workers")]
    pub isolated_workers: usize,

    /// Concurrent runs allowed for one job.
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,

    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: u64,

    #[serde(default = "default_webhook_retry")]
    pub webhook_retry: u32,

    #[serde(default = "default_webhook_backoff")]
    pub webhook_backoff: u32,

    /// Length of one backoff unit; the wait before attempt `n` is `backoff^n` units.
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    17890
}
fn default_workers() -> usize {
    20
}
fn default_isolated_workers() -> usize {
    5
}
fn default_max_instances() -> usize {
    3
}
fn default_misfire_grace_secs() -> u64 {
    5
}
fn default_webhook_retry() -> u32 {
    3
}
fn default_webhook_backoff() -> u32 {
    2
}
fn default_backoff_unit_ms() -> u64 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_host: default_api_host(),
            api_port: default_api_port(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_workers: default_workers(),
            isolated_workers: default_isolated_workers(),
            max_instances: default_max_instances(),
            misfire_grace_secs: default_misfire_grace_secs(),
            webhook_retry: default_webhook_retry(),
            webhook_backoff: default_webhook_backoff(),
            backoff_unit_ms: default_backoff_unit_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn engine_limits(&self) -> EngineLimits {
        EngineLimits {
            default_workers: self.default_workers,
            isolated_workers: self.isolated_workers,
            max_instances: self.max_instances,
            misfire_grace: Duration::from_secs(self.misfire_grace_secs),
        }
    }

    pub fn delivery_defaults(&self) -> DeliveryDefaults {
        DeliveryDefaults {
            retry: self.webhook_retry,
            backoff: self.webhook_backoff,
        }
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

impl HubConfig {
    pub async fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let config_path = data_dir.as_ref().join(CONFIG_FILE);
        if !config_path.exists() {
            info!("No {} found, using defaults.", CONFIG_FILE);
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&config_path).await?;
        let config: HubConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;
        info!("Loaded configuration from {}", config_path.display());
        Ok(config)
    }
}
