use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::DEFAULT_PAGE_SIZE;
use crate::registry::{RegistrySettings, RetryPolicy};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Recorded as the author of every change; defaults to the host name
    #[serde(default = "default_authority_id")]
    pub authority_id: String,
    /// Delete applications a discoverer stops reporting instead of
    /// disabling them
    #[serde(default)]
    pub hard_delete_missing: bool,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub purge: PurgeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurgeConfig {
    #[serde(default = "default_purge_enabled")]
    pub enabled: bool,
    /// How long an application stays disabled before it is unregistered
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    #[serde(default = "default_purge_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_authority_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "opcua-registryd".to_string())
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay() -> u64 {
    20
}

fn default_max_delay() -> u64 {
    2000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_purge_enabled() -> bool {
    true
}

fn default_retention() -> u64 {
    7 * 24 * 3600
}

fn default_purge_interval() -> u64 {
    3600
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/opcua-registry/twins.db")
}

fn default_listen() -> String {
    "[::]:9042".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            authority_id: default_authority_id(),
            hard_delete_missing: false,
            page_size: default_page_size(),
            retry: RetryConfig::default(),
            purge: PurgeConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            enabled: default_purge_enabled(),
            retention_secs: default_retention(),
            interval_secs: default_purge_interval(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl RegistryConfig {
    pub fn settings(&self) -> RegistrySettings {
        RegistrySettings {
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts.max(1),
                initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
                multiplier: self.retry.multiplier,
            },
            hard_delete_missing: self.hard_delete_missing,
            page_size: self.page_size.max(1),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}
