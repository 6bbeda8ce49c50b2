//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::types::DataArea;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Capacity of the in-memory store. Unbounded when absent.
    #[serde(default)]
    pub max_entries: Option<usize>,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// TTL for providers that do not set their own.
    #[serde(default = "default_ttl_mins")]
    pub default_ttl_mins: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: None,
            sweep_interval_secs: default_sweep_interval(),
            default_ttl_mins: default_ttl_mins(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregatorConfig {
    #[serde(default = "default_timeout")]
    pub default_timeout_secs: u64,
    #[serde(default)]
    pub single_flight: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout(),
            single_flight: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// JSON file for usage counters. In-memory only when absent.
    #[serde(default)]
    pub usage_file: Option<String>,
}

/// Which adapter a `[[providers]]` entry builds.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    AirQuality,
    Census,
    Http,
    Static,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    /// Required for `http` and `static`; fixed by the adapter otherwise.
    #[serde(default)]
    pub area: Option<DataArea>,
    pub daily_limit: u32,
    pub monthly_limit: u32,
    #[serde(default)]
    pub ttl_mins: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Base URL override, or the URL template for `http`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_key_param: Option<String>,
    #[serde(default)]
    pub json_pointer: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_ttl_mins() -> u64 {
    60
}

fn default_timeout() -> u64 {
    10
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for p in &self.providers {
            if !seen.insert(p.name.as_str()) {
                anyhow::bail!("duplicate provider name: {}", p.name);
            }
            if matches!(p.kind, ProviderKind::Http | ProviderKind::Static) && p.area.is_none() {
                anyhow::bail!("provider {} needs an area", p.name);
            }
            if p.kind == ProviderKind::Http && p.url.is_none() {
                anyhow::bail!("provider {} needs a url template", p.name);
            }
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
