//! Builds provider slots from `[[providers]]` configuration.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{info, warn};

use super::air_quality::OpenMeteoAirQuality;
use super::census::CensusDemographics;
use super::fixed::StaticSource;
use super::http::{HttpJsonSource, QueryKey};
use super::DataSource;
use crate::config::{AggregatorConfig, AppConfig, CacheConfig, ProviderConfig, ProviderKind};
use crate::engine::aggregator::ProviderSlot;
use crate::quota::QuotaLimits;
use crate::types::VicinityError;

/// Default query parameter carrying an API key for `http` providers.
const DEFAULT_KEY_PARAM: &str = "api_key";

/// Longest freshness window accepted (one year).
const MAX_TTL_MINS: u64 = 365 * 24 * 60;

/// One slot per configured provider, in configured order.
pub fn build_providers(
    providers: &[ProviderConfig],
    cache: &CacheConfig,
    aggregator: &AggregatorConfig,
) -> Result<Vec<ProviderSlot>> {
    providers
        .iter()
        .map(|p| {
            let source = build_source(p)
                .with_context(|| format!("Failed to initialise provider {}", p.name))?;
            let ttl_mins = p.ttl_mins.unwrap_or(cache.default_ttl_mins);
            let timeout_secs = p.timeout_secs.unwrap_or(aggregator.default_timeout_secs);
            info!(
                provider = %p.name,
                area = %source.area(),
                daily_limit = p.daily_limit,
                monthly_limit = p.monthly_limit,
                ttl_mins,
                timeout_secs,
                "Provider configured"
            );
            Ok(ProviderSlot::new(
                source,
                QuotaLimits::new(p.daily_limit, p.monthly_limit),
                chrono::Duration::minutes(ttl_mins.min(MAX_TTL_MINS) as i64),
                StdDuration::from_secs(timeout_secs),
            ))
        })
        .collect()
}

fn build_source(p: &ProviderConfig) -> Result<Arc<dyn DataSource>> {
    let source: Arc<dyn DataSource> = match p.kind {
        ProviderKind::AirQuality => Arc::new(OpenMeteoAirQuality::new(&p.name, p.url.clone())?),
        ProviderKind::Census => Arc::new(CensusDemographics::new(&p.name, api_key(p), p.url.clone())?),
        ProviderKind::Http => {
            let area = p.area.ok_or_else(|| missing(p, "area"))?;
            let url = p.url.clone().ok_or_else(|| missing(p, "url"))?;
            let key = api_key(p).map(|value| QueryKey {
                param: p.api_key_param.clone().unwrap_or_else(|| DEFAULT_KEY_PARAM.to_string()),
                value,
            });
            Arc::new(HttpJsonSource::new(&p.name, area, url, key, p.json_pointer.clone())?)
        }
        ProviderKind::Static => {
            let area = p.area.ok_or_else(|| missing(p, "area"))?;
            let payload = p.payload.clone().unwrap_or(serde_json::Value::Null);
            Arc::new(StaticSource::new(&p.name, area, payload))
        }
    };
    Ok(source)
}

/// Resolve the provider's key, if it names one. A missing variable runs
/// the provider keyless.
fn api_key(p: &ProviderConfig) -> Option<SecretString> {
    let env = p.api_key_env.as_deref()?;
    match AppConfig::resolve_env(env) {
        Ok(value) if !value.is_empty() => Some(SecretString::new(value)),
        _ => {
            warn!(provider = %p.name, env, "API key not set, running without key");
            None
        }
    }
}

fn missing(p: &ProviderConfig, field: &str) -> VicinityError {
    VicinityError::DataSource {
        provider: p.name.clone(),
        message: format!("missing `{field}`"),
    }
}
