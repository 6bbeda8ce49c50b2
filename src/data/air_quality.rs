//! Air quality data provider.
//!
//! Uses the free Open-Meteo air quality API (no key required) for
//! current pollutant levels at a pair of coordinates.
//!
//! API: `https://air-quality-api.open-meteo.com/v1/air-quality`
//! Auth: None required.
//! Rate limit: Generous (free tier), still counted against the configured quota.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::DataSource;
use crate::types::{AreaData, DataArea, LocationKey, VicinityError};

const DEFAULT_BASE_URL: &str = "https://air-quality-api.open-meteo.com/v1/air-quality";

// ---------------------------------------------------------------------------
// Open-Meteo response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Serialize)]
struct AirQualityResponse {
    #[serde(default)]
    current: Option<AirQualityCurrent>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct AirQualityCurrent {
    #[serde(default)]
    us_aqi: Option<f64>,
    #[serde(default)]
    pm2_5: Option<f64>,
    #[serde(default)]
    pm10: Option<f64>,
    #[serde(default)]
    ozone: Option<f64>,
    #[serde(default)]
    nitrogen_dioxide: Option<f64>,
}

/// EPA category for a US AQI value.
fn aqi_category(aqi: f64) -> &'static str {
    match aqi {
        a if a <= 50.0 => "good",
        a if a <= 100.0 => "moderate",
        a if a <= 150.0 => "unhealthy for sensitive groups",
        a if a <= 200.0 => "unhealthy",
        a if a <= 300.0 => "very unhealthy",
        _ => "hazardous",
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct OpenMeteoAirQuality {
    name: String,
    http: Client,
    base_url: String,
}

impl OpenMeteoAirQuality {
    pub fn new(name: impl Into<String>, base_url: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent("VICINITY/0.1.0")
            .build()
            .context("Failed to build air quality HTTP client")?;
        Ok(Self {
            name: name.into(),
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    /// Build a human-readable summary from the API response.
    fn summarise(current: &AirQualityCurrent) -> String {
        let mut parts = Vec::new();
        if let Some(aqi) = current.us_aqi {
            parts.push(format!("US AQI {aqi:.0} ({})", aqi_category(aqi)));
        }
        if let Some(pm) = current.pm2_5 {
            parts.push(format!("PM2.5 {pm:.1}µg/m³"));
        }
        if let Some(pm) = current.pm10 {
            parts.push(format!("PM10 {pm:.1}µg/m³"));
        }
        if let Some(o3) = current.ozone {
            parts.push(format!("O₃ {o3:.0}µg/m³"));
        }
        if parts.is_empty() {
            "No current air quality readings".to_string()
        } else {
            parts.join(", ")
        }
    }
}

#[async_trait]
impl DataSource for OpenMeteoAirQuality {
    fn name(&self) -> &str {
        &self.name
    }

    fn area(&self) -> DataArea {
        DataArea::AirQuality
    }

    async fn fetch(&self, location: &LocationKey) -> Result<AreaData> {
        let Some((lat, lon)) = location.coordinates() else {
            return Err(VicinityError::InvalidLocation {
                location: location.to_string(),
                message: "no coordinates".to_string(),
            }
            .into());
        };

        let url = format!(
            "{}?latitude={lat}&longitude={lon}\
             &current=us_aqi,pm2_5,pm10,ozone,nitrogen_dioxide",
            self.base_url
        );
        debug!(provider = %self.name, %url, "Fetching air quality");

        let resp = self.http.get(&url).send().await
            .context("Open-Meteo air quality request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Open-Meteo air quality API error: {status}");
        }

        let data: AirQualityResponse = resp.json().await
            .context("Failed to parse Open-Meteo air quality response")?;
        let current = data.current.unwrap_or_default();

        Ok(AreaData {
            area: DataArea::AirQuality,
            provider: self.name.clone(),
            summary: Self::summarise(&current),
            payload: serde_json::to_value(&current)
                .context("Failed to serialise air quality readings")?,
            fetched_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
