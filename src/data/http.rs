//! Generic JSON-over-HTTP data provider.
//!
//! Covers the many government and open-data APIs that answer a GET with
//! a JSON document. The request URL is a template; placeholders are
//! filled from the location key:
//!
//! - `{zip}`: five-digit ZIP code
//! - `{state}`: two-letter state code derived from the ZIP
//! - `{lat}` / `{lon}`: coordinates
//! - `{location}`: the normalised key as given
//!
//! An optional JSON pointer narrows the response to the part worth caching.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use super::DataSource;
use crate::types::{AreaData, DataArea, LocationKey};

/// Longest summary kept from a raw JSON payload.
const MAX_SUMMARY_CHARS: usize = 160;

/// API key sent as a query parameter.
pub struct QueryKey {
    pub param: String,
    pub value: SecretString,
}

pub struct HttpJsonSource {
    name: String,
    area: DataArea,
    http: Client,
    url_template: String,
    api_key: Option<QueryKey>,
    json_pointer: Option<String>,
}

impl HttpJsonSource {
    pub fn new(
        name: impl Into<String>,
        area: DataArea,
        url_template: impl Into<String>,
        api_key: Option<QueryKey>,
        json_pointer: Option<String>,
    ) -> Result<Self> {
        let name = name.into();
        let http = Client::builder()
            .user_agent("VICINITY/0.1.0")
            .build()
            .with_context(|| format!("Failed to build HTTP client for {name}"))?;
        Ok(Self {
            name,
            area,
            http,
            url_template: url_template.into(),
            api_key,
            json_pointer,
        })
    }

    /// Fill the URL template for a location. Fails if the template needs
    /// a part the location does not have.
    fn render_url(&self, location: &LocationKey) -> Result<String> {
        let mut url = self.url_template.clone();

        if url.contains("{zip}") {
            let zip = location.zip()
                .with_context(|| format!("location '{location}' has no ZIP code"))?;
            url = url.replace("{zip}", zip);
        }
        if url.contains("{state}") {
            let state = location.state()
                .with_context(|| format!("location '{location}' has no known state"))?;
            url = url.replace("{state}", state);
        }
                if url.contains("{lat}") || url.contains("{lon}") {
            let (lat, lon) = location.coordinates()
                .with_context(|| format!("location '{location}' has no coordinates"))?;
            url = url.replace("{lat}", &lat.to_string()).replace("{lon}", &lon.to_string());
        }
        if url.contains("{location}") {
            url = url.replace("{location}", &urlencoding::encode(location.cache_key()));
        }

        if let Some(key) = &self.api_key {
            let sep = if url.contains('?') { '&' } else { '?' };
            url.push(sep);
            url.push_str(&key.param);
            url.push('=');
            url.push_str(&urlencoding::encode(key.value.expose_secret()));
        }
        Ok(url)
    }

    fn extract(&self, body: serde_json::Value) -> Result<serde_json::Value> {
        match &self.json_pointer {
            Some(pointer) => body
                .pointer(pointer)
                .cloned()
                .with_context(|| format!("response has nothing at {pointer}")),
            None => Ok(body),
        }
    }

    fn summarise(payload: &serde_json::Value) -> String {
        match payload {
            serde_json::Value::Array(items) => format!("{} records", items.len()),
            serde_json::Value::String(s) => s.chars().take(MAX_SUMMARY_CHARS).collect(),
            other => other.to_string().chars().take(MAX_SUMMARY_CHARS).collect(),
        }
    }
}

#[async_trait]
impl DataSource for HttpJsonSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn area(&self) -> DataArea {
        self.area
    }

    async fn fetch(&self, location: &LocationKey) -> Result<AreaData> {
        let url = self.render_url(location)?;
        debug!(provider = %self.name, area = %self.area, "Fetching");

        let resp = self.http.get(&url).send().await
            .with_context(|| format!("{} request failed", self.name))?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("{} API error: {status}", self.name);
        }

        let body: serde_json::Value = resp.json().await
            .with_context(|| format!("Failed to parse {} response", self.name))?;
        let payload = self.extract(body)?;

        Ok(AreaData {
            area: self.area,
            provider: self.name.clone(),
            summary: Self::summarise(&payload),
            payload,
            fetched_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
