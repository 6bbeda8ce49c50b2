//! Demographics data provider.
//!
//! Uses the US Census Bureau American Community Survey 5-year estimates
//! for a ZIP Code Tabulation Area.
//!
//! API: `https://api.census.gov/data/{year}/acs/acs5`
//! Auth: Optional API key via `key` query param. Without a key the
//! Census API allows 500 requests per day per IP.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::debug;

use super::DataSource;
use crate::types::{AreaData, DataArea, LocationKey, VicinityError};

const DEFAULT_BASE_URL: &str = "https://api.census.gov/data";
const DEFAULT_SURVEY_YEAR: u16 = 2022;

/// ACS variables requested, in response column order after `NAME`.
const VARIABLES: &[&str] = &[
    "B01003_001E", // total population
    "B19013_001E", // median household income
    "B01002_001E", // median age
    "B25077_001E", // median home value
];

/// Census marks suppressed estimates with large negative sentinels.
fn estimate(value: Option<&String>) -> Option<f64> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| *v >= 0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Demographics {
    zcta: String,
    population: Option<f64>,
    median_household_income: Option<f64>,
    median_age: Option<f64>,
    median_home_value: Option<f64>,
}

pub struct CensusDemographics {
    name: String,
    http: Client,
    base_url: String,
    year: u16,
    api_key: Option<SecretString>,
}

impl CensusDemographics {
    pub fn new(
        name: impl Into<String>,
        api_key: Option<SecretString>,
        base_url: Option<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("VICINITY/0.1.0")
            .build()
            .context("Failed to build census HTTP client")?;
        Ok(Self {
            name: name.into(),
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            year: DEFAULT_SURVEY_YEAR,
            api_key,
        })
    }

    fn request_url(&self, zip: &str) -> String {
        let mut url = format!(
            "{}/{}/acs/acs5?get=NAME,{}&for={}:{}",
            self.base_url,
            self.year,
            VARIABLES.join(","),
            urlencoding::encode("zip code tabulation area"),
            zip,
        );
        if let Some(key) = &self.api_key {
            url.push_str("&key=");
            url.push_str(&urlencoding::encode(key.expose_secret()));
        }
        url
    }

    /// The API answers with a header row followed by one data row.
    fn parse_rows(zip: &str, rows: &[Vec<String>]) -> Result<Demographics> {
        let row = rows.get(1).context("Census response has no data row")?;
        Ok(Demographics {
            zcta: zip.to_string(),
            population: estimate(row.get(1)),
            median_household_income: estimate(row.get(2)),
            median_age: estimate(row.get(3)),
            median_home_value: estimate(row.get(4)),
        })
    }

    fn summarise(d: &Demographics) -> String {
        let mut parts = vec![format!("ZCTA {}", d.zcta)];
        if let Some(p) = d.population {
            parts.push(format!("population {p:.0}"));
        }
        if let Some(i) = d.median_household_income {
            parts.push(format!("median income ${i:.0}"));
        }
        if let Some(a) = d.median_age {
            parts.push(format!("median age {a:.1}"));
        }
        parts.join(", ")
    }
}

#[async_trait]
impl DataSource for CensusDemographics {
    fn name(&self) -> &str {
        &self.name
    }

    fn area(&self) -> DataArea {
        DataArea::Demographics
    }

    async fn fetch(&self, location: &LocationKey) -> Result<AreaData> {
        let Some(zip) = location.zip() else {
            return Err(VicinityError::InvalidLocation {
                location: location.to_string(),
                message: "no ZIP code".to_string(),
            }
            .into());
        };
        debug!(provider = %self.name, zip, "Fetching census demographics");

        let resp = self.http.get(self.request_url(zip)).send().await
            .context("Census request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Census API error: {status}");
        }

        let rows: Vec<Vec<String>> = resp.json().await
            .context("Failed to parse census response")?;
        let demographics = Self::parse_rows(zip, &rows)?;

        Ok(AreaData {
            area: DataArea::Demographics,
            provider: self.name.clone(),
            summary: Self::summarise(&demographics),
            payload: serde_json::to_value(&demographics)
                .context("Failed to serialise demographics")?,
            fetched_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
