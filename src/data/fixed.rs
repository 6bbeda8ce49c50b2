//! Static data provider.
//!
//! Serves a fixed payload from configuration for every location. Useful
//! for local development and for areas whose data rarely changes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use super::DataSource;
use crate::types::{AreaData, DataArea, LocationKey};

pub struct StaticSource {
    name: String,
    area: DataArea,
    payload: serde_json::Value,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, area: DataArea, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            area,
            payload,
        }
    }
}

#[async_trait]
impl DataSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn area(&self) -> DataArea {
        self.area
    }

    async fn fetch(&self, location: &LocationKey) -> Result<AreaData> {
        Ok(AreaData {
            area: self.area,
            provider: self.name.clone(),
            summary: format!("static {} data for {location}", self.area),
            payload: self.payload.clone(),
            fetched_at: Utc::now(),
        })
    }
}
