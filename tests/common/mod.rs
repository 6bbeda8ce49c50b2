//! Mock data source for integration testing.
//!
//! Provides a deterministic `DataSource` whose behaviour can be switched
//! from test code: succeed, fail, hang past the timeout or panic. Every
//! invocation is counted.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use vicinity::cache::store::MemoryCacheStore;
use vicinity::clock::ManualClock;
use vicinity::data::DataSource;
use vicinity::engine::aggregator::ProviderSlot;
use vicinity::quota::store::UsageStore;
use vicinity::quota::QuotaLimits;
use vicinity::service::AreaService;
use vicinity::types::{AreaData, DataArea, LocationKey};

/// Per-call timeout used by every mock slot.
pub const CALL_TIMEOUT: StdDuration = StdDuration::from_millis(200);

#[derive(Debug, Clone)]
pub enum Mode {
    Succeed,
    Fail(String),
    Hang,
    Panic,
}

pub struct MockSource {
    name: String,
    area: DataArea,
    mode: Mutex<Mode>,
    calls: AtomicUsize,
    locations: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new(name: &str, area: DataArea) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            area,
            mode: Mutex::new(Mode::Succeed),
            calls: AtomicUsize::new(0),
            locations: Mutex::new(Vec::new()),
        })
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Locations fetched, in call order.
    pub fn locations(&self) -> Vec<String> {
        self.locations.lock().unwrap().clone()
    }

    pub fn slot(self: &Arc<Self>, daily: u32, monthly: u32, ttl_mins: i64) -> ProviderSlot {
        ProviderSlot::new(
            self.clone(),
            QuotaLimits::new(daily, monthly),
            Duration::minutes(ttl_mins),
            CALL_TIMEOUT,
        )
    }
}

#[async_trait]
impl DataSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn area(&self) -> DataArea {
        self.area
    }

    async fn fetch(&self, location: &LocationKey) -> Result<AreaData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.locations.lock().unwrap().push(location.cache_key().to_string());

        let mode = self.mode.lock().unwrap().clone();
        match mode {
            Mode::Succeed => {}
            Mode::Fail(msg) => return Err(anyhow!(msg)),
            Mode::Hang => tokio::time::sleep(CALL_TIMEOUT * 20).await,
            Mode::Panic => panic!("{} adapter bug", self.name),
        }

        Ok(AreaData {
            area: self.area,
            provider: self.name.clone(),
            payload: serde_json::json!({ "provider": self.name, "location": location.cache_key() }),
            summary: format!("{} for {}", self.area, location),
            fetched_at: Utc::now(),
        })
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap()
}

/// Service over the given slots with an in-memory cache and a manual clock.
pub fn service(
    slots: Vec<ProviderSlot>,
    usage: Arc<dyn UsageStore>,
    clock: &ManualClock,
) -> AreaService {
    AreaService::assemble(
        slots,
        usage,
        Arc::new(MemoryCacheStore::new()),
        Arc::new(clock.clone()),
    )
}
