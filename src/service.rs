//! Service facade.
//!
//! `AreaService` wires the quota tracker, the record cache, the
//! aggregator and the usage reporter together and exposes the
//! operations callers use. There are no process-wide singletons: every
//! collaborator is built here and handed down explicitly.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::store::{CacheStore, MemoryCacheStore};
use crate::cache::ExpiringCache;
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::dashboard::usage::{UsageReporter, UsageRow};
use crate::data::registry;
use crate::engine::aggregator::{Aggregator, AggregatorStats, ProviderSlot};
use crate::quota::store::{FileUsageStore, MemoryUsageStore, UsageStore};
use crate::quota::QuotaTracker;
use crate::types::{CompositeRecord, Priority, UsageCounter};

pub struct AreaService {
    quota: Arc<QuotaTracker>,
    cache: Arc<ExpiringCache<CompositeRecord>>,
    aggregator: Aggregator,
    reporter: UsageReporter,
    /// Set when usage counters are persisted to disk.
    usage_file: Option<Arc<FileUsageStore>>,
}

impl AreaService {
    /// Build everything from configuration, on the system clock.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let slots = registry::build_providers(&cfg.providers, &cfg.cache, &cfg.aggregator)?;

        let usage_file = cfg
            .storage
            .usage_file
            .as_deref()
            .map(|path| Arc::new(FileUsageStore::open(Path::new(path))));
        let usage_store: Arc<dyn UsageStore> = match &usage_file {
            Some(file) => file.clone(),
            None => Arc::new(MemoryUsageStore::new()),
        };

        let cache_store: Arc<dyn CacheStore<CompositeRecord>> = match cfg.cache.max_entries {
            Some(max) => Arc::new(MemoryCacheStore::with_capacity_limit(max)),
            None => Arc::new(MemoryCacheStore::new()),
        };

        let mut service = Self::assemble(slots, usage_store, cache_store, Arc::new(SystemClock));
        service.aggregator = service.aggregator.with_single_flight(cfg.aggregator.single_flight);
        service.usage_file = usage_file;

        info!(
            providers = service.aggregator.providers().len(),
            areas = service.aggregator.areas().len(),
            single_flight = cfg.aggregator.single_flight,
            persistent_usage = service.usage_file.is_some(),
            "Area service ready"
        );
        Ok(service)
    }

    /// Build from explicit collaborators. Quota limits come from the slots.
    pub fn assemble(
        providers: Vec<ProviderSlot>,
        usage_store: Arc<dyn UsageStore>,
        cache_store: Arc<dyn CacheStore<CompositeRecord>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let quota = Arc::new(QuotaTracker::new(
            providers.iter().map(|s| (s.name().to_string(), s.limits)),
            usage_store,
            clock.clone(),
        ));
        let cache = Arc::new(ExpiringCache::new(cache_store, clock.clone()));
        let aggregator = Aggregator::new(providers, quota.clone(), cache.clone(), clock);
        let reporter = UsageReporter::new(quota.clone());

        Self {
            quota,
            cache,
            aggregator,
            reporter,
            usage_file: None,
        }
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.aggregator = self.aggregator.with_single_flight(enabled);
        self
    }

    pub async fn get_composite_data(&self, location: &str, priority: Priority) -> CompositeRecord {
        self.aggregator.get_data(location, priority).await
    }

    pub fn can_call(&self, provider: &str) -> bool {
        self.quota.can_call(provider)
    }

    pub fn get_usage(&self, provider: &str) -> UsageCounter {
        self.quota.get_usage(provider)
    }

    pub fn is_configured(&self, provider: &str) -> bool {
        self.quota.is_configured(provider)
    }

    /// Sweep expired records; returns how many were removed.
    pub fn evict_expired_cache(&self) -> usize {
        self.cache.evict_expired()
    }

    pub fn get_usage_dashboard(&self) -> Vec<UsageRow> {
        self.reporter.report()
    }

    pub fn stats(&self) -> AggregatorStats {
        self.aggregator.stats()
    }

    pub fn cached_records(&self) -> usize {
        self.cache.len()
    }

    /// Write changed usage counters to disk, if a usage file is configured.
    pub fn flush(&self) {
        if let Some(file) = &self.usage_file {
            match file.flush() {
                Ok(true) => debug!(path = %file.path().display(), "Usage state saved"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Failed to save usage state"),
            }
        }
    }
}
