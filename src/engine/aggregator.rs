//! Aggregation pipeline.
//!
//! Answers a location lookup from cache when it can, otherwise fans out
//! to every provider that still has quota, waits for all of them to
//! settle, merges whatever came back and writes the record through to
//! the cache. A lookup never fails: the worst answer is a `minimal`
//! record with every area absent.

use chrono::Duration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use super::refresh::RefreshPolicy;
use crate::cache::ExpiringCache;
use crate::clock::Clock;
use crate::data::DataSource;
use crate::quota::{QuotaLimits, QuotaTracker};
use crate::types::{
    CacheStatus, CompositeRecord, DataArea, FailureReason, LocationKey, Priority, QualityGrade,
    SkipReason, SourceOutcome, SourceSummary, QUOTA_FALLBACK_NOTICE,
};

// ---------------------------------------------------------------------------
// Provider slots
// ---------------------------------------------------------------------------

/// A configured provider together with its quota, freshness and timeout.
#[derive(Clone)]
pub struct ProviderSlot {
    pub source: Arc<dyn DataSource>,
    pub limits: QuotaLimits,
    /// Default freshness window of this provider's data.
    pub ttl: Duration,
    /// Upper bound on one fetch.
    pub timeout: StdDuration,
}

impl ProviderSlot {
    pub fn new(
        source: Arc<dyn DataSource>,
        limits: QuotaLimits,
        ttl: Duration,
        timeout: StdDuration,
    ) -> Self {
        Self {
            source,
            limits,
            ttl,
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn area(&self) -> DataArea {
        self.source.area()
    }
}

impl std::fmt::Debug for ProviderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSlot")
            .field("name", &self.name())
            .field("area", &self.area())
            .field("limits", &self.limits)
            .field("ttl_mins", &self.ttl.num_minutes())
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    refreshes: AtomicU64,
    aggregations: AtomicU64,
    stale_fallbacks: AtomicU64,
    coalesced: AtomicU64,
}

/// Point-in-time view of the aggregator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregatorStats {
    /// Lookups answered from cache without calling a provider.
    pub cache_hits: u64,
    /// Cached records the refresh policy sent back upstream.
    pub refreshes: u64,
    /// Upstream fan-outs run.
    pub aggregations: u64,
    /// Stale records served because every provider was out of quota.
    pub stale_fallbacks: u64,
    /// Lookups that joined an aggregation already in flight.
    pub coalesced: u64,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

type InFlight = Shared<BoxFuture<'static, CompositeRecord>>;

enum CacheLookup {
    Hit(CompositeRecord),
    /// Present but due for refresh.
    Stale(CompositeRecord),
    Miss,
}

enum Pending {
    Skipped(SkipReason),
    Running(JoinHandle<SourceOutcome>),
}

/// Quota-aware fan-out over all configured providers.
///
/// Cheap to clone; clones share quota, cache, counters and the
/// in-flight map.
#[derive(Clone)]
pub struct Aggregator {
    providers: Arc<Vec<ProviderSlot>>,
    /// Distinct areas, in configured order.
    areas: Arc<Vec<DataArea>>,
    quota: Arc<QuotaTracker>,
    cache: Arc<ExpiringCache<CompositeRecord>>,
    clock: Arc<dyn Clock>,
    counters: Arc<Counters>,
    /// Present when at most one aggregation per key may run at a time.
    in_flight: Option<Arc<DashMap<String, InFlight>>>,
}

impl Aggregator {
    pub fn new(
        providers: Vec<ProviderSlot>,
        quota: Arc<QuotaTracker>,
        cache: Arc<ExpiringCache<CompositeRecord>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut areas = Vec::new();
        for slot in &providers {
            if !areas.contains(&slot.area()) {
                areas.push(slot.area());
            }
            if !quota.is_configured(slot.name()) {
                warn!(provider = slot.name(), "Provider has no quota limits and will never be called");
            }
        }
        Self {
            providers: Arc::new(providers),
            areas: Arc::new(areas),
            quota,
            cache,
            clock,
            counters: Arc::new(Counters::default()),
            in_flight: None,
        }
    }

    /// Share one upstream aggregation between concurrent misses on the
    /// same key.
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.in_flight = enabled.then(|| Arc::new(DashMap::new()));
        self
    }

    pub fn providers(&self) -> &[ProviderSlot] {
        &self.providers
    }

    pub fn areas(&self) -> &[DataArea] {
        &self.areas
    }

    pub fn stats(&self) -> AggregatorStats {
        let c = &self.counters;
        AggregatorStats {
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            refreshes: c.refreshes.load(Ordering::Relaxed),
            aggregations: c.aggregations.load(Ordering::Relaxed),
            stale_fallbacks: c.stale_fallbacks.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
        }
    }

    /// Composite record for a location.
    pub async fn get_data(&self, location: &str, priority: Priority) -> CompositeRecord {
        let key = LocationKey::parse(location);

        let stale = match self.lookup(&key, priority) {
            CacheLookup::Hit(record) => return record,
            CacheLookup::Stale(record) => Some(record),
            CacheLookup::Miss => None,
        };

        match &self.in_flight {
            Some(in_flight) => self.coalesce(in_flight, key, stale).await,
            None => self.aggregate(key, stale).await,
        }
    }

    fn lookup(&self, key: &LocationKey, priority: Priority) -> CacheLookup {
        let Some(entry) = self.cache.get_entry(key.cache_key()) else {
            debug!(location = %key, "Cache miss");
            return CacheLookup::Miss;
        };

        let age = entry.age(self.clock.now());
        if RefreshPolicy::should_refresh(age, entry.ttl(), priority) {
            self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
            debug!(
                location = %key,
                priority,
                age_secs = age.num_seconds(),
                ttl_secs = entry.ttl().num_seconds(),
                "Cached record due for refresh"
            );
            return CacheLookup::Stale(entry.payload);
        }

        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        debug!(location = %key, priority, "Cache hit");
        let mut record = entry.payload;
        record.cache_status = CacheStatus::Cached;
        CacheLookup::Hit(record)
    }

    /// Join the aggregation in flight for this key, or start one. The
    /// aggregation runs as its own task and clears its map entry when it
    /// settles, so it finishes and caches even if every waiter goes away.
    async fn coalesce(
        &self,
        in_flight: &Arc<DashMap<String, InFlight>>,
        key: LocationKey,
        stale: Option<CompositeRecord>,
    ) -> CompositeRecord {
        let cache_key = key.cache_key().to_string();

        let shared = match in_flight.entry(cache_key.clone()) {
            Entry::Occupied(existing) => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(location = %cache_key, "Joining aggregation in flight");
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                let this = self.clone();
                let map = Arc::clone(in_flight);
                let flight_key = cache_key.clone();
                let handle = tokio::spawn(async move {
                    let record = this.aggregate(key, stale).await;
                    map.remove(&flight_key);
                    record
                });

                let areas = Arc::clone(&self.areas);
                let clock = Arc::clone(&self.clock);
                let location = cache_key.clone();
                let fut = async move {
                    match handle.await {
                        Ok(record) => record,
                        Err(e) => {
                            warn!(location = %location, error = %join_error_message(e), "Aggregation task failed");
                            CompositeRecord::empty(&location, &areas, clock.now())
                        }
                    }
                }
                .boxed()
                .shared();
                slot.insert(fut.clone());
                fut
            }
        };

        shared.await
    }

    /// Admit, fan out, settle, merge, write through.
    async fn aggregate(&self, key: LocationKey, stale: Option<CompositeRecord>) -> CompositeRecord {
        self.counters.aggregations.fetch_add(1, Ordering::Relaxed);

        let pending: Vec<Pending> = self
            .providers
            .iter()
            .map(|slot| {
                if self.quota.try_acquire(slot.name()) {
                    Pending::Running(Self::spawn_fetch(slot, &key))
                } else {
                    debug!(provider = slot.name(), location = %key, "Skipping provider, quota exhausted");
                    Pending::Skipped(SkipReason::QuotaExhausted)
                }
            })
            .collect();

        // Settle-all; join_all keeps configured order.
        let outcomes = join_all(pending.into_iter().map(|p| async move {
            match p {
                Pending::Skipped(reason) => SourceOutcome::Skipped(reason),
                Pending::Running(handle) => match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => SourceOutcome::Failure(FailureReason::Panicked(join_error_message(e))),
                },
            }
        }))
        .await;

        let attempted = outcomes.iter().filter(|o| o.was_attempted()).count();

        if attempted == 0 {
            if let Some(mut record) = stale {
                self.counters.stale_fallbacks.fetch_add(1, Ordering::Relaxed);
                info!(location = %key, "Every provider out of quota, serving stale record");
                record.cache_status = CacheStatus::StaleQuotaFallback;
                record.notice = Some(QUOTA_FALLBACK_NOTICE.to_string());
                return record;
            }
        }

        let (record, ttl) = self.merge(&key, outcomes);

        info!(
            location = %key,
            grade = %record.quality_grade,
            attempted,
            available = record.available_count(),
            areas = record.areas.len(),
            "Aggregation complete"
        );

        match ttl {
            Some(ttl) => self.cache.set(key.cache_key(), record.clone(), ttl),
            None => debug!(location = %key, "Nothing succeeded, record not cached"),
        }
        record
    }

    fn spawn_fetch(slot: &ProviderSlot, key: &LocationKey) -> JoinHandle<SourceOutcome> {
        let source = Arc::clone(&slot.source);
        let location = key.clone();
        let timeout = slot.timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, source.fetch(&location)).await {
                Ok(Ok(data)) => SourceOutcome::Success(data),
                Ok(Err(e)) => {
                    warn!(provider = source.name(), location = %location, error = %e, "Provider failed");
                    SourceOutcome::Failure(FailureReason::Error(format!("{e:#}")))
                }
                Err(_) => {
                    warn!(
                        provider = source.name(),
                        location = %location,
                        timeout_ms = timeout.as_millis() as u64,
                        "Provider timed out"
                    );
                    SourceOutcome::Failure(FailureReason::Timeout(timeout))
                }
            }
        })
    }

    /// Build the record from settled outcomes. Returns the write-through
    /// TTL: the shortest TTL among providers that delivered, or None if
    /// none did.
    fn merge(
        &self,
        key: &LocationKey,
        outcomes: Vec<SourceOutcome>,
    ) -> (CompositeRecord, Option<Duration>) {
        let mut record = CompositeRecord::empty(key.cache_key(), &self.areas, self.clock.now());
        let mut attempted = 0;
        let mut successes = 0;
        let mut ttl: Option<Duration> = None;

        for (slot, outcome) in self.providers.iter().zip(outcomes) {
            let status = outcome.status();
            if outcome.was_attempted() {
                attempted += 1;
            }

            let (available, detail) = match outcome {
                SourceOutcome::Success(data) => {
                    successes += 1;
                    ttl = Some(ttl.map_or(slot.ttl, |t| t.min(slot.ttl)));
                    // First success in configured order wins a shared area.
                    let area = record.areas.entry(slot.area()).or_insert(None);
                    if area.is_none() {
                        *area = Some(data);
                    }
                    (true, None)
                }
                SourceOutcome::Failure(reason) => (false, Some(reason.to_string())),
                SourceOutcome::Skipped(reason) => (false, Some(reason.to_string())),
            };

            record.source_summary.push(SourceSummary {
                provider: slot.name().to_string(),
                area: slot.area(),
                available,
                status,
                detail,
            });
        }

        record.quality_grade = QualityGrade::from_counts(successes, attempted);
        (record, ttl)
    }
}

fn join_error_message(e: JoinError) -> String {
    if e.is_cancelled() {
        return "task cancelled".to_string();
    }
    let panic = e.into_panic();
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryCacheStore;
    use crate::clock::ManualClock;
    use crate::quota::store::MemoryUsageStore;
    use crate::types::{AreaData, SourceStatus};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        Fail,
        Delay(StdDuration),
        Panic,
    }

    struct FakeSource {
        name: String,
        area: DataArea,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(name: &str, area: DataArea, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                area,
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DataSource for FakeSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn area(&self) -> DataArea {
            self.area
        }

        async fn fetch(&self, location: &LocationKey) -> Result<AreaData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Succeed => {}
                Behaviour::Fail => anyhow::bail!("{} is down", self.name),
                Behaviour::Delay(d) => tokio::time::sleep(d).await,
                Behaviour::Panic => panic!("{} exploded", self.name),
            }
            Ok(AreaData {
                area: self.area,
                provider: self.name.clone(),
                payload: serde_json::json!({ "location": location.cache_key() }),
                summary: format!("{} data", self.name),
                fetched_at: Utc::now(),
            })
        }
    }

    struct Harness {
        aggregator: Aggregator,
        quota: Arc<QuotaTracker>,
        cache: Arc<ExpiringCache<CompositeRecord>>,
        clock: ManualClock,
    }

    fn slot(source: &Arc<FakeSource>, daily: u32, ttl_mins: i64) -> ProviderSlot {
        ProviderSlot::new(
            source.clone(),
            QuotaLimits::new(daily, 1000),
            Duration::minutes(ttl_mins),
            StdDuration::from_millis(200),
        )
    }

    fn harness(slots: Vec<ProviderSlot>) -> Harness {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap());
        let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
        let quota = Arc::new(QuotaTracker::new(
            slots.iter().map(|s| (s.name().to_string(), s.limits)),
            Arc::new(MemoryUsageStore::new()),
            clock_dyn.clone(),
        ));
        let cache = Arc::new(ExpiringCache::new(
            Arc::new(MemoryCacheStore::new()),
            clock_dyn.clone(),
        ));
        let aggregator = Aggregator::new(slots, quota.clone(), cache.clone(), clock_dyn);
        Harness { aggregator, quota, cache, clock }
    }

    fn four_sources(behaviours: [Behaviour; 4]) -> Vec<Arc<FakeSource>> {
        let names = [
            ("census", DataArea::Demographics),
            ("air", DataArea::AirQuality),
            ("schools", DataArea::Schools),
            ("crime", DataArea::Crime),
        ];
        names
            .iter()
            .zip(behaviours)
            .map(|((n, a), b)| FakeSource::new(n, *a, b))
            .collect()
    }

    #[tokio::test]
    async fn test_all_providers_succeed() {
        let sources = four_sources([Behaviour::Succeed; 4]);
        let h = harness(sources.iter().map(|s| slot(s, 10, 60)).collect());

        let record = h.aggregator.get_data("94110", 0).await;

        assert_eq!(record.quality_grade, QualityGrade::High);
        assert_eq!(record.cache_status, CacheStatus::Fresh);
        assert_eq!(record.available_count(), 4);
        assert!(record.notice.is_none());
        for s in &sources {
            assert_eq!(s.calls(), 1);
            assert_eq!(h.quota.get_usage(&s.name).calls_today, 1);
        }
    }

    #[tokio::test]
    async fn test_grade_follows_success_count() {
        let cases = [
            (0, QualityGrade::High),
            (1, QualityGrade::High),
            (2, QualityGrade::Medium),
            (3, QualityGrade::Low),
            (4, QualityGrade::Minimal),
        ];
        for (failing, expected) in cases {
            let mut behaviours = [Behaviour::Succeed; 4];
            for b in behaviours.iter_mut().take(failing) {
                *b = Behaviour::Fail;
            }
            let sources = four_sources(behaviours);
            let h = harness(sources.iter().map(|s| slot(s, 10, 60)).collect());
            let record = h.aggregator.get_data("94110", 0).await;
            assert_eq!(record.quality_grade, expected, "{failing} failing");
        }
    }

    #[tokio::test]
    async fn test_one_timeout_is_isolated() {
        let sources = four_sources([
            Behaviour::Succeed,
            Behaviour::Delay(StdDuration::from_secs(5)),
            Behaviour::Succeed,
            Behaviour::Succeed,
        ]);
        let h = harness(sources.iter().map(|s| slot(s, 10, 60)).collect());

        let record = h.aggregator.get_data("94110", 0).await;

        assert_eq!(record.available_count(), 3);
        assert!(record.area(DataArea::AirQuality).is_none());
        let air = record.summary_for("air").unwrap();
        assert_eq!(air.status, SourceStatus::TimedOut);
        assert!(!air.available);
        // A timed-out call still spent quota.
        assert_eq!(h.quota.get_usage("air").calls_today, 1);
        for name in ["census", "schools", "crime"] {
            assert_eq!(record.summary_for(name).unwrap().status, SourceStatus::Ok);
        }
        assert_eq!(record.quality_grade, QualityGrade::High);
    }

    #[tokio::test]
    async fn test_failure_and_panic_are_isolated() {
        let sources = four_sources([
            Behaviour::Succeed,
            Behaviour::Fail,
            Behaviour::Panic,
            Behaviour::Succeed,
        ]);
        let h = harness(sources.iter().map(|s| slot(s, 10, 60)).collect());

        let record = h.aggregator.get_data("94110", 0).await;

        let failed = record.summary_for("air").unwrap();
        assert_eq!(failed.status, SourceStatus::Failed);
        assert!(failed.detail.as_deref().unwrap().contains("air is down"));

        let panicked = record.summary_for("schools").unwrap();
        assert_eq!(panicked.status, SourceStatus::Failed);
        assert!(panicked.detail.as_deref().unwrap().contains("panicked"));

        assert_eq!(record.quality_grade, QualityGrade::Medium);
        assert_eq!(h.quota.get_usage("schools").calls_today, 1);
    }

    #[tokio::test]
    async fn test_summary_order_is_configured_order() {
        let sources = four_sources([
            Behaviour::Delay(StdDuration::from_millis(60)),
            Behaviour::Delay(StdDuration::from_millis(30)),
            Behaviour::Succeed,
            Behaviour::Delay(StdDuration::from_millis(10)),
        ]);
        let h = harness(sources.iter().map(|s| slot(s, 10, 60)).collect());

        let record = h.aggregator.get_data("94110", 0).await;

        let order: Vec<&str> = record.source_summary.iter().map(|s| s.provider.as_str()).collect();
        assert_eq!(order, vec!["census", "air", "schools", "crime"]);
        assert_eq!(record.available_count(), 4);
    }

    #[tokio::test]
    async fn test_cache_hit_makes_no_calls() {
        let sources = four_sources([Behaviour::Succeed; 4]);
        let h = harness(sources.iter().map(|s| slot(s, 10, 60)).collect());

        h.aggregator.get_data("94110", 0).await;
        h.clock.advance(Duration::minutes(30));
        let second = h.aggregator.get_data(" 94110 ", 0).await;

        assert_eq!(second.cache_status, CacheStatus::Cached);
        assert_eq!(second.available_count(), 4);
        assert!(sources.iter().all(|s| s.calls() == 1));
        assert_eq!(h.aggregator.stats().cache_hits, 1);
        assert_eq!(h.aggregator.stats().aggregations, 1);
    }

    #[tokio::test]
    async fn test_priority_triggers_early_refresh() {
        let sources = four_sources([Behaviour::Succeed; 4]);
        let h = harness(sources.iter().map(|s| slot(s, 10, 60)).collect());

        h.aggregator.get_data("94110", 0).await;
        h.clock.advance(Duration::minutes(57));

        let low = h.aggregator.get_data("94110", 0).await;
        assert_eq!(low.cache_status, CacheStatus::Cached);
        assert!(sources.iter().all(|s| s.calls() == 1));

        let high = h.aggregator.get_data("94110", 3).await;
        assert_eq!(high.cache_status, CacheStatus::Fresh);
        assert!(sources.iter().all(|s| s.calls() == 2));
        assert_eq!(h.aggregator.stats().refreshes, 1);
    }

    #[tokio::test]
    async fn test_exhausted_provider_is_skipped() {
        let census = FakeSource::new("census", DataArea::Demographics, Behaviour::Succeed);
        let weather = FakeSource::new("weather", DataArea::Weather, Behaviour::Succeed);
        let h = harness(vec![slot(&census, 100, 60), slot(&weather, 2, 60)]);

        h.aggregator.get_data("94110", 0).await;
        h.aggregator.get_data("94103", 0).await;
        let third = h.aggregator.get_data("10001", 0).await;

        assert_eq!(weather.calls(), 2);
        assert_eq!(census.calls(), 3);
        let w = third.summary_for("weather").unwrap();
        assert_eq!(w.status, SourceStatus::QuotaExhausted);
        assert_eq!(w.detail.as_deref(), Some("quota_exhausted"));
        assert!(third.area(DataArea::Weather).is_none());
        assert!(third.area(DataArea::Demographics).is_some());
        // Skipped providers do not count toward the grade.
        assert_eq!(third.quality_grade, QualityGrade::High);
        assert_eq!(h.quota.get_usage("weather").calls_today, 2);
    }

    #[tokio::test]
    async fn test_stale_fallback_when_all_exhausted() {
        let census = FakeSource::new("census", DataArea::Demographics, Behaviour::Succeed);
        let h = harness(vec![slot(&census, 1, 60)]);

        let first = h.aggregator.get_data("94110", 0).await;
        h.clock.advance(Duration::minutes(57));
        let fallback = h.aggregator.get_data("94110", 3).await;

        assert_eq!(census.calls(), 1);
        assert_eq!(fallback.cache_status, CacheStatus::StaleQuotaFallback);
        assert_eq!(fallback.notice.as_deref(), Some(QUOTA_FALLBACK_NOTICE));
        assert_eq!(fallback.areas, first.areas);
        assert_eq!(h.aggregator.stats().stale_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_all_exhausted_without_cache_is_minimal() {
        let census = FakeSource::new("census", DataArea::Demographics, Behaviour::Succeed);
        let air = FakeSource::new("air", DataArea::AirQuality, Behaviour::Succeed);
        let h = harness(vec![slot(&census, 0, 60), slot(&air, 0, 60)]);

        let record = h.aggregator.get_data("94110", 0).await;

        assert_eq!(record.quality_grade, QualityGrade::Minimal);
        assert_eq!(record.available_count(), 0);
        assert_eq!(record.areas.len(), 2);
        assert!(record
            .source_summary
            .iter()
            .all(|s| s.status == SourceStatus::QuotaExhausted));
        assert_eq!(census.calls() + air.calls(), 0);
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn test_failed_record_not_cached() {
        let census = FakeSource::new("census", DataArea::Demographics, Behaviour::Fail);
        let h = harness(vec![slot(&census, 10, 60)]);

        let record = h.aggregator.get_data("94110", 0).await;
        assert_eq!(record.quality_grade, QualityGrade::Minimal);
        assert!(h.cache.is_empty());

        h.aggregator.get_data("94110", 0).await;
        assert_eq!(census.calls(), 2);
    }

    #[tokio::test]
    async fn test_write_through_uses_shortest_successful_ttl() {
        let census = FakeSource::new("census", DataArea::Demographics, Behaviour::Succeed);
        let air = FakeSource::new("air", DataArea::AirQuality, Behaviour::Succeed);
        let news = FakeSource::new("news", DataArea::News, Behaviour::Fail);
        let h = harness(vec![slot(&census, 10, 24 * 60), slot(&air, 10, 30), slot(&news, 10, 5)]);

        h.aggregator.get_data("94110", 0).await;

        let entry = h.cache.get_entry("94110").unwrap();
        assert_eq!(entry.ttl(), Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_shared_area_first_success_wins() {
        let primary = FakeSource::new("primary", DataArea::Weather, Behaviour::Fail);
        let secondary = FakeSource::new("secondary", DataArea::Weather, Behaviour::Succeed);
        let tertiary = FakeSource::new("tertiary", DataArea::Weather, Behaviour::Succeed);
        let h = harness(vec![
            slot(&primary, 10, 60),
            slot(&secondary, 10, 60),
            slot(&tertiary, 10, 60),
        ]);

        let record = h.aggregator.get_data("94110", 0).await;

        assert_eq!(record.areas.len(), 1);
        assert_eq!(record.area(DataArea::Weather).unwrap().provider, "secondary");
        assert_eq!(record.quality_grade, QualityGrade::Medium);
    }

    #[tokio::test]
    async fn test_concurrent_misses_both_spend_quota() {
        let slow = FakeSource::new("slow", DataArea::Crime, Behaviour::Delay(StdDuration::from_millis(50)));
        let h = harness(vec![slot(&slow, 10, 60)]);

        let (a, b) = tokio::join!(
            h.aggregator.get_data("94110", 0),
            h.aggregator.get_data("94110", 0),
        );

        assert_eq!(a.available_count(), 1);
        assert_eq!(b.available_count(), 1);
        assert_eq!(slow.calls(), 2);
        assert_eq!(h.quota.get_usage("slow").calls_today, 2);
    }

    #[tokio::test]
    async fn test_single_flight_shares_one_aggregation() {
        let slow = FakeSource::new("slow", DataArea::Crime, Behaviour::Delay(StdDuration::from_millis(50)));
        let h = harness(vec![slot(&slow, 10, 60)]);
        let aggregator = h.aggregator.clone().with_single_flight(true);

        let (a, b) = tokio::join!(
            aggregator.get_data("94110", 0),
            aggregator.get_data("94110", 0),
        );

        assert_eq!(a, b);
        assert_eq!(slow.calls(), 1);
        assert_eq!(h.quota.get_usage("slow").calls_today, 1);
        assert_eq!(aggregator.stats().coalesced, 1);
    }

    #[tokio::test]
    async fn test_single_flight_finishes_after_waiters_drop() {
        let slow = FakeSource::new("slow", DataArea::Crime, Behaviour::Delay(StdDuration::from_millis(50)));
        let h = harness(vec![slot(&slow, 10, 60)]);
        let aggregator = h.aggregator.clone().with_single_flight(true);

        // The only waiter gives up before the provider answers.
        let abandoned =
            tokio::time::timeout(StdDuration::from_millis(10), aggregator.get_data("94110", 0)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(StdDuration::from_millis(150)).await;

        let in_flight = aggregator.in_flight.as_ref().unwrap();
        assert!(in_flight.is_empty());
        assert!(h.cache.get_entry("94110").is_some());

        let record = aggregator.get_data("94110", 0).await;
        assert_eq!(record.cache_status, CacheStatus::Cached);
        assert_eq!(slow.calls(), 1);
        assert_eq!(h.quota.get_usage("slow").calls_today, 1);
    }

    #[tokio::test]
    async fn test_single_flight_does_not_merge_different_keys() {
        let slow = FakeSource::new("slow", DataArea::Crime, Behaviour::Delay(StdDuration::from_millis(20)));
        let h = harness(vec![slot(&slow, 10, 60)]);
        let aggregator = h.aggregator.clone().with_single_flight(true);

        let (a, b) = tokio::join!(
            aggregator.get_data("94110", 0),
            aggregator.get_data("94103", 0),
        );

        assert_eq!(a.location, "94110");
        assert_eq!(b.location, "94103");
        assert_eq!(slow.calls(), 2);
    }
}
