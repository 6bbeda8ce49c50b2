//! Quota tracker: per-provider admission control.
//!
//! Every provider has a daily and a monthly call ceiling. The tracker
//! answers "may I call this provider now?" and records calls that were
//! actually made. Counters roll over on any access, read or write, once
//! the calendar day or month changes.
//!
//! Providers without configured limits get 0/0 and are never admitted.

pub mod store;

use dashmap::DashSet;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::types::UsageCounter;
use store::UsageStore;

/// Daily and monthly call ceilings for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuotaLimits {
    pub daily: u32,
    pub monthly: u32,
}

impl QuotaLimits {
    pub fn new(daily: u32, monthly: u32) -> Self {
        Self { daily, monthly }
    }
}

pub struct QuotaTracker {
    /// Configured providers in configuration order.
    providers: Vec<String>,
    limits: HashMap<String, QuotaLimits>,
    store: Arc<dyn UsageStore>,
    clock: Arc<dyn Clock>,
    /// Unknown providers already reported, so the warning fires once each.
    reported_unknown: DashSet<String>,
}

impl QuotaTracker {
    pub fn new(
        limits: impl IntoIterator<Item = (String, QuotaLimits)>,
        store: Arc<dyn UsageStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut providers = Vec::new();
        let mut map = HashMap::new();
        for (name, l) in limits {
            if map.insert(name.clone(), l).is_none() {
                providers.push(name);
            }
        }
        Self {
            providers,
            limits: map,
            store,
            clock,
            reported_unknown: DashSet::new(),
        }
    }

    /// Configured providers, in configuration order.
    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    pub fn is_configured(&self, provider: &str) -> bool {
        self.limits.contains_key(provider)
    }

    /// True iff one more call fits within today's and this month's limits.
    pub fn can_call(&self, provider: &str) -> bool {
        let allowed = self.with_counter(provider, &mut |_| {}).has_capacity();
        if !allowed {
            debug!(provider, "Quota check denied");
        }
        allowed
    }

    /// Count one consumed call. Not idempotent: every invocation consumes
    /// one unit, so callers must only record calls that were made.
    pub fn record_call(&self, provider: &str) {
        if !self.is_configured(provider) {
            self.report_unknown(provider);
            return;
        }
        let usage = self.with_counter(provider, &mut |c| c.record());
        debug!(
            provider,
            calls_today = usage.calls_today,
            calls_this_month = usage.calls_this_month,
            "Call recorded"
        );
    }

    /// Check and record in one step under the provider's lock.
    ///
    /// Equivalent to `can_call` followed by `record_call` when
    /// uncontended; under concurrency it cannot overshoot a limit.
    pub fn try_acquire(&self, provider: &str) -> bool {
        if !self.is_configured(provider) {
            self.report_unknown(provider);
            return false;
        }
        let mut granted = false;
        let usage = self.with_counter(provider, &mut |c| {
            if c.has_capacity() {
                c.record();
                granted = true;
            }
        });
        if !granted {
            debug!(provider, usage = %usage, "Quota exhausted");
        }
        granted
    }

    /// Snapshot of the provider's counter. Always defined.
    pub fn get_usage(&self, provider: &str) -> UsageCounter {
        self.with_counter(provider, &mut |_| {})
    }

    /// Run a mutation after applying limits and rollover. Unknown
    /// providers get a detached zero counter and never touch the store.
    fn with_counter(
        &self,
        provider: &str,
        mutate: &mut dyn FnMut(&mut UsageCounter),
    ) -> UsageCounter {
        let today = self.clock.today();
        let Some(limits) = self.limits.get(provider).copied() else {
            self.report_unknown(provider);
            return UsageCounter::new(today, 0, 0);
        };

        self.store.update(
            provider,
            &|| UsageCounter::new(today, limits.daily, limits.monthly),
            &mut |c| {
                // Limits follow configuration, even for counters restored from disk.
                c.daily_limit = limits.daily;
                c.monthly_limit = limits.monthly;
                c.roll_over(today);
                mutate(c);
            },
        )
    }

    fn report_unknown(&self, provider: &str) {
        if self.reported_unknown.insert(provider.to_string()) {
            warn!(provider, "Unknown provider has no quota configured; calls are denied");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use store::MemoryUsageStore;

    fn tracker(limits: &[(&str, u32, u32)]) -> (QuotaTracker, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap());
        let tracker = QuotaTracker::new(
            limits
                .iter()
                .map(|(n, d, m)| (n.to_string(), QuotaLimits::new(*d, *m))),
            Arc::new(MemoryUsageStore::new()),
            Arc::new(clock.clone()),
        );
        (tracker, clock)
    }

    #[test]
    fn test_unknown_provider_fails_closed() {
        let (t, _) = tracker(&[("census", 10, 100)]);
        assert!(!t.can_call("mystery"));
        assert!(!t.try_acquire("mystery"));
        let usage = t.get_usage("mystery");
        assert_eq!(usage.daily_limit, 0);
        assert_eq!(usage.monthly_limit, 0);
    }

    #[test]
    fn test_zero_daily_limit_denies() {
        let (t, _) = tracker(&[("census", 0, 100)]);
        assert!(!t.can_call("census"));
    }

    #[test]
    fn test_zero_monthly_limit_denies() {
        let (t, _) = tracker(&[("census", 10, 0)]);
        assert!(!t.can_call("census"));
    }

    #[test]
    fn test_record_call_counts_exactly_n() {
        let (t, _) = tracker(&[("census", 100, 1000)]);
        for _ in 0..7 {
            t.record_call("census");
        }
        let usage = t.get_usage("census");
        assert_eq!(usage.calls_today, 7);
        assert_eq!(usage.calls_this_month, 7);
    }

    #[test]
    fn test_daily_limit_boundary() {
        let (t, _) = tracker(&[("weather", 2, 100)]);
        assert!(t.can_call("weather"));
        t.record_call("weather");
        assert!(t.can_call("weather"));
        t.record_call("weather");
        assert!(!t.can_call("weather"));
        assert_eq!(t.get_usage("weather").calls_today, 2);
    }

    #[test]
    fn test_monthly_limit_survives_new_day() {
        let (t, clock) = tracker(&[("weather", 5, 3)]);
        for _ in 0..3 {
            t.record_call("weather");
        }
        clock.advance(Duration::days(1));
        assert!(!t.can_call("weather"));
        assert_eq!(t.get_usage("weather").calls_today, 0);
        assert_eq!(t.get_usage("weather").calls_this_month, 3);
    }

    #[test]
    fn test_rollover_on_read() {
        let (t, clock) = tracker(&[("weather", 2, 100)]);
        t.record_call("weather");
        t.record_call("weather");
        assert!(!t.can_call("weather"));

        clock.advance(Duration::days(1));
        assert!(t.can_call("weather"));
    }

    #[test]
    fn test_two_month_idle_resets_both_in_one_pass() {
        let (t, clock) = tracker(&[("weather", 10, 20)]);
        for _ in 0..5 {
            t.record_call("weather");
        }
        clock.set(Utc.with_ymd_and_hms(2026, 5, 10, 12, 0, 0).unwrap());

        t.record_call("weather");
        let usage = t.get_usage("weather");
        assert_eq!(usage.calls_today, 1);
        assert_eq!(usage.calls_this_month, 1);
        assert_eq!(usage.last_reset_date, NaiveDate::from_ymd_opt(2026, 5, 10).unwrap());
    }

    #[test]
    fn test_try_acquire_records() {
        let (t, _) = tracker(&[("weather", 2, 100)]);
        assert!(t.try_acquire("weather"));
        assert!(t.try_acquire("weather"));
        assert!(!t.try_acquire("weather"));
        assert_eq!(t.get_usage("weather").calls_today, 2);
    }

    #[test]
    fn test_try_acquire_concurrent_never_overshoots() {
        let (t, _) = tracker(&[("weather", 50, 1000)]);
        let t = Arc::new(t);
        let granted: usize = (0..8)
            .map(|_| {
                let t = Arc::clone(&t);
                std::thread::spawn(move || (0..20).filter(|_| t.try_acquire("weather")).count())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();
        assert_eq!(granted, 50);
        assert_eq!(t.get_usage("weather").calls_today, 50);
    }

    #[test]
    fn test_get_usage_initialises_zero() {
        let (t, _) = tracker(&[("census", 10, 100)]);
        let usage = t.get_usage("census");
        assert_eq!(usage.calls_today, 0);
        assert_eq!(usage.daily_limit, 10);
        assert_eq!(usage.monthly_limit, 100);
    }

    #[test]
    fn test_providers_keep_config_order() {
        let (t, _) = tracker(&[("b", 1, 1), ("a", 1, 1), ("b", 2, 2)]);
        assert_eq!(t.providers(), &["b".to_string(), "a".to_string()]);
    }
}
