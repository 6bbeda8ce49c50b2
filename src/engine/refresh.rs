//! Refresh policy: early refresh of cached records by caller priority.
//!
//! A cached record is refreshed once its age passes a fraction of its
//! TTL. The fraction shrinks as priority grows:
//!
//! ```text
//! threshold = max(0.1, 1 - priority * 0.2)
//! refresh   = age / ttl > threshold
//! ```
//!
//! Priority 0 never refreshes before expiry; priority 5 and above
//! refresh anything older than a tenth of its TTL.

use chrono::Duration;

use crate::types::Priority;

/// Lowest threshold any priority can reach, in tenths of the TTL.
const MIN_THRESHOLD_TENTHS: i64 = 1;

/// Threshold reduction per priority step, in tenths of the TTL.
const PRIORITY_STEP_TENTHS: i64 = 2;

pub struct RefreshPolicy;

impl RefreshPolicy {
    /// Fraction of the TTL after which a refresh is due.
    pub fn threshold(priority: Priority) -> f64 {
        Self::threshold_tenths(priority) as f64 / 10.0
    }

    // Kept in tenths so the boundary comparison stays exact.
    fn threshold_tenths(priority: Priority) -> i64 {
        (10 - i64::from(priority) * PRIORITY_STEP_TENTHS).max(MIN_THRESHOLD_TENTHS)
    }

    pub fn should_refresh(cache_age: Duration, ttl: Duration, priority: Priority) -> bool {
        let ttl_ms = i128::from(ttl.num_milliseconds());
        if ttl_ms <= 0 {
            return true;
        }
        let age_ms = i128::from(cache_age.num_milliseconds());
        // age / ttl > tenths / 10
        age_ms * 10 > ttl_ms * i128::from(Self::threshold_tenths(priority))
    }
}
