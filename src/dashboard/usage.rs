//! Usage dashboard reporter.
//!
//! Read-only projection of quota tracker state: one row per configured
//! provider with consumption percentages and a coarse status.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::quota::QuotaTracker;
use crate::types::UsageCounter;

/// Daily consumption above which a provider is critical.
const CRITICAL_DAILY_PCT: f64 = 90.0;

/// Daily consumption above which a provider needs attention.
const WARNING_DAILY_PCT: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    Ok,
    Warning,
    Critical,
}

impl UsageStatus {
    pub fn from_daily_percent(pct: f64) -> Self {
        if pct > CRITICAL_DAILY_PCT {
            UsageStatus::Critical
        } else if pct > WARNING_DAILY_PCT {
            UsageStatus::Warning
        } else {
            UsageStatus::Ok
        }
    }
}

impl fmt::Display for UsageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageStatus::Ok => write!(f, "ok"),
            UsageStatus::Warning => write!(f, "warning"),
            UsageStatus::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRow {
    pub provider: String,
    pub usage: UsageCounter,
    pub daily_percent: f64,
    pub monthly_percent: f64,
    pub status: UsageStatus,
}

pub struct UsageReporter {
    quota: Arc<QuotaTracker>,
}

impl UsageReporter {
    pub fn new(quota: Arc<QuotaTracker>) -> Self {
        Self { quota }
    }

    /// One row per configured provider, in configured order.
    pub fn report(&self) -> Vec<UsageRow> {
        self.quota
            .providers()
            .iter()
            .map(|provider| {
                let usage = self.quota.get_usage(provider);
                let daily_percent = usage.daily_percent();
                UsageRow {
                    provider: provider.clone(),
                    daily_percent,
                    monthly_percent: usage.monthly_percent(),
                    status: UsageStatus::from_daily_percent(daily_percent),
                    usage,
                }
            })
            .collect()
    }
}
