//! Shared types for the VICINITY aggregation core.
//!
//! These types form the data model passed between the quota tracker,
//! the expiring cache, the data sources and the aggregator. They are
//! kept free of behaviour that needs I/O so every module can depend on
//! them without circular references.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration as StdDuration;

/// Caller-supplied refresh priority. Higher values refresh cached
/// records earlier.
pub type Priority = u8;

// ---------------------------------------------------------------------------
// Location keys
// ---------------------------------------------------------------------------

/// A geographic area as understood by the data sources.
///
/// Accepted forms: `"94110"`, `"37.76,-122.42"` or `"94110@37.76,-122.42"`.
/// Anything else is kept verbatim so that generic sources can still use
/// it through the `{location}` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationKey {
    raw: String,
    zip: Option<String>,
    coordinates: Option<(f64, f64)>,
}

impl LocationKey {
    pub fn parse(input: &str) -> Self {
        let raw = input.trim().to_lowercase();

        let (zip_part, coord_part) = match raw.split_once('@') {
            Some((zip, coords)) => (Some(zip), Some(coords)),
            None if raw.contains(',') => (None, Some(raw.as_str())),
            None => (Some(raw.as_str()), None),
        };

        let zip = zip_part
            .map(str::trim)
            .filter(|z| z.len() == 5 && z.chars().all(|c| c.is_ascii_digit()))
            .map(String::from);

        let coordinates = coord_part.and_then(parse_coordinates);

        Self { raw, zip, coordinates }
    }

    /// Normalised key used for caching and logging.
    pub fn cache_key(&self) -> &str {
        &self.raw
    }

    pub fn zip(&self) -> Option<&str> {
        self.zip.as_deref()
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.coordinates
    }

    /// Two-letter state code for the ZIP, from its three-digit prefix.
    /// Prefix ranges are approximate at a handful of borders.
    pub fn state(&self) -> Option<&'static str> {
        let prefix: u16 = self.zip.as_deref()?.get(..3)?.parse().ok()?;
        ZIP_PREFIX_STATES
            .iter()
            .find(|(lo, hi, _)| (*lo..=*hi).contains(&prefix))
            .map(|(_, _, state)| *state)
    }
}

/// Inclusive three-digit ZIP prefix ranges per state.
const ZIP_PREFIX_STATES: &[(u16, u16, &str)] = &[
    (5, 5, "NY"),
    (6, 9, "PR"),
    (10, 27, "MA"),
    (28, 29, "RI"),
    (30, 38, "NH"),
    (39, 49, "ME"),
    (50, 59, "VT"),
    (60, 69, "CT"),
    (70, 89, "NJ"),
    (100, 149, "NY"),
    (150, 196, "PA"),
    (197, 199, "DE"),
    (200, 205, "DC"),
    (206, 219, "MD"),
    (220, 246, "VA"),
    (247, 268, "WV"),
    (270, 289, "NC"),
    (290, 299, "SC"),
    (300, 319, "GA"),
    (320, 349, "FL"),
    (350, 369, "AL"),
    (370, 385, "TN"),
    (386, 397, "MS"),
    (398, 399, "GA"),
    (400, 427, "KY"),
    (430, 459, "OH"),
    (460, 479, "IN"),
    (480, 499, "MI"),
    (500, 528, "IA"),
    (530, 549, "WI"),
    (550, 567, "MN"),
    (570, 577, "SD"),
    (580, 588, "ND"),
    (590, 599, "MT"),
    (600, 629, "IL"),
    (630, 658, "MO"),
    (660, 679, "KS"),
    (680, 693, "NE"),
    (700, 714, "LA"),
    (716, 729, "AR"),
    (730, 749, "OK"),
    (750, 799, "TX"),
    (800, 816, "CO"),
    (820, 831, "WY"),
    (832, 838, "ID"),
    (840, 847, "UT"),
    (850, 865, "AZ"),
    (870, 884, "NM"),
    (885, 885, "TX"),
    (889, 898, "NV"),
    (900, 961, "CA"),
    (967, 968, "HI"),
    (970, 979, "OR"),
    (980, 994, "WA"),
    (995, 999, "AK"),
];

fn parse_coordinates(s: &str) -> Option<(f64, f64)> {
    let (lat, lon) = s.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lon: f64 = lon.trim().parse().ok()?;
    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
        Some((lat, lon))
    } else {
        None
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

// ---------------------------------------------------------------------------
// Domain areas
// ---------------------------------------------------------------------------

/// Domain area a provider contributes to the composite record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataArea {
    Demographics,
    AirQuality,
    Schools,
    Crime,
    Weather,
    News,
}

impl DataArea {
    /// All known areas (useful for iteration).
    pub const ALL: &'static [DataArea] = &[
        DataArea::Demographics,
        DataArea::AirQuality,
        DataArea::Schools,
        DataArea::Crime,
        DataArea::Weather,
        DataArea::News,
    ];
}

impl fmt::Display for DataArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataArea::Demographics => write!(f, "Demographics"),
            DataArea::AirQuality => write!(f, "Air quality"),
            DataArea::Schools => write!(f, "Schools"),
            DataArea::Crime => write!(f, "Crime"),
            DataArea::Weather => write!(f, "Weather"),
            DataArea::News => write!(f, "News"),
        }
    }
}

/// Attempt to parse a string into a DataArea (case-insensitive).
impl std::str::FromStr for DataArea {
    type Err = VicinityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(&['-', ' '][..], "_").as_str() {
            "demographics" | "census" => Ok(DataArea::Demographics),
            "air_quality" | "air" | "aqi" => Ok(DataArea::AirQuality),
            "schools" | "education" => Ok(DataArea::Schools),
            "crime" | "safety" => Ok(DataArea::Crime),
            "weather" => Ok(DataArea::Weather),
            "news" => Ok(DataArea::News),
            _ => Err(VicinityError::Config(format!("Unknown data area: {s}"))),
        }
    }
}

/// Data returned by one provider for one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaData {
    pub area: DataArea,
    /// Provider that produced this data.
    pub provider: String,
    /// Provider payload, reduced to the fields worth keeping.
    pub payload: serde_json::Value,
    /// Short human-readable summary.
    pub summary: String,
    pub fetched_at: DateTime<Utc>,
}

impl fmt::Display for AreaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.provider, self.area, self.summary)
    }
}

// ---------------------------------------------------------------------------
// Usage counters
// ---------------------------------------------------------------------------

/// Per-provider call counters for the current day and month.
///
/// `calls_today <= daily_limit` is a target rather than a hard
/// invariant: the counter may read equal to the limit, which is what
/// denies the next call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub calls_today: u32,
    pub calls_this_month: u32,
    pub last_reset_date: NaiveDate,
    pub daily_limit: u32,
    pub monthly_limit: u32,
}

impl UsageCounter {
    pub fn new(today: NaiveDate, daily_limit: u32, monthly_limit: u32) -> Self {
        Self {
            calls_today: 0,
            calls_this_month: 0,
            last_reset_date: today,
            daily_limit,
            monthly_limit,
        }
    }

    /// Reset counters whose period has ended. Day and month are checked
    /// in the same pass, so a counter idle for months resets fully.
    /// Returns true if anything changed.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.last_reset_date == today {
            return false;
        }
        let last = self.last_reset_date;
        if (last.year(), last.month()) != (today.year(), today.month()) {
            self.calls_this_month = 0;
        }
        self.calls_today = 0;
        self.last_reset_date = today;
        true
    }

    /// Whether one more call fits within both limits.
    pub fn has_capacity(&self) -> bool {
        self.calls_today < self.daily_limit && self.calls_this_month < self.monthly_limit
    }

    pub fn record(&mut self) {
        self.calls_today = self.calls_today.saturating_add(1);
        self.calls_this_month = self.calls_this_month.saturating_add(1);
    }

    /// Share of the daily limit consumed (0–100). A zero limit reads as full.
    pub fn daily_percent(&self) -> f64 {
        percent(self.calls_today, self.daily_limit)
    }

    /// Share of the monthly limit consumed (0–100). A zero limit reads as full.
    pub fn monthly_percent(&self) -> f64 {
        percent(self.calls_this_month, self.monthly_limit)
    }
}

fn percent(used: u32, limit: u32) -> f64 {
    if limit == 0 {
        100.0
    } else {
        used as f64 / limit as f64 * 100.0
    }
}

impl fmt::Display for UsageCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "today {}/{} | month {}/{} (since {})",
            self.calls_today,
            self.daily_limit,
            self.calls_this_month,
            self.monthly_limit,
            self.last_reset_date,
        )
    }
}

// ---------------------------------------------------------------------------
// Source outcomes
// ---------------------------------------------------------------------------

/// Why a provider call did not produce data.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    Timeout(StdDuration),
    Error(String),
    Panicked(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout(after) => write!(f, "timed out after {}ms", after.as_millis()),
            FailureReason::Error(msg) => write!(f, "{msg}"),
            FailureReason::Panicked(msg) => write!(f, "adapter panicked: {msg}"),
        }
    }
}

/// Why a provider was never called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    QuotaExhausted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::QuotaExhausted => write!(f, "quota_exhausted"),
        }
    }
}

/// Result of one provider within one aggregation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Success(AreaData),
    Failure(FailureReason),
    Skipped(SkipReason),
}

impl SourceOutcome {
    /// Whether the adapter was actually invoked.
    pub fn was_attempted(&self) -> bool {
        !matches!(self, SourceOutcome::Skipped(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SourceOutcome::Success(_))
    }

    pub fn status(&self) -> SourceStatus {
        match self {
            SourceOutcome::Success(_) => SourceStatus::Ok,
            SourceOutcome::Failure(FailureReason::Timeout(_)) => SourceStatus::TimedOut,
            SourceOutcome::Failure(_) => SourceStatus::Failed,
            SourceOutcome::Skipped(SkipReason::QuotaExhausted) => SourceStatus::QuotaExhausted,
        }
    }
}

/// Status reported per provider in a composite record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    Failed,
    TimedOut,
    QuotaExhausted,
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStatus::Ok => write!(f, "ok"),
            SourceStatus::Failed => write!(f, "failed"),
            SourceStatus::TimedOut => write!(f, "timed_out"),
            SourceStatus::QuotaExhausted => write!(f, "quota_exhausted"),
        }
    }
}

/// One row of a record's source summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub provider: String,
    pub area: DataArea,
    pub available: bool,
    pub status: SourceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Composite record
// ---------------------------------------------------------------------------

/// Coarse label for how many attempted providers contributed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGrade {
    Minimal,
    Low,
    Medium,
    High,
}

impl QualityGrade {
    /// Grade from successes over attempted providers.
    ///
    /// `>= 75%` high, `>= 50%` medium, `>= 25%` low, else minimal.
    /// Integer comparisons keep the boundaries exact.
    pub fn from_counts(successes: usize, attempted: usize) -> Self {
        if attempted == 0 || successes == 0 {
            return QualityGrade::Minimal;
        }
        if successes * 4 >= attempted * 3 {
            QualityGrade::High
        } else if successes * 2 >= attempted {
            QualityGrade::Medium
        } else if successes * 4 >= attempted {
            QualityGrade::Low
        } else {
            QualityGrade::Minimal
        }
    }
}

impl fmt::Display for QualityGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityGrade::High => write!(f, "high"),
            QualityGrade::Medium => write!(f, "medium"),
            QualityGrade::Low => write!(f, "low"),
            QualityGrade::Minimal => write!(f, "minimal"),
        }
    }
}

/// Where the returned record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Built from provider calls during this request.
    Fresh,
    /// Served from cache without calling any provider.
    Cached,
    /// Due for refresh, but every provider was out of quota.
    StaleQuotaFallback,
}

/// Annotation attached to records served stale because of quota limits.
pub const QUOTA_FALLBACK_NOTICE: &str = "served from cache due to quota limits";

/// Merged view of every provider for one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeRecord {
    pub location: String,
    /// Every configured area; `None` when no provider delivered it.
    pub areas: BTreeMap<DataArea, Option<AreaData>>,
    pub quality_grade: QualityGrade,
    /// One row per configured provider, in configured order.
    pub source_summary: Vec<SourceSummary>,
    pub generated_at: DateTime<Utc>,
    pub cache_status: CacheStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

impl CompositeRecord {
    /// A record with every area absent.
    pub fn empty(location: &str, areas: &[DataArea], generated_at: DateTime<Utc>) -> Self {
        Self {
            location: location.to_string(),
            areas: areas.iter().map(|a| (*a, None)).collect(),
            quality_grade: QualityGrade::Minimal,
            source_summary: Vec::new(),
            generated_at,
            cache_status: CacheStatus::Fresh,
            notice: None,
        }
    }

    pub fn area(&self, area: DataArea) -> Option<&AreaData> {
        self.areas.get(&area).and_then(Option::as_ref)
    }

    pub fn available_count(&self) -> usize {
        self.areas.values().filter(|a| a.is_some()).count()
    }

    pub fn summary_for(&self, provider: &str) -> Option<&SourceSummary> {
        self.source_summary.iter().find(|s| s.provider == provider)
    }
}

impl fmt::Display for CompositeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | grade={} | {}/{} areas | {:?}",
            self.location,
            self.quality_grade,
            self.available_count(),
            self.areas.len(),
            self.cache_status,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for VICINITY.
#[derive(Debug, thiserror::Error)]
pub enum VicinityError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache capacity exceeded ({capacity} entries)")]
    CapacityExceeded { capacity: usize },

    #[error("Invalid location ({location}): {message}")]
    InvalidLocation { location: String, message: String },

    #[error("Data source error ({provider}): {message}")]
    DataSource { provider: String, message: String },

    #[error("Storage error ({path}): {message}")]
    Storage { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
