//! HTTP API route handlers.
//!
//! All endpoints return JSON. State is the shared `AreaService`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::usage::UsageRow;
use crate::engine::aggregator::AggregatorStats;
use crate::service::AreaService;
use crate::types::{CompositeRecord, Priority, UsageCounter};

pub type AppState = Arc<AreaService>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct AreaQuery {
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaResponse {
    pub provider: String,
    pub configured: bool,
    pub can_call: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvictResponse {
    pub evicted: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub aggregator: AggregatorStats,
    pub cached_records: usize,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/areas/:key
pub async fn get_area(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<AreaQuery>,
) -> Json<CompositeRecord> {
    let priority = query.priority.unwrap_or(0);
    Json(state.get_composite_data(&key, priority).await)
}

/// GET /api/usage
pub async fn get_usage_dashboard(State(state): State<AppState>) -> Json<Vec<UsageRow>> {
    Json(state.get_usage_dashboard())
}

/// GET /api/usage/:provider
pub async fn get_usage(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Json<UsageCounter> {
    Json(state.get_usage(&provider))
}

/// GET /api/quota/:provider
pub async fn get_quota(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Json<QuotaResponse> {
    Json(QuotaResponse {
        configured: state.is_configured(&provider),
        can_call: state.can_call(&provider),
        provider,
    })
}

/// POST /api/cache/evict
pub async fn evict_cache(State(state): State<AppState>) -> Json<EvictResponse> {
    let evicted = state.evict_expired_cache();
    Json(EvictResponse {
        evicted,
        remaining: state.cached_records(),
    })
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        aggregator: state.stats(),
        cached_records: state.cached_records(),
    })
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
