//! Area data sources.
//!
//! Defines the `DataSource` trait and provides area-specific
//! implementations for fetching data about a location. A source only
//! knows how to talk to its provider; quota, caching and timeouts are
//! applied by the aggregator around it.

pub mod air_quality;
pub mod census;
pub mod fixed;
pub mod http;
pub mod registry;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{AreaData, DataArea, LocationKey};

/// Abstraction over external data providers.
///
/// A failed fetch is an ordinary `Err`; it must never panic.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Provider name, used for quota accounting and source summaries.
    fn name(&self) -> &str;

    /// The domain area this provider fills in.
    fn area(&self) -> DataArea;

    /// Fetch data for one location.
    async fn fetch(&self, location: &LocationKey) -> Result<AreaData>;
}
