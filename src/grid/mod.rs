//! Grid snapshot sources for the dispatch engine.
//!
//! A [`SnapshotSource`] answers "what does the grid look like in this region
//! right now". The engine wraps its live source in a [`TimeoutSource`] and a
//! [`FallbackSource`], so a slow or failing provider degrades to a cached or
//! synthetic reading instead of failing the tick.

mod cache;
mod fallback;
mod observed;
mod timeout;

pub use cache::SnapshotCache;
pub use fallback::FallbackSource;
pub use observed::ObservedSource;
pub use timeout::TimeoutSource;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::FetchError;
use crate::model::Provenance;

/// Market and balance conditions for one region at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridSnapshot {
    pub region: String,
    pub at: DateTime<Utc>,
    /// Indicative wholesale price ($/MWh).
    pub indicative_price: f64,
    pub renewable_forecast_mw: f64,
    pub grid_demand_mw: f64,
    pub curtailment_risk: bool,
}

/// A snapshot together with how much it can be trusted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotReading {
    pub snapshot: GridSnapshot,
    pub provenance: Provenance,
    pub confidence: f64,
}

impl SnapshotReading {
    pub fn new(snapshot: GridSnapshot, provenance: Provenance) -> Self {
        Self {
            snapshot,
            provenance,
            confidence: provenance.confidence(),
        }
    }
}

/// Provider of grid snapshots.
pub trait SnapshotSource: Send + Sync {
    /// Fetches the snapshot for `region` at `at`.
    ///
    /// # Errors
    ///
    /// Returns a `FetchError` if the provider fails or has no data.
    fn fetch(&self, region: &str, at: DateTime<Utc>) -> Result<GridSnapshot, FetchError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

impl<T: SnapshotSource + ?Sized> SnapshotSource for Arc<T> {
    fn fetch(&self, region: &str, at: DateTime<Utc>) -> Result<GridSnapshot, FetchError> {
        (**self).fetch(region, at)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<T: SnapshotSource + ?Sized> SnapshotSource for Box<T> {
    fn fetch(&self, region: &str, at: DateTime<Utc>) -> Result<GridSnapshot, FetchError> {
        (**self).fetch(region, at)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
