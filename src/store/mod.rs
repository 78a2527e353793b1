//! Persistence interface shared by every component.
//!
//! All writes are idempotent under retry: observations, events,
//! recommendations and dispatch log rows are keyed by their natural keys.

mod sqlite;

pub use sqlite::SqliteStore;

use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::StoreError;
use crate::model::{
    BatteryState, CurtailmentEvent, DemandObservation, DispatchLogEntry,
    ForecastPerformanceRecord, GenerationObservation, MitigationActuals, MitigationKind,
    MitigationRecommendation, SourceType,
};

/// Relational store holding observations, events, battery state and the dispatch log.
///
/// Time ranges are inclusive on both ends.
pub trait Store: Send + Sync {
    /// Inserts observations, ignoring rows whose natural key already exists.
    ///
    /// Returns the number of rows actually written.
    fn insert_generation(&self, rows: &[GenerationObservation]) -> Result<usize, StoreError>;

    /// Inserts demand readings, ignoring rows whose natural key already exists.
    fn insert_demand(&self, rows: &[DemandObservation]) -> Result<usize, StoreError>;

    fn generation_between(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GenerationObservation>, StoreError>;

    fn demand_between(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DemandObservation>, StoreError>;

    /// Inserts or refreshes an event keyed by `(region, occurred_at)`.
    ///
    /// Returns the event id, stable across re-runs.
    fn upsert_event(&self, event: &CurtailmentEvent) -> Result<i64, StoreError>;

    fn events_between(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CurtailmentEvent>, StoreError>;

    /// Inserts or refreshes the estimates of a recommendation keyed by
    /// `(event_id, kind)`. Recorded actuals are preserved.
    fn upsert_recommendation(&self, rec: &MitigationRecommendation) -> Result<i64, StoreError>;

    fn recommendations_for_event(
        &self,
        event_id: i64,
    ) -> Result<Vec<MitigationRecommendation>, StoreError>;

    /// Deletes recommendations of `event_id` whose kind is not in `kinds`.
    ///
    /// Rows with recorded actuals are kept. Returns the number deleted.
    fn retain_recommendations(
        &self,
        event_id: i64,
        kinds: &[MitigationKind],
    ) -> Result<usize, StoreError>;

    /// Overwrites the actual outcome of a recommendation and marks it implemented.
    fn record_actuals(
        &self,
        recommendation_id: i64,
        actuals: &MitigationActuals,
    ) -> Result<(), StoreError>;

    fn battery_state(&self, region: &str) -> Result<Option<BatteryState>, StoreError>;

    fn log_entry_at(
        &self,
        region: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<DispatchLogEntry>, StoreError>;

    /// Appends `entry` and writes `state` in one transaction.
    ///
    /// The state write only succeeds if the stored `last_updated` still equals
    /// `expected_last_updated` (`None` meaning no row exists yet). A lost race
    /// or an existing log row for the same tick yields [`StoreError::Conflict`]
    /// and nothing is written.
    fn commit_tick(
        &self,
        entry: &DispatchLogEntry,
        state: &BatteryState,
        expected_last_updated: Option<DateTime<Utc>>,
    ) -> Result<i64, StoreError>;

    /// Log entries in timestamp order; all regions when `region` is `None`.
    fn dispatch_log(
        &self,
        region: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DispatchLogEntry>, StoreError>;

    /// Most recent log entries, newest first.
    fn recent_dispatch_log(
        &self,
        region: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DispatchLogEntry>, StoreError>;

    fn insert_forecast_performance(
        &self,
        record: &ForecastPerformanceRecord,
    ) -> Result<i64, StoreError>;

    /// Performance records whose period lies within `[start, end]`, newest
    /// period first; every horizon when `horizon_hours` is `None`.
    fn forecast_performance(
        &self,
        region: &str,
        source_type: SourceType,
        horizon_hours: Option<u32>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ForecastPerformanceRecord>, StoreError>;
}

/// Runs `op`, retrying once after `backoff` if it fails with a retryable error.
///
/// # Errors
///
/// Returns the error of the second attempt, or the first error if it is not
/// retryable.
pub fn retry_once<T>(
    backoff: Duration,
    what: &str,
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    match op() {
        Err(e) if e.is_retryable() => {
            warn!(error = %e, operation = what, "store operation failed, retrying once");
            thread::sleep(backoff);
            op()
        }
        other => other,
    }
}
