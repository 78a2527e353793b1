//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use grid_balance::config::AppConfig;
use grid_balance::dispatch::DispatchEngine;
use grid_balance::error::FetchError;
use grid_balance::grid::{GridSnapshot, SnapshotSource};
use grid_balance::model::{DemandObservation, GenerationObservation, SourceType};
use grid_balance::store::SqliteStore;

/// Baseline configuration with retries that do not sleep.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::baseline();
    config.store.retry_backoff_ms = 0;
    config
}

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().expect("in-memory store should open"))
}

/// Monday 3 June 2024 at `hour:minute` UTC.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, hour, minute, 0).unwrap()
}

/// Snapshot source that reports the same conditions for every region.
pub struct FixedGrid {
    pub price: f64,
    pub renewable_mw: f64,
    pub demand_mw: f64,
}

impl SnapshotSource for FixedGrid {
    fn fetch(&self, region: &str, at: DateTime<Utc>) -> Result<GridSnapshot, FetchError> {
        Ok(GridSnapshot {
            region: region.to_string(),
            at,
            indicative_price: self.price,
            renewable_forecast_mw: self.renewable_mw,
            grid_demand_mw: self.demand_mw,
            curtailment_risk: self.renewable_mw > self.demand_mw * 1.1,
        })
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Snapshot source that always fails.
pub struct DownGrid;

impl SnapshotSource for DownGrid {
    fn fetch(&self, _region: &str, _at: DateTime<Utc>) -> Result<GridSnapshot, FetchError> {
        Err(FetchError::Provider("connection refused".into()))
    }

    fn name(&self) -> &'static str {
        "down"
    }
}

/// Engine over a fresh in-memory store reading fixed grid conditions.
pub fn fixed_engine(
    config: AppConfig,
    price: f64,
    renewable_mw: f64,
    demand_mw: f64,
) -> DispatchEngine<SqliteStore> {
    DispatchEngine::with_source(
        memory_store(),
        config,
        Arc::new(FixedGrid {
            price,
            renewable_mw,
            demand_mw,
        }),
    )
}

/// Hourly solar and wind readings splitting `renewable_mw` 60/40.
pub fn renewable_hours(
    region: &str,
    start: DateTime<Utc>,
    renewable_mw: &[f64],
) -> Vec<GenerationObservation> {
    let mut rows = Vec::new();
    for (i, &mw) in renewable_mw.iter().enumerate() {
        let timestamp = start + Duration::hours(i as i64);
        for (source_type, share) in [(SourceType::Solar, 0.6), (SourceType::Wind, 0.4)] {
            rows.push(GenerationObservation {
                region: region.to_string(),
                source_type,
                timestamp,
                generation_mw: mw * share,
                provenance: "test".to_string(),
            });
        }
    }
    rows
}

pub fn demand_hours(
    region: &str,
    start: DateTime<Utc>,
    demand_mw: &[f64],
) -> Vec<DemandObservation> {
    demand_mw
        .iter()
        .enumerate()
        .map(|(i, &mw)| DemandObservation {
            region: region.to_string(),
            timestamp: start + Duration::hours(i as i64),
            demand_mw: mw,
        })
        .collect()
}
