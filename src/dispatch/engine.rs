//! Tick-driven dispatch controller.
//!
//! One tick for one region: load the battery state, read a grid snapshot,
//! evaluate the rule table, then append the log entry and advance the state
//! in a single compare-and-swap transaction.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, DispatchConfig, RegionConfig};
use crate::error::{CoreError, Result, ValidationError};
use crate::grid::{
    FallbackSource, GridSnapshot, ObservedSource, SnapshotCache, SnapshotReading,
    SnapshotSource, TimeoutSource,
};
use crate::model::{BatteryState, DispatchAction, DispatchLogEntry};
use crate::store::{Store, retry_once};
use crate::synthetic::SyntheticGrid;

use super::battery::Battery;
use super::rules::{self, RuleContext};

/// Caller-supplied values that replace fields of the fetched snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SnapshotOverrides {
    pub price: Option<f64>,
    pub curtailment_risk: Option<bool>,
}

/// Result of one region tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickOutcome {
    pub entry: DispatchLogEntry,
    pub state: BatteryState,
    /// Confidence of the snapshot the decision was made on.
    pub confidence: f64,
    /// True when the tick had already been committed and was returned as is.
    pub replayed: bool,
}

/// A region that failed during a batch.
#[derive(Debug)]
pub struct RegionFailure {
    pub region: String,
    pub error: CoreError,
}

/// Outcome of ticking several regions.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub at: Option<DateTime<Utc>>,
    pub outcomes: Vec<TickOutcome>,
    pub failures: Vec<RegionFailure>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(at) = self.at {
            writeln!(
                f,
                "=== Dispatch tick {} ===",
                at.format("%Y-%m-%d %H:%M UTC")
            )?;
        }
        for o in &self.outcomes {
            let e = &o.entry;
            writeln!(
                f,
                "{:<4} {:<9} {:>7.1} MW  SoC {:>5.1}% -> {:>5.1}%  ${:>9.2}  [{}{}] {}",
                e.region,
                e.action,
                e.power_mw,
                e.soc_before,
                e.soc_after,
                e.expected_revenue,
                e.provenance,
                if o.replayed { ", replayed" } else { "" },
                e.reason,
            )?;
        }
        for fail in &self.failures {
            writeln!(f, "{:<4} FAILED    {}", fail.region, fail.error)?;
        }
        Ok(())
    }
}

/// Battery state for a region that has never been dispatched.
pub fn initial_state(
    region: &str,
    region_cfg: &RegionConfig,
    dispatch: &DispatchConfig,
) -> BatteryState {
    BatteryState {
        region: region.to_string(),
        soc_percent: dispatch.initial_soc_percent,
        capacity_mwh: region_cfg.capacity_mwh,
        power_rating_mw: region_cfg.power_rating_mw,
        last_updated: None,
    }
}

/// Aligns `at` down to the start of its tick.
///
/// # Errors
///
/// Returns a `ValidationError` for a zero tick length or an unrepresentable instant.
pub fn align_to_tick(
    at: DateTime<Utc>,
    tick_minutes: u32,
) -> std::result::Result<DateTime<Utc>, ValidationError> {
    let step = i64::from(tick_minutes) * 60;
    if step == 0 {
        return Err(ValidationError::new("tick_minutes", "must be > 0"));
    }
    let secs = at.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(step), 0)
        .ok_or_else(|| ValidationError::new("timestamp", format!("{at} out of range")))
}

/// Computes the log entry and next state for one tick without touching the store.
///
/// `at` must already be tick-aligned.
pub fn plan_tick(
    state: &BatteryState,
    region_cfg: &RegionConfig,
    dispatch: &DispatchConfig,
    reading: &SnapshotReading,
    at: DateTime<Utc>,
) -> (DispatchLogEntry, BatteryState) {
    let snap = &reading.snapshot;
    let dt = dispatch.tick_hours();
    let battery = Battery::new(state, region_cfg, dt);

    let price = if snap.indicative_price.is_finite() {
        snap.indicative_price
    } else {
        dispatch.fallback_price
    };

    let decision = rules::evaluate(&RuleContext {
        price,
        renewable_mw: snap.renewable_forecast_mw,
        demand_mw: snap.grid_demand_mw,
        curtailment_risk: snap.curtailment_risk,
        battery: &battery,
        config: dispatch,
    });

    let soc_after = battery.soc_after(decision.action, decision.power_mw);
    let energy_mwh = decision.power_mw * dt;
    let expected_revenue = match decision.action {
        DispatchAction::Discharge => energy_mwh * price * region_cfg.round_trip_efficiency,
        DispatchAction::Charge => -(energy_mwh * price),
        DispatchAction::Hold => 0.0,
    };
    let renewable_absorption = decision.action == DispatchAction::Charge
        && (snap.renewable_forecast_mw > snap.grid_demand_mw || snap.curtailment_risk);
    let curtailment_mitigation = decision.action == DispatchAction::Discharge
        && snap.renewable_forecast_mw > snap.grid_demand_mw * dispatch.deficit_factor;

    let entry = DispatchLogEntry {
        id: None,
        region: state.region.clone(),
        timestamp: at,
        action: decision.action,
        power_mw: decision.power_mw,
        duration_hours: dt,
        soc_before: state.soc_percent,
        soc_after,
        reason: decision.reason,
        rule: decision.rule.to_string(),
        price,
        expected_revenue,
        renewable_absorption,
        curtailment_mitigation,
        provenance: reading.provenance,
    };
    let next = BatteryState {
        soc_percent: soc_after,
        last_updated: Some(at),
        ..state.clone()
    };
    (entry, next)
}

/// Per-region dispatch controller over a [`Store`].
pub struct DispatchEngine<S: Store> {
    store: Arc<S>,
    config: AppConfig,
    grid: FallbackSource,
}

impl<S: Store + 'static> DispatchEngine<S> {
    /// Engine reading snapshots from stored observations.
    ///
    /// The observation source is bounded by `dispatch.fetch_timeout_ms` and
    /// backed by a TTL cache and the seeded synthetic generator.
    pub fn from_config(store: Arc<S>, config: AppConfig) -> Self {
        let observed: Arc<dyn SnapshotSource> = Arc::new(
            ObservedSource::new(
                Arc::clone(&store),
                config.detector.renewable_sources.clone(),
                config.dispatch.surplus_factor,
            )
            .with_prices(
                config.dispatch.fallback_price,
                config.detector.indicative_price,
            ),
        );
        Self::with_source(store, config, observed)
    }

    /// Engine with a custom primary snapshot source.
    pub fn with_source(store: Arc<S>, config: AppConfig, primary: Arc<dyn SnapshotSource>) -> Self {
        let timeout = Duration::from_millis(config.dispatch.fetch_timeout_ms);
        let grid = FallbackSource::new(
            Box::new(TimeoutSource::new(primary, timeout)),
            SnapshotCache::new(Duration::from_secs(config.dispatch.cache_ttl_secs)),
            SyntheticGrid::new(config.synthetic.seed),
        );
        Self { store, config, grid }
    }
}

impl<S: Store> DispatchEngine<S> {
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn backoff(&self) -> Duration {
        self.config.store.retry_backoff()
    }

    /// Stored state for `region`, or the initial state if none exists yet.
    ///
    /// The flag is true when the state was loaded from the store.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Configuration` for an unknown region and
    /// `CoreError::Persistence` if the store fails twice.
    pub fn battery_state(&self, region: &str) -> Result<(BatteryState, bool)> {
        let region_cfg = self.config.region(region)?;
        let stored = retry_once(self.backoff(), "load battery state", || {
            self.store.battery_state(region)
        })?;
        Ok(match stored {
            Some(state) => (state, true),
            None => (
                initial_state(region, region_cfg, &self.config.dispatch),
                false,
            ),
        })
    }

    /// Runs one tick for `region` at `at`.
    ///
    /// # Errors
    ///
    /// See [`DispatchEngine::tick_with`].
    pub fn tick(&self, region: &str, at: DateTime<Utc>) -> Result<TickOutcome> {
        self.tick_with(region, at, SnapshotOverrides::default())
    }

    /// Runs one tick for `region` at `at`, overriding snapshot fields.
    ///
    /// A tick that was already committed is returned unchanged with
    /// `replayed` set.
    ///
    /// # Errors
    ///
    /// - `CoreError::Configuration` if the region is not configured
    /// - `CoreError::Validation` for a stale tick, a bad override or a corrupt stored state
    /// - `CoreError::Persistence` on store failure or a lost compare-and-swap race
    pub fn tick_with(
        &self,
        region: &str,
        at: DateTime<Utc>,
        overrides: SnapshotOverrides,
    ) -> Result<TickOutcome> {
        let region_cfg = self.config.region(region)?;
        let at = align_to_tick(at, self.config.dispatch.tick_minutes)?;

        if let Some(price) = overrides.price
            && !price.is_finite()
        {
            return Err(ValidationError::new("price", "must be finite").into());
        }

        let backoff = self.backoff();
        let committed = retry_once(backoff, "load log entry", || {
            self.store.log_entry_at(region, at)
        })?;
        if let Some(entry) = committed {
            debug!(region, %at, "tick already committed, replaying");
            let (state, _) = self.battery_state(region)?;
            return Ok(TickOutcome {
                confidence: entry.provenance.confidence(),
                entry,
                state,
                replayed: true,
            });
        }

        let (state, _) = self.battery_state(region)?;
        state.validate()?;
        if let Some(last) = state.last_updated
            && at <= last
        {
            return Err(ValidationError::new(
                "timestamp",
                format!("stale tick {at} for {region}, state last updated {last}"),
            )
            .into());
        }

        let mut reading = self.grid.read(region, at);
        apply_overrides(&mut reading.snapshot, overrides);

        let (mut entry, next) = plan_tick(&state, region_cfg, &self.config.dispatch, &reading, at);
        let id = retry_once(backoff, "commit tick", || {
            self.store.commit_tick(&entry, &next, state.last_updated)
        })?;
        entry.id = Some(id);

        info!(
            region,
            %at,
            action = %entry.action,
            power_mw = entry.power_mw,
            soc_before = entry.soc_before,
            soc_after = entry.soc_after,
            rule = %entry.rule,
            provenance = %entry.provenance,
            "dispatch decision"
        );

        Ok(TickOutcome {
            entry,
            state: next,
            confidence: reading.confidence,
            replayed: false,
        })
    }

    /// Ticks every region in `regions`; a failing region does not stop the rest.
    pub fn run_batch(&self, regions: &[String], at: DateTime<Utc>) -> BatchReport {
        let mut report = BatchReport {
            at: align_to_tick(at, self.config.dispatch.tick_minutes).ok(),
            ..BatchReport::default()
        };
        for region in regions {
            match self.tick(region, at) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(error) => {
                    warn!(
                        region = %region,
                        error = %error,
                        "dispatch tick failed, skipping region"
                    );
                    report.failures.push(RegionFailure {
                        region: region.clone(),
                        error,
                    });
                }
            }
        }
        report
    }

    /// Ticks every configured region.
    pub fn run_all(&self, at: DateTime<Utc>) -> BatchReport {
        self.run_batch(&self.config.region_codes(), at)
    }
}

fn apply_overrides(snapshot: &mut GridSnapshot, overrides: SnapshotOverrides) {
    if let Some(price) = overrides.price {
        snapshot.indicative_price = price;
    }
    if let Some(risk) = overrides.curtailment_risk {
        snapshot.curtailment_risk = risk;
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::error::FetchError;
    use crate::model::Provenance;
    use crate::store::SqliteStore;

    /// Fixed snapshot for every region.
    struct Fixed {
        price: f64,
        renewable: f64,
        demand: f64,
    }

    impl SnapshotSource for Fixed {
        fn fetch(
            &self,
            region: &str,
            at: DateTime<Utc>,
        ) -> std::result::Result<GridSnapshot, FetchError> {
            Ok(GridSnapshot {
                region: region.to_string(),
                at,
                indicative_price: self.price,
                renewable_forecast_mw: self.renewable,
                grid_demand_mw: self.demand,
                curtailment_risk: self.renewable > self.demand * 1.1,
            })
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, hour, minute, 0).unwrap()
    }

    fn engine(price: f64, renewable: f64, demand: f64) -> DispatchEngine<SqliteStore> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut config = AppConfig::baseline();
        config.store.retry_backoff_ms = 0;
        DispatchEngine::with_source(
            store,
            config,
            Arc::new(Fixed {
                price,
                renewable,
                demand,
            }),
        )
    }

    #[test]
    fn alignment_floors_to_tick() {
        assert_eq!(align_to_tick(at(10, 14), 15).unwrap(), at(10, 0));
        assert_eq!(align_to_tick(at(10, 45), 15).unwrap(), at(10, 45));
        assert_eq!(align_to_tick(at(10, 59), 30).unwrap(), at(10, 30));
        assert!(align_to_tick(at(10, 0), 0).is_err());
    }

    #[test]
    fn surplus_tick_charges_and_persists() {
        let engine = engine(20.0, 900.0, 800.0);
        let out = engine.tick("ON", at(12, 5)).unwrap();

        assert_eq!(out.entry.action, DispatchAction::Charge);
        assert_eq!(out.entry.timestamp, at(12, 0));
        assert_eq!(out.entry.power_mw, 100.0);
        assert_eq!(out.entry.duration_hours, 0.25);
        // 25 MWh into 250 MWh
        assert!((out.entry.soc_after - 60.0).abs() < 1e-9);
        assert!((out.entry.expected_revenue + 500.0).abs() < 1e-9);
        assert!(out.entry.renewable_absorption);
        assert_eq!(out.entry.provenance, Provenance::Live);
        assert!(!out.replayed);

        let stored = engine.store().battery_state("ON").unwrap().unwrap();
        assert_eq!(stored.soc_percent, out.entry.soc_after);
        assert_eq!(stored.last_updated, Some(at(12, 0)));
    }

    #[test]
    fn discharge_revenue_uses_efficiency() {
        let engine = engine(100.0, 200.0, 1000.0);
        let out = engine.tick("ON", at(18, 0)).unwrap();
        assert_eq!(out.entry.action, DispatchAction::Discharge);
        // 100 MW x 0.25 h x 100 $/MWh x 0.88
        assert!((out.entry.expected_revenue - 2200.0).abs() < 1e-9);
        assert!(!out.entry.curtailment_mitigation);
    }

    #[test]
    fn same_tick_is_replayed() {
        let engine = engine(20.0, 900.0, 800.0);
        let first = engine.tick("ON", at(12, 0)).unwrap();
        let again = engine.tick("ON", at(12, 10)).unwrap();
        assert!(again.replayed);
        assert_eq!(again.entry.soc_after, first.entry.soc_after);
        assert_eq!(
            engine.store().recent_dispatch_log(Some("ON"), 10).unwrap().len(),
            1
        );
    }

    #[test]
    fn stale_tick_rejected() {
        let engine = engine(20.0, 900.0, 800.0);
        engine.tick("ON", at(12, 0)).unwrap();
        let err = engine.tick("ON", at(11, 45)).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn ticks_chain_state() {
        let engine = engine(20.0, 900.0, 800.0);
        let a = engine.tick("AB", at(12, 0)).unwrap();
        let b = engine.tick("AB", at(12, 15)).unwrap();
        assert_eq!(a.entry.soc_after, b.entry.soc_before);
    }

    #[test]
    fn overrides_replace_snapshot_fields() {
        let engine = engine(20.0, 900.0, 800.0);
        let out = engine
            .tick_with(
                "ON",
                at(12, 0),
                SnapshotOverrides {
                    price: Some(55.0),
                    curtailment_risk: None,
                },
            )
            .unwrap();
        assert_eq!(out.entry.price, 55.0);
        assert_eq!(out.entry.action, DispatchAction::Hold);

        let err = engine
            .tick_with(
                "ON",
                at(12, 15),
                SnapshotOverrides {
                    price: Some(f64::NAN),
                    curtailment_risk: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn unknown_region_fails_alone() {
        let engine = engine(20.0, 900.0, 800.0);
        let regions = ["ON".to_string(), "NS".to_string(), "QC".to_string()];
        let report = engine.run_batch(&regions, at(12, 0));
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].region, "NS");
        assert!(matches!(report.failures[0].error, CoreError::Configuration(_)));
        assert!(!report.is_clean());
        assert!(report.to_string().contains("FAILED"));
    }

    #[test]
    fn failing_source_falls_back_to_synthetic() {
        struct Down;
        impl SnapshotSource for Down {
            fn fetch(
                &self,
                region: &str,
                _: DateTime<Utc>,
            ) -> std::result::Result<GridSnapshot, FetchError> {
                Err(FetchError::NoData {
                    region: region.to_string(),
                })
            }
            fn name(&self) -> &'static str {
                "down"
            }
        }
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let engine = DispatchEngine::with_source(store, AppConfig::baseline(), Arc::new(Down));
        let out = engine.tick("BC", at(3, 0)).unwrap();
        assert_eq!(out.entry.provenance, Provenance::Synthetic);
        assert_eq!(out.confidence, 0.4);
    }
}
