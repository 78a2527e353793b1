//! Dispatch engine behaviour over sequences of ticks.

mod common;

use std::sync::Arc;

use chrono::Duration;

use grid_balance::dispatch::{DispatchEngine, SnapshotOverrides};
use grid_balance::error::CoreError;
use grid_balance::metrics::DispatchMetrics;
use grid_balance::model::{DispatchAction, Provenance};
use grid_balance::store::Store;

use common::{DownGrid, at, fixed_engine, memory_store, test_config};

#[test]
fn surplus_at_low_price_charges_at_rate_limit() {
    let mut config = test_config();
    config.dispatch.initial_soc_percent = 40.0;
    let engine = fixed_engine(config, 20.0, 900.0, 800.0);

    let on = engine.tick("ON", at(12, 0)).unwrap();
    assert_eq!(on.entry.action, DispatchAction::Charge);
    assert_eq!(on.entry.rule, "surplus_charge");
    assert_eq!(on.entry.soc_before, 40.0);
    // min(charge rate 100, surplus 100, headroom 200)
    assert!((on.entry.power_mw - 100.0).abs() < 1e-9);

    let qc = engine.tick("QC", at(12, 0)).unwrap();
    assert!((qc.entry.power_mw - 30.0).abs() < 1e-9);
}

#[test]
fn soc_stays_within_bounds_over_a_day() {
    let engine = fixed_engine(test_config(), 20.0, 900.0, 800.0);
    let region_cfg = engine.config().region("QC").unwrap().clone();
    let max_rate_mw = region_cfg
        .effective_charge_mw()
        .max(region_cfg.effective_discharge_mw());

    let mut t = at(0, 0);
    let mut previous_after = None;
    for _ in 0..96 {
        let out = engine.tick("QC", t).unwrap();
        let e = &out.entry;
        assert!(e.soc_after <= region_cfg.soc_max_percent + 1e-9);
        assert!(e.soc_after >= region_cfg.soc_min_percent - 1e-9);
        let moved_mwh = (e.soc_after - e.soc_before).abs() * region_cfg.capacity_mwh / 100.0;
        assert!(moved_mwh <= max_rate_mw * e.duration_hours + 1e-9);
        if let Some(prev) = previous_after {
            assert_eq!(e.soc_before, prev);
        }
        previous_after = Some(e.soc_after);
        t += Duration::minutes(15);
    }

    let (state, stored) = engine.battery_state("QC").unwrap();
    assert!(stored);
    assert!((state.soc_percent - region_cfg.soc_max_percent).abs() < 1e-9);
    let latest = engine.store().recent_dispatch_log(Some("QC"), 1).unwrap();
    assert!(latest[0].action == DispatchAction::Hold || latest[0].power_mw < 1e-6);
}

#[test]
fn discharge_respects_soc_floor() {
    let engine = fixed_engine(test_config(), 150.0, 100.0, 2_000.0);
    let mut t = at(17, 0);
    for _ in 0..40 {
        let out = engine.tick("BC", t).unwrap();
        assert!(out.entry.soc_after >= 20.0 - 1e-9);
        t += Duration::minutes(15);
    }
    let (state, _) = engine.battery_state("BC").unwrap();
    assert!((state.soc_percent - 20.0).abs() < 1e-9);
}

#[test]
fn repeated_tick_is_idempotent() {
    let engine = fixed_engine(test_config(), 20.0, 900.0, 800.0);
    let first = engine.tick("AB", at(9, 0)).unwrap();
    let second = engine.tick("AB", at(9, 7)).unwrap();

    assert!(second.replayed);
    assert_eq!(first.entry.id, second.entry.id);
    let (state, _) = engine.battery_state("AB").unwrap();
    assert_eq!(state.soc_percent, first.entry.soc_after);
    assert_eq!(
        engine.store().recent_dispatch_log(Some("AB"), 10).unwrap().len(),
        1
    );
}

#[test]
fn out_of_order_tick_is_rejected() {
    let engine = fixed_engine(test_config(), 20.0, 900.0, 800.0);
    engine.tick("AB", at(9, 30)).unwrap();
    let err = engine.tick("AB", at(9, 15)).unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[test]
fn regions_are_isolated_in_a_batch() {
    let engine = fixed_engine(test_config(), 20.0, 900.0, 800.0);
    let regions = vec!["ON".to_string(), "XX".to_string(), "QC".to_string()];
    let report = engine.run_batch(&regions, at(10, 0));

    assert!(!report.is_clean());
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].region, "XX");

    let (on, _) = engine.battery_state("ON").unwrap();
    let (qc, _) = engine.battery_state("QC").unwrap();
    assert_eq!(on.last_updated, Some(at(10, 0)));
    assert_eq!(qc.last_updated, Some(at(10, 0)));
}

#[test]
fn run_all_covers_every_configured_region() {
    let engine = fixed_engine(test_config(), 45.0, 800.0, 800.0);
    let report = engine.run_all(at(6, 0));
    assert!(report.is_clean());
    assert_eq!(report.outcomes.len(), engine.config().regions.len());
}

#[test]
fn provider_outage_falls_back_to_synthetic() {
    let engine = DispatchEngine::with_source(memory_store(), test_config(), Arc::new(DownGrid));
    let out = engine.tick("ON", at(12, 0)).unwrap();
    assert_eq!(out.entry.provenance, Provenance::Synthetic);
    assert!((out.confidence - 0.4).abs() < 1e-9);
}

#[test]
fn overrides_drive_the_decision() {
    let engine = fixed_engine(test_config(), 20.0, 900.0, 800.0);
    let overrides = SnapshotOverrides {
        price: Some(200.0),
        curtailment_risk: Some(false),
    };
    let out = engine.tick_with("ON", at(12, 0), overrides).unwrap();
    assert_eq!(out.entry.price, 200.0);
    assert_ne!(out.entry.action, DispatchAction::Charge);

    let bad = SnapshotOverrides {
        price: Some(f64::NAN),
        curtailment_risk: None,
    };
    assert!(matches!(
        engine.tick_with("ON", at(12, 15), bad),
        Err(CoreError::Validation(_))
    ));
}

#[test]
fn curtailment_risk_override_absorbs_on_a_balanced_grid() {
    let engine = fixed_engine(test_config(), 20.0, 800.0, 800.0);
    let at_risk = SnapshotOverrides {
        price: Some(35.0),
        curtailment_risk: Some(true),
    };
    let out = engine.tick_with("ON", at(12, 0), at_risk).unwrap();
    assert_eq!(out.entry.action, DispatchAction::Charge);
    assert_eq!(out.entry.rule, "curtailment_absorb");
    assert!((out.entry.power_mw - 100.0).abs() < 1e-9);
    assert!(out.entry.renewable_absorption);

    let calm = SnapshotOverrides {
        price: Some(35.0),
        curtailment_risk: Some(false),
    };
    let out = engine.tick_with("ON", at(12, 15), calm).unwrap();
    assert_eq!(out.entry.action, DispatchAction::Hold);
}

#[test]
fn metrics_reflect_the_dispatch_log() {
    let engine = fixed_engine(test_config(), 20.0, 900.0, 800.0);
    let mut t = at(0, 0);
    for _ in 0..4 {
        engine.tick("ON", t).unwrap();
        t += Duration::minutes(15);
    }

    let backoff = engine.config().store.retry_backoff();
    let metrics =
        DispatchMetrics::load(engine.store().as_ref(), Some("ON"), 7, at(23, 0), backoff).unwrap();
    assert_eq!(metrics.total_dispatches, 4);
    assert_eq!(metrics.charge_count, 4);
    // 100 MW for four quarter hours
    assert!((metrics.total_charged_mwh - 100.0).abs() < 1e-9);
    assert_eq!(metrics.total_discharged_mwh, 0.0);
    assert!((metrics.renewable_absorption_mwh - 100.0).abs() < 1e-9);
    assert_eq!(metrics.period_start, Some(at(0, 0)));
    assert_eq!(metrics.period_end, Some(at(0, 45)));
}
