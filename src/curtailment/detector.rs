//! Batch detection of renewable-oversupply events from paired hourly series.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, DetectorConfig};
use crate::error::{CoreError, Result};
use crate::model::{
    CurtailmentEvent, CurtailmentReason, DemandObservation, GenerationObservation, SourceType,
};
use crate::store::{Store, retry_once};

/// Provenance tag written on detected events.
pub const DETECTOR_PROVENANCE: &str = "detector";

/// Outcome of one detection pass.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Events found, in timestamp order.
    pub events: Vec<CurtailmentEvent>,
    /// Timestamps that had both series and were evaluated.
    pub hours_evaluated: usize,
    /// Timestamps present in only one series.
    pub unpaired_timestamps: usize,
    /// Observations rejected by validation.
    pub dropped_records: usize,
}

/// Stateless detector over one region's generation and demand series.
#[derive(Debug, Clone)]
pub struct CurtailmentDetector {
    config: DetectorConfig,
    transmission_capacity_mw: Option<f64>,
}

impl CurtailmentDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            transmission_capacity_mw: None,
        }
    }

    /// Sets the export limit used to attribute events to congestion.
    pub fn with_transmission_capacity(mut self, capacity_mw: Option<f64>) -> Self {
        self.transmission_capacity_mw = capacity_mw;
        self
    }

    /// Finds curtailment events for `region`.
    ///
    /// Observations for other regions or failing validation are dropped.
    /// A timestamp is evaluated only when both renewable generation and
    /// demand are present for it.
    pub fn detect(
        &self,
        region: &str,
        generation: &[GenerationObservation],
        demand: &[DemandObservation],
    ) -> Detection {
        let mut detection = Detection::default();

        let mut renewable: BTreeMap<DateTime<Utc>, (f64, BTreeSet<SourceType>)> = BTreeMap::new();
        for obs in generation.iter().filter(|o| o.region == region) {
            if let Err(e) = obs.validate() {
                warn!(region, timestamp = %obs.timestamp, error = %e, "dropping generation record");
                detection.dropped_records += 1;
                continue;
            }
            if !self.config.renewable_sources.contains(&obs.source_type) {
                continue;
            }
            let slot = renewable.entry(obs.timestamp).or_default();
            slot.0 += obs.generation_mw;
            slot.1.insert(obs.source_type);
        }

        let mut load: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
        for obs in demand.iter().filter(|o| o.region == region) {
            if let Err(e) = obs.validate() {
                warn!(region, timestamp = %obs.timestamp, error = %e, "dropping demand record");
                detection.dropped_records += 1;
                continue;
            }
            load.insert(obs.timestamp, obs.demand_mw);
        }

        detection.unpaired_timestamps = load.keys().filter(|t| !renewable.contains_key(t)).count();

        for (&at, (renewable_mw, sources)) in &renewable {
            let Some(&demand_mw) = load.get(&at) else {
                debug!(region, timestamp = %at, "no demand sample, skipping hour");
                detection.unpaired_timestamps += 1;
                continue;
            };
            detection.hours_evaluated += 1;
            if let Some(event) = self.evaluate(region, at, *renewable_mw, sources, demand_mw) {
                detection.events.push(event);
            }
        }

        detection
    }

    /// Evaluates a single paired hour.
    fn evaluate(
        &self,
        region: &str,
        at: DateTime<Utc>,
        renewable_mw: f64,
        sources: &BTreeSet<SourceType>,
        demand_mw: f64,
    ) -> Option<CurtailmentEvent> {
        let c = &self.config;
        let threshold = demand_mw * (1.0 + c.reserve_margin_pct / 100.0);
        if renewable_mw <= threshold * c.oversupply_factor || demand_mw <= c.min_demand_mw {
            return None;
        }

        let curtailed_mw = renewable_mw - threshold;
        if curtailed_mw <= c.significance_mw {
            return None;
        }
        let curtailment_percent = curtailed_mw / renewable_mw * 100.0;
        let duration_hours = c.interval_hours();
        let (reason, reason_detail) =
            self.classify(renewable_mw, demand_mw, curtailment_percent);

        let source_type = match (sources.len(), sources.first()) {
            (1, Some(&only)) => only,
            _ => SourceType::Mixed,
        };

        Some(CurtailmentEvent {
            id: None,
            region: region.to_string(),
            source_type,
            occurred_at: at,
            ended_at: Some(at + Duration::minutes(i64::from(c.interval_minutes))),
            curtailed_mw,
            available_capacity_mw: renewable_mw,
            curtailment_percent,
            duration_hours,
            total_energy_curtailed_mwh: curtailed_mw * duration_hours,
            reason,
            reason_detail,
            market_price: c.indicative_price,
            opportunity_cost: curtailed_mw * duration_hours * c.opportunity_price,
            grid_demand_mw: demand_mw,
            provenance: DETECTOR_PROVENANCE.to_string(),
        })
    }

    /// Attributes an event to its most likely cause, in priority order:
    /// congestion, oversupply, negative pricing, frequency regulation.
    pub fn classify(
        &self,
        renewable_mw: f64,
        demand_mw: f64,
        curtailment_percent: f64,
    ) -> (CurtailmentReason, String) {
        let c = &self.config;
        if let Some(cap) = self.transmission_capacity_mw
            && renewable_mw > cap
        {
            return (
                CurtailmentReason::Congestion,
                format!(
                    "renewable output {renewable_mw:.0} MW exceeds transmission \
                     capacity {cap:.0} MW"
                ),
            );
        }
        if renewable_mw > demand_mw * c.oversupply_reason_factor {
            return (
                CurtailmentReason::Oversupply,
                format!(
                    "renewable output {renewable_mw:.0} MW exceeds demand {demand_mw:.0} MW \
                     by more than {:.0}%",
                    (c.oversupply_reason_factor - 1.0) * 100.0
                ),
            );
        }
        if c.indicative_price < 0.0 {
            return (
                CurtailmentReason::NegativePricing,
                format!(
                    "indicative price {:.2} $/MWh below zero",
                    c.indicative_price
                ),
            );
        }
        if curtailment_percent > c.frequency_reason_percent {
            return (
                CurtailmentReason::FrequencyRegulation,
                format!("{curtailment_percent:.1}% of renewable output curtailed"),
            );
        }
        (
            CurtailmentReason::Oversupply,
            "renewable output above reserve threshold".to_string(),
        )
    }
}

/// Summary of a stored detection run.
#[derive(Debug, Clone)]
pub struct DetectionReport {
    pub region: String,
    pub detection: Detection,
}

/// Loads observations for `[start, end]`, detects events and upserts them.
///
/// Returned events carry their store ids. Re-running over an overlapping
/// window updates existing events in place.
///
/// # Errors
///
/// Returns `CoreError::Configuration` for an unknown region,
/// `CoreError::DataUnavailable` when the window holds no observations, and
/// `CoreError::Persistence` if the store fails twice.
pub fn detect_and_store<S: Store>(
    store: &S,
    config: &AppConfig,
    region: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<DetectionReport> {
    let region_cfg = config.region(region)?;
    let backoff = config.store.retry_backoff();

    let generation = retry_once(backoff, "load generation", || {
        store.generation_between(region, start, end)
    })?;
    let demand = retry_once(backoff, "load demand", || {
        store.demand_between(region, start, end)
    })?;
    if generation.is_empty() || demand.is_empty() {
        return Err(CoreError::DataUnavailable(format!(
            "no paired observations for {region} between {start} and {end}"
        )));
    }

    let detector = CurtailmentDetector::new(config.detector.clone())
        .with_transmission_capacity(region_cfg.transmission_capacity_mw);
    let mut detection = detector.detect(region, &generation, &demand);

    for event in &mut detection.events {
        let id = retry_once(backoff, "upsert event", || store.upsert_event(event))?;
        event.id = Some(id);
    }

    info!(
        region,
        events = detection.events.len(),
        hours = detection.hours_evaluated,
        unpaired = detection.unpaired_timestamps,
        dropped = detection.dropped_records,
        "curtailment detection complete"
    );

    Ok(DetectionReport {
        region: region.to_string(),
        detection,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 12, hour, 0, 0).unwrap()
    }

    fn gen_obs(hour: u32, source_type: SourceType, mw: f64) -> GenerationObservation {
        GenerationObservation {
            region: "ON".into(),
            source_type,
            timestamp: t(hour),
            generation_mw: mw,
            provenance: "test".into(),
        }
    }

    fn demand_obs(hour: u32, mw: f64) -> DemandObservation {
        DemandObservation {
            region: "ON".into(),
            timestamp: t(hour),
            demand_mw: mw,
        }
    }

    fn detector() -> CurtailmentDetector {
        CurtailmentDetector::new(DetectorConfig::default())
    }

    #[test]
    fn oversupply_hour_is_detected() {
        let generation = vec![
            gen_obs(12, SourceType::Solar, 6_000.0),
            gen_obs(12, SourceType::Wind, 7_000.0),
        ];
        let demand = vec![demand_obs(12, 10_000.0)];
        let d = detector().detect("ON", &generation, &demand);

        assert_eq!(d.events.len(), 1);
        let e = &d.events[0];
        assert!((e.curtailed_mw - 1_200.0).abs() < 1e-6);
        assert!((e.curtailment_percent - 9.2308).abs() < 1e-3);
        assert_eq!(e.source_type, SourceType::Mixed);
        assert_eq!(e.reason, CurtailmentReason::Oversupply);
        assert_eq!(e.duration_hours, 1.0);
        assert_eq!(
            e.total_energy_curtailed_mwh,
            e.curtailed_mw * e.duration_hours
        );
        assert_eq!(e.opportunity_cost, 1_200.0 * 50.0);
        assert_eq!(e.ended_at, Some(t(13)));
    }

    #[test]
    fn just_below_trigger_is_ignored() {
        // trigger is 11,800 x 1.1 = 12,980
        let generation = vec![gen_obs(12, SourceType::Wind, 12_970.0)];
        let demand = vec![demand_obs(12, 10_000.0)];
        assert!(detector().detect("ON", &generation, &demand).events.is_empty());
    }

    #[test]
    fn low_demand_hours_are_filtered() {
        let generation = vec![gen_obs(3, SourceType::Wind, 5_000.0)];
        let demand = vec![demand_obs(3, 900.0)];
        assert!(detector().detect("ON", &generation, &demand).events.is_empty());
    }

    #[test]
    fn small_curtailment_below_significance() {
        let mut cfg = DetectorConfig::default();
        cfg.oversupply_factor = 1.0;
        let generation = vec![gen_obs(12, SourceType::Wind, 1_220.0)];
        let demand = vec![demand_obs(12, 1_001.0)];
        // curtailed = 1220 - 1181.18 = 38.8 MW
        let d = CurtailmentDetector::new(cfg).detect("ON", &generation, &demand);
        assert!(d.events.is_empty());
        assert_eq!(d.hours_evaluated, 1);
    }

    #[test]
    fn missing_demand_skips_hour() {
        let generation = vec![
            gen_obs(12, SourceType::Wind, 20_000.0),
            gen_obs(13, SourceType::Wind, 20_000.0),
        ];
        let demand = vec![demand_obs(13, 10_000.0), demand_obs(14, 10_000.0)];
        let d = detector().detect("ON", &generation, &demand);
        assert_eq!(d.events.len(), 1);
        assert_eq!(d.events[0].occurred_at, t(13));
        assert_eq!(d.hours_evaluated, 1);
        assert_eq!(d.unpaired_timestamps, 2);
    }

    #[test]
    fn non_renewable_sources_are_excluded() {
        let generation = vec![
            gen_obs(12, SourceType::Nuclear, 30_000.0),
            gen_obs(12, SourceType::Solar, 1_000.0),
        ];
        let demand = vec![demand_obs(12, 10_000.0)];
        assert!(detector().detect("ON", &generation, &demand).events.is_empty());
    }

    #[test]
    fn invalid_records_are_dropped() {
        let generation = vec![
            gen_obs(12, SourceType::Wind, f64::NAN),
            gen_obs(12, SourceType::Solar, 14_000.0),
        ];
        let demand = vec![demand_obs(12, 10_000.0), demand_obs(13, -5.0)];
        let d = detector().detect("ON", &generation, &demand);
        assert_eq!(d.dropped_records, 2);
        assert_eq!(d.events.len(), 1);
        assert_eq!(d.events[0].source_type, SourceType::Solar);
    }

    #[test]
    fn congestion_takes_priority() {
        let det = detector().with_transmission_capacity(Some(12_000.0));
        let (reason, detail) = det.classify(13_000.0, 10_000.0, 9.2);
        assert_eq!(reason, CurtailmentReason::Congestion);
        assert!(detail.contains("transmission"));
    }

    #[test]
    fn classification_order_without_congestion() {
        let det = detector();
        assert_eq!(
            det.classify(12_000.0, 10_000.0, 5.0).0,
            CurtailmentReason::Oversupply
        );
        assert_eq!(
            det.classify(11_000.0, 10_000.0, 5.0).0,
            CurtailmentReason::NegativePricing
        );

        let mut cfg = DetectorConfig::default();
        cfg.indicative_price = 10.0;
        let det = CurtailmentDetector::new(cfg);
        assert_eq!(
            det.classify(11_000.0, 10_000.0, 25.0).0,
            CurtailmentReason::FrequencyRegulation
        );
        assert_eq!(
            det.classify(11_000.0, 10_000.0, 5.0).0,
            CurtailmentReason::Oversupply
        );
    }

    #[test]
    fn half_hour_interval_halves_energy() {
        let mut cfg = DetectorConfig::default();
        cfg.interval_minutes = 30;
        let generation = vec![gen_obs(12, SourceType::Wind, 13_000.0)];
        let demand = vec![demand_obs(12, 10_000.0)];
        let d = CurtailmentDetector::new(cfg).detect("ON", &generation, &demand);
        let e = &d.events[0];
        assert!((e.total_energy_curtailed_mwh - 600.0).abs() < 1e-6);
        assert_eq!(e.ended_at, Some(t(12) + Duration::minutes(30)));
    }
}
