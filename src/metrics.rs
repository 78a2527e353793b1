//! Dispatch performance metrics computed from the audit log.

use std::fmt;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{CoreError, Result, ValidationError};
use crate::model::{DispatchAction, DispatchLogEntry};
use crate::store::{Store, retry_once};

/// Round-trip efficiency reported when nothing has been charged yet (%).
pub const TARGET_ROUND_TRIP_EFFICIENCY: f64 = 88.0;

/// Aggregate indicators over a window of dispatch log entries.
///
/// Computed post-hoc from the stored entries; energy uses the duration each
/// entry was recorded with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchMetrics {
    pub total_dispatches: usize,
    pub charge_count: usize,
    pub discharge_count: usize,
    pub hold_count: usize,
    /// Energy charged (MWh).
    pub total_charged_mwh: f64,
    /// Energy discharged (MWh).
    pub total_discharged_mwh: f64,
    /// Discharged over charged, clamped to [0, 100] (%).
    pub round_trip_efficiency: f64,
    /// Share of ticks that moved energy (%).
    pub dispatch_accuracy: f64,
    /// Sum of expected revenue ($).
    pub total_revenue: f64,
    /// Energy charged while renewables were in surplus (MWh).
    pub renewable_absorption_mwh: f64,
    pub curtailment_mitigation_events: usize,
    /// Mean SoC after each tick (%).
    pub avg_soc_percent: f64,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
}

impl DispatchMetrics {
    pub fn from_entries(entries: &[DispatchLogEntry]) -> Self {
        let mut m = Self {
            total_dispatches: entries.len(),
            charge_count: 0,
            discharge_count: 0,
            hold_count: 0,
            total_charged_mwh: 0.0,
            total_discharged_mwh: 0.0,
            round_trip_efficiency: TARGET_ROUND_TRIP_EFFICIENCY,
            dispatch_accuracy: 0.0,
            total_revenue: 0.0,
            renewable_absorption_mwh: 0.0,
            curtailment_mitigation_events: 0,
            avg_soc_percent: 0.0,
            period_start: entries.iter().map(|e| e.timestamp).min(),
            period_end: entries.iter().map(|e| e.timestamp).max(),
        };
        if entries.is_empty() {
            return m;
        }

        let mut soc_sum = 0.0;
        for e in entries {
            let mwh = e.energy_mwh();
            match e.action {
                DispatchAction::Charge => {
                    m.charge_count += 1;
                    m.total_charged_mwh += mwh;
                }
                DispatchAction::Discharge => {
                    m.discharge_count += 1;
                    m.total_discharged_mwh += mwh;
                }
                DispatchAction::Hold => m.hold_count += 1,
            }
            if e.renewable_absorption {
                m.renewable_absorption_mwh += mwh;
            }
            if e.curtailment_mitigation {
                m.curtailment_mitigation_events += 1;
            }
            m.total_revenue += e.expected_revenue;
            soc_sum += e.soc_after;
        }

        let n = entries.len() as f64;
        if m.total_charged_mwh > 0.0 {
            m.round_trip_efficiency =
                (m.total_discharged_mwh / m.total_charged_mwh * 100.0).clamp(0.0, 100.0);
        }
        m.dispatch_accuracy = (m.charge_count + m.discharge_count) as f64 / n * 100.0;
        m.avg_soc_percent = soc_sum / n;
        m
    }

    /// Loads the last `days` days of entries ending at `now` and aggregates them.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` if the window reaches before the
    /// representable range and `CoreError::Persistence` if the query fails
    /// twice.
    pub fn load<S: Store>(
        store: &S,
        region: Option<&str>,
        days: u32,
        now: DateTime<Utc>,
        backoff: StdDuration,
    ) -> Result<Self> {
        let start = lookback(now, days)?;
        let entries = retry_once(backoff, "load dispatch log", || {
            store.dispatch_log(region, start, now)
        })?;
        Ok(Self::from_entries(&entries))
    }
}

/// Start of a window covering the `days` days before `now`.
///
/// # Errors
///
/// Returns `CoreError::Validation` when the start is not representable.
pub fn lookback(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>> {
    Duration::try_days(i64::from(days))
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(|| {
            CoreError::Validation(ValidationError::new(
                "days",
                format!("{days} days before {now} is out of range"),
            ))
        })
}

impl fmt::Display for DispatchMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Dispatch Metrics ---")?;
        if let (Some(start), Some(end)) = (self.period_start, self.period_end) {
            writeln!(f, "Period:                {start} .. {end}")?;
        }
        writeln!(
            f,
            "Dispatches:            {} (charge {}, discharge {}, hold {})",
            self.total_dispatches, self.charge_count, self.discharge_count, self.hold_count
        )?;
        writeln!(
            f,
            "Charged:               {:.2} MWh",
            self.total_charged_mwh
        )?;
        writeln!(
            f,
            "Discharged:            {:.2} MWh",
            self.total_discharged_mwh
        )?;
        writeln!(
            f,
            "Round-trip efficiency: {:.1}%",
            self.round_trip_efficiency
        )?;
        writeln!(f, "Dispatch accuracy:     {:.1}%", self.dispatch_accuracy)?;
        writeln!(f, "Expected revenue:      ${:.2}", self.total_revenue)?;
        writeln!(
            f,
            "Renewable absorption:  {:.2} MWh",
            self.renewable_absorption_mwh
        )?;
        writeln!(
            f,
            "Mitigation events:     {}",
            self.curtailment_mitigation_events
        )?;
        write!(f, "Average SoC:           {:.1}%", self.avg_soc_percent)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::model::Provenance;

    fn entry(
        minute: u32,
        action: DispatchAction,
        power_mw: f64,
        duration_hours: f64,
    ) -> DispatchLogEntry {
        DispatchLogEntry {
            id: None,
            region: "ON".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 3, 12, minute, 0).unwrap(),
            action,
            power_mw,
            duration_hours,
            soc_before: 50.0,
            soc_after: 60.0,
            reason: String::new(),
            rule: "test".into(),
            price: 20.0,
            expected_revenue: 10.0,
            renewable_absorption: action == DispatchAction::Charge,
            curtailment_mitigation: false,
            provenance: Provenance::Live,
        }
    }

    #[test]
    fn empty_window_defaults() {
        let m = DispatchMetrics::from_entries(&[]);
        assert_eq!(m.total_dispatches, 0);
        assert_eq!(m.round_trip_efficiency, TARGET_ROUND_TRIP_EFFICIENCY);
        assert_eq!(m.dispatch_accuracy, 0.0);
        assert!(m.period_start.is_none());
    }

    #[test]
    fn energy_uses_recorded_duration() {
        let entries = vec![
            entry(0, DispatchAction::Charge, 100.0, 0.25),
            entry(15, DispatchAction::Discharge, 40.0, 0.5),
            entry(30, DispatchAction::Hold, 0.0, 0.25),
        ];
        let m = DispatchMetrics::from_entries(&entries);
        assert_eq!(m.total_charged_mwh, 25.0);
        assert_eq!(m.total_discharged_mwh, 20.0);
        assert!((m.round_trip_efficiency - 80.0).abs() < 1e-9);
        assert!((m.dispatch_accuracy - 66.666_666).abs() < 1e-3);
        assert_eq!(m.renewable_absorption_mwh, 25.0);
        assert_eq!(m.total_revenue, 30.0);
        assert_eq!(m.hold_count, 1);
    }

    #[test]
    fn efficiency_clamped_at_100() {
        let entries = vec![
            entry(0, DispatchAction::Charge, 10.0, 0.25),
            entry(15, DispatchAction::Discharge, 100.0, 0.25),
        ];
        assert_eq!(
            DispatchMetrics::from_entries(&entries).round_trip_efficiency,
            100.0
        );
    }

    #[test]
    fn discharge_only_keeps_target_efficiency() {
        let entries = vec![entry(0, DispatchAction::Discharge, 50.0, 0.25)];
        let m = DispatchMetrics::from_entries(&entries);
        assert_eq!(m.round_trip_efficiency, TARGET_ROUND_TRIP_EFFICIENCY);
        assert_eq!(m.dispatch_accuracy, 100.0);
    }

    #[test]
    fn oversized_window_is_rejected() {
        let store = crate::store::SqliteStore::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        let err = DispatchMetrics::load(&store, None, u32::MAX, now, StdDuration::ZERO);
        assert!(matches!(err, Err(CoreError::Validation(_))));

        let m = DispatchMetrics::load(&store, None, 365, now, StdDuration::ZERO).unwrap();
        assert_eq!(m.total_dispatches, 0);
        assert_eq!(lookback(now, 1).unwrap(), now - Duration::days(1));
    }
}
