//! Estimates how much curtailed energy storage and demand response could recover.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{AppConfig, MitigationConfig};
use crate::error::{CoreError, Result, ValidationError};
use crate::model::{CurtailmentEvent, MitigationActuals, MitigationKind, MitigationRecommendation};
use crate::store::{Store, retry_once};

/// Turns curtailment events into mitigation recommendations.
#[derive(Debug, Clone)]
pub struct MitigationSimulator {
    config: MitigationConfig,
}

impl MitigationSimulator {
    pub fn new(config: MitigationConfig) -> Self {
        Self { config }
    }

    /// Recommendations for a single stored event.
    ///
    /// Storage absorbs up to its power limit; demand response is added only
    /// when the residual is above the configured threshold.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if the event has not been stored yet.
    pub fn recommend(
        &self,
        event: &CurtailmentEvent,
    ) -> std::result::Result<Vec<MitigationRecommendation>, ValidationError> {
        let event_id = event.id.ok_or_else(|| {
            ValidationError::new("event.id", "event must be stored before mitigation")
        })?;
        let c = &self.config;
        let dt = event.duration_hours;

        let storage_mw = event.curtailed_mw.min(c.storage_power_mw).max(0.0);
        let storage_saved = storage_mw * dt * c.storage_effectiveness;
        let mut recs = vec![MitigationRecommendation {
            id: None,
            event_id,
            kind: MitigationKind::StorageCharge,
            target_mw: storage_mw,
            effectiveness: c.storage_effectiveness,
            confidence: c.storage_confidence,
            estimated_mwh_saved: storage_saved,
            actual_mwh_saved: None,
            estimated_cost: storage_mw * dt * c.storage_cost_per_mwh,
            actual_cost: None,
            estimated_revenue: storage_saved * c.discharge_revenue_per_mwh,
            actual_revenue: None,
            implemented: false,
        }];

        let residual = event.curtailed_mw - storage_mw;
        if residual > c.residual_threshold_mw {
            let dr_mw = (residual * c.dr_share).min(c.dr_capacity_mw);
            let dr_saved = dr_mw * dt * c.dr_effectiveness;
            recs.push(MitigationRecommendation {
                id: None,
                event_id,
                kind: MitigationKind::DemandResponse,
                target_mw: dr_mw,
                effectiveness: c.dr_effectiveness,
                confidence: c.dr_confidence,
                estimated_mwh_saved: dr_saved,
                actual_mwh_saved: None,
                estimated_cost: dr_mw * dt * c.dr_incentive_per_mwh,
                actual_cost: None,
                estimated_revenue: dr_saved * c.dr_revenue_per_mwh,
                actual_revenue: None,
                implemented: false,
            });
        }

        Ok(recs)
    }
}

/// Aggregate value of a set of recommendations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MitigationSummary {
    pub events: usize,
    pub recommendations: usize,
    pub total_curtailed_mwh: f64,
    pub total_mwh_saved: f64,
    pub total_cost: f64,
    pub total_revenue: f64,
    pub net_benefit: f64,
    /// Revenue per dollar spent, with cost floored at 1.
    pub roi: f64,
    /// Share of curtailed energy recovered (%).
    pub reduction_percent: f64,
}

impl MitigationSummary {
    /// Sums recommendations, preferring actual values over estimates.
    pub fn from_parts(events: &[CurtailmentEvent], recs: &[MitigationRecommendation]) -> Self {
        let total_curtailed_mwh: f64 = events.iter().map(|e| e.total_energy_curtailed_mwh).sum();
        let total_mwh_saved: f64 = recs.iter().map(MitigationRecommendation::mwh_saved).sum();
        let total_cost: f64 = recs.iter().map(MitigationRecommendation::cost).sum();
        let total_revenue: f64 = recs.iter().map(MitigationRecommendation::revenue).sum();

        let reduction_percent = if total_curtailed_mwh > 0.0 {
            total_mwh_saved / total_curtailed_mwh * 100.0
        } else {
            0.0
        };

        Self {
            events: events.len(),
            recommendations: recs.len(),
            total_curtailed_mwh,
            total_mwh_saved,
            total_cost,
            total_revenue,
            net_benefit: total_revenue - total_cost,
            roi: total_revenue / total_cost.max(1.0),
            reduction_percent,
        }
    }
}

impl fmt::Display for MitigationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Mitigation Summary ===")?;
        writeln!(f, "Events:              {}", self.events)?;
        writeln!(f, "Recommendations:     {}", self.recommendations)?;
        writeln!(
            f,
            "Curtailed:           {:.1} MWh",
            self.total_curtailed_mwh
        )?;
        writeln!(f, "Recoverable:         {:.1} MWh", self.total_mwh_saved)?;
        writeln!(f, "Reduction:           {:.1}%", self.reduction_percent)?;
        writeln!(f, "Cost:                ${:.2}", self.total_cost)?;
        writeln!(f, "Revenue:             ${:.2}", self.total_revenue)?;
        writeln!(f, "Net benefit:         ${:.2}", self.net_benefit)?;
        write!(f, "ROI:                 {:.2}", self.roi)
    }
}

/// Generates and upserts recommendations for every event.
///
/// Events without an id are skipped. Re-running refreshes estimates and
/// leaves recorded actuals in place. Unmeasured rows of a kind no longer
/// proposed for the event are deleted. The summary is computed from the
/// stored rows so it reflects both.
///
/// # Errors
///
/// Returns `CoreError::Persistence` if the store fails twice.
pub fn simulate_and_store<S: Store>(
    store: &S,
    config: &AppConfig,
    events: &[CurtailmentEvent],
) -> Result<MitigationSummary> {
    let simulator = MitigationSimulator::new(config.mitigation.clone());
    let backoff = config.store.retry_backoff();

    let stored: Vec<&CurtailmentEvent> = events.iter().filter(|e| e.id.is_some()).collect();
    let mut rows = Vec::new();
    for event in &stored {
        let proposed = simulator.recommend(event)?;
        for rec in &proposed {
            retry_once(backoff, "upsert recommendation", || {
                store.upsert_recommendation(rec)
            })?;
        }
        if let Some(id) = event.id {
            let kinds: Vec<MitigationKind> = proposed.iter().map(|r| r.kind).collect();
            let removed = retry_once(backoff, "retain recommendations", || {
                store.retain_recommendations(id, &kinds)
            })?;
            if removed > 0 {
                debug!(event_id = id, removed, "stale recommendations removed");
            }
            rows.extend(retry_once(backoff, "load recommendations", || {
                store.recommendations_for_event(id)
            })?);
        }
    }

    let owned: Vec<CurtailmentEvent> = stored.into_iter().cloned().collect();
    let summary = MitigationSummary::from_parts(&owned, &rows);
    info!(
        events = summary.events,
        recommendations = summary.recommendations,
        mwh_saved = summary.total_mwh_saved,
        "mitigation simulated"
    );
    Ok(summary)
}

/// Records the measured outcome of a recommendation.
///
/// # Errors
///
/// Returns `CoreError::Validation` for negative or non-finite values and
/// `CoreError::Persistence` if the recommendation does not exist or the
/// store fails twice.
pub fn record_actuals<S: Store>(
    store: &S,
    config: &AppConfig,
    recommendation_id: i64,
    actuals: &MitigationActuals,
) -> Result<()> {
    for (field, value) in [
        ("mwh_saved", actuals.mwh_saved),
        ("cost", actuals.cost),
        ("revenue", actuals.revenue),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(CoreError::Validation(ValidationError::new(
                field,
                format!("must be finite and >= 0, got {value}"),
            )));
        }
    }
    retry_once(config.store.retry_backoff(), "record actuals", || {
        store.record_actuals(recommendation_id, actuals)
    })?;
    info!(recommendation_id, mwh_saved = actuals.mwh_saved, "mitigation actuals recorded");
    Ok(())
}
