//! Curtailment rollup over a region and time window.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::model::{CurtailmentEvent, CurtailmentReason, MitigationRecommendation};
use crate::store::{Store, retry_once};

/// Per-reason share of the window's curtailment.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReasonBreakdown {
    pub events: usize,
    pub mwh: f64,
    pub opportunity_cost: f64,
}

/// Curtailment and realised mitigation for one region.
///
/// Mitigation totals only count implemented recommendations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CurtailmentStatistics {
    pub region: String,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub total_events: usize,
    pub total_curtailed_mwh: f64,
    pub total_opportunity_cost: f64,
    pub implemented_recommendations: usize,
    pub total_mwh_saved: f64,
    pub total_cost: f64,
    pub total_revenue: f64,
    pub reduction_percent: f64,
    /// `(revenue - cost) / cost`, 0 when nothing was spent.
    pub roi_benefit_cost: f64,
    pub by_reason: BTreeMap<CurtailmentReason, ReasonBreakdown>,
}

impl CurtailmentStatistics {
    pub fn from_parts(
        region: &str,
        events: &[CurtailmentEvent],
        recommendations: &[MitigationRecommendation],
    ) -> Self {
        let mut stats = Self {
            region: region.to_string(),
            period_start: events.iter().map(|e| e.occurred_at).min(),
            period_end: events.iter().map(|e| e.ended_at.unwrap_or(e.occurred_at)).max(),
            total_events: events.len(),
            ..Self::default()
        };

        for e in events {
            stats.total_curtailed_mwh += e.total_energy_curtailed_mwh;
            stats.total_opportunity_cost += e.opportunity_cost;
            let slot = stats.by_reason.entry(e.reason).or_default();
            slot.events += 1;
            slot.mwh += e.total_energy_curtailed_mwh;
            slot.opportunity_cost += e.opportunity_cost;
        }

        for r in recommendations.iter().filter(|r| r.implemented) {
            stats.implemented_recommendations += 1;
            stats.total_mwh_saved += r.mwh_saved();
            stats.total_cost += r.cost();
            stats.total_revenue += r.revenue();
        }

        if stats.total_curtailed_mwh > 0.0 {
            stats.reduction_percent = stats.total_mwh_saved / stats.total_curtailed_mwh * 100.0;
        }
        if stats.total_cost > 0.0 {
            stats.roi_benefit_cost = (stats.total_revenue - stats.total_cost) / stats.total_cost;
        }
        stats
    }

    /// Loads events in `[start, end]` and their recommendations from the store.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Persistence` if a query fails twice.
    pub fn load<S: Store>(
        store: &S,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        backoff: Duration,
    ) -> Result<Self> {
        let events = retry_once(backoff, "load events", || {
            store.events_between(region, start, end)
        })?;
        let mut recs = Vec::new();
        for id in events.iter().filter_map(|e| e.id) {
            recs.extend(retry_once(backoff, "load recommendations", || {
                store.recommendations_for_event(id)
            })?);
        }
        Ok(Self::from_parts(region, &events, &recs))
    }
}

impl fmt::Display for CurtailmentStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Curtailment Statistics: {} ===", self.region)?;
        writeln!(f, "Events:              {}", self.total_events)?;
        writeln!(
            f,
            "Curtailed:           {:.1} MWh",
            self.total_curtailed_mwh
        )?;
        writeln!(
            f,
            "Opportunity cost:    ${:.2}",
            self.total_opportunity_cost
        )?;
        writeln!(
            f,
            "Implemented:         {}",
            self.implemented_recommendations
        )?;
        writeln!(
            f,
            "Recovered:           {:.1} MWh ({:.1}%)",
            self.total_mwh_saved, self.reduction_percent
        )?;
        writeln!(f, "Benefit/cost:        {:.2}", self.roi_benefit_cost)?;
        for (reason, b) in &self.by_reason {
            writeln!(
                f,
                "  {reason:<22} {:>4} events {:>10.1} MWh",
                b.events,
                b.mwh
            )?;
        }
        Ok(())
    }
}
