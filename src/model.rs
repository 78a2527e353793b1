//! Persisted entities exchanged between the detector, the dispatch engine and the store.
//!
//! Every record is an explicit struct with required fields. Enums are stored
//! as their snake_case tag, the same string used on the wire.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Declares the tag conversions shared by every stored enum.
macro_rules! tagged_enum {
    ($name:ident { $($variant:ident => $tag:literal),+ $(,)? }) => {
        impl $name {
            /// Stable snake_case tag used in the database and JSON.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $tag),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($tag => Ok(Self::$variant),)+
                    other => Err(ValidationError::new(
                        stringify!($name),
                        format!("unknown tag \"{other}\""),
                    )),
                }
            }
        }
    };
}

/// Generation technology of an observation or event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Solar,
    Wind,
    Hydro,
    Biomass,
    Nuclear,
    Gas,
    Other,
    /// More than one renewable source contributed.
    Mixed,
}

tagged_enum!(SourceType {
    Solar => "solar",
    Wind => "wind",
    Hydro => "hydro",
    Biomass => "biomass",
    Nuclear => "nuclear",
    Gas => "gas",
    Other => "other",
    Mixed => "mixed",
});

/// Hour-aligned generation reading for one source in one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationObservation {
    pub region: String,
    pub source_type: SourceType,
    pub timestamp: DateTime<Utc>,
    pub generation_mw: f64,
    /// Where the reading came from (`ieso`, `synthetic`, ...).
    pub provenance: String,
}

impl GenerationObservation {
    /// Rejects non-finite or negative generation and empty regions.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` naming the offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_region(&self.region)?;
        check_power("generation_mw", self.generation_mw)
    }
}

/// Hour-aligned demand reading for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemandObservation {
    pub region: String,
    pub timestamp: DateTime<Utc>,
    pub demand_mw: f64,
}

impl DemandObservation {
    /// Rejects non-finite or negative demand and empty regions.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` naming the offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_region(&self.region)?;
        check_power("demand_mw", self.demand_mw)
    }
}

/// Why renewable output had to be curtailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurtailmentReason {
    Oversupply,
    Congestion,
    NegativePricing,
    FrequencyRegulation,
    VoltageConstraint,
}

tagged_enum!(CurtailmentReason {
    Oversupply => "oversupply",
    Congestion => "congestion",
    NegativePricing => "negative_pricing",
    FrequencyRegulation => "frequency_regulation",
    VoltageConstraint => "voltage_constraint",
});

/// A detected renewable-oversupply interval.
///
/// Natural key is `(region, occurred_at)`; `id` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurtailmentEvent {
    pub id: Option<i64>,
    pub region: String,
    pub source_type: SourceType,
    pub occurred_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub curtailed_mw: f64,
    pub available_capacity_mw: f64,
    pub curtailment_percent: f64,
    pub duration_hours: f64,
    pub total_energy_curtailed_mwh: f64,
    pub reason: CurtailmentReason,
    pub reason_detail: String,
    pub market_price: f64,
    pub opportunity_cost: f64,
    pub grid_demand_mw: f64,
    pub provenance: String,
}

/// Mitigation lever proposed for a curtailment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationKind {
    StorageCharge,
    DemandResponse,
}

tagged_enum!(MitigationKind {
    StorageCharge => "storage_charge",
    DemandResponse => "demand_response",
});

/// Estimated (and later, actual) outcome of one mitigation lever.
///
/// Natural key is `(event_id, kind)`. The `actual_*` fields stay `None` until
/// telemetry reports what really happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationRecommendation {
    pub id: Option<i64>,
    pub event_id: i64,
    pub kind: MitigationKind,
    pub target_mw: f64,
    pub effectiveness: f64,
    pub confidence: f64,
    pub estimated_mwh_saved: f64,
    pub actual_mwh_saved: Option<f64>,
    pub estimated_cost: f64,
    pub actual_cost: Option<f64>,
    pub estimated_revenue: f64,
    pub actual_revenue: Option<f64>,
    pub implemented: bool,
}

impl MitigationRecommendation {
    /// Energy saved, preferring the measured value.
    pub fn mwh_saved(&self) -> f64 {
        self.actual_mwh_saved.unwrap_or(self.estimated_mwh_saved)
    }

    /// Cost, preferring the measured value.
    pub fn cost(&self) -> f64 {
        self.actual_cost.unwrap_or(self.estimated_cost)
    }

    /// Revenue, preferring the measured value.
    pub fn revenue(&self) -> f64 {
        self.actual_revenue.unwrap_or(self.estimated_revenue)
    }
}

/// Measured outcome reported after a recommendation was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MitigationActuals {
    pub mwh_saved: f64,
    pub cost: f64,
    pub revenue: f64,
}

/// Battery fleet state for one region.
///
/// `last_updated` is `None` for a state that has never been persisted; the
/// store uses it as the compare-and-swap token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    pub region: String,
    pub soc_percent: f64,
    pub capacity_mwh: f64,
    pub power_rating_mw: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl BatteryState {
    /// Stored energy in MWh.
    pub fn energy_mwh(&self) -> f64 {
        self.soc_percent / 100.0 * self.capacity_mwh
    }

    /// # Errors
    ///
    /// Returns a `ValidationError` if SoC is outside [0, 100] or the ratings are not positive.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_region(&self.region)?;
        if !self.soc_percent.is_finite() || !(0.0..=100.0).contains(&self.soc_percent) {
            return Err(ValidationError::new(
                "soc_percent",
                format!("{} outside [0, 100]", self.soc_percent),
            ));
        }
        if !(self.capacity_mwh.is_finite() && self.capacity_mwh > 0.0) {
            return Err(ValidationError::new("capacity_mwh", "must be > 0"));
        }
        if !(self.power_rating_mw.is_finite() && self.power_rating_mw > 0.0) {
            return Err(ValidationError::new("power_rating_mw", "must be > 0"));
        }
        Ok(())
    }
}

/// Per-tick label chosen by the dispatch rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchAction {
    Charge,
    Discharge,
    Hold,
}

tagged_enum!(DispatchAction {
    Charge => "charge",
    Discharge => "discharge",
    Hold => "hold",
});

/// Where a grid snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Live,
    Cached,
    Synthetic,
}

tagged_enum!(Provenance {
    Live => "live",
    Cached => "cached",
    Synthetic => "synthetic",
});

impl Provenance {
    /// Confidence attached to decisions made on data of this provenance.
    pub fn confidence(&self) -> f64 {
        match self {
            Self::Live => 1.0,
            Self::Cached => 0.7,
            Self::Synthetic => 0.4,
        }
    }
}

/// Append-only audit record of one dispatch tick.
///
/// Natural key is `(region, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchLogEntry {
    pub id: Option<i64>,
    pub region: String,
    pub timestamp: DateTime<Utc>,
    pub action: DispatchAction,
    pub power_mw: f64,
    /// Tick length the entry was computed with.
    pub duration_hours: f64,
    pub soc_before: f64,
    pub soc_after: f64,
    pub reason: String,
    pub rule: String,
    pub price: f64,
    pub expected_revenue: f64,
    pub renewable_absorption: bool,
    pub curtailment_mitigation: bool,
    pub provenance: Provenance,
}

impl DispatchLogEntry {
    /// Energy moved during the tick.
    pub fn energy_mwh(&self) -> f64 {
        self.power_mw * self.duration_hours
    }
}

/// Stored accuracy summary for a forecast method over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPerformanceRecord {
    pub region: String,
    pub source_type: SourceType,
    pub horizon_hours: u32,
    pub method: String,
    pub mae: f64,
    pub mape: f64,
    pub rmse: f64,
    /// Mean signed error; positive means over-forecasting.
    pub bias: f64,
    pub sample_count: usize,
    pub improvement_vs_baseline_percent: Option<f64>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

fn check_region(region: &str) -> Result<(), ValidationError> {
    if region.trim().is_empty() {
        return Err(ValidationError::new("region", "must not be empty"));
    }
    Ok(())
}

fn check_power(field: &str, mw: f64) -> Result<(), ValidationError> {
    if !mw.is_finite() {
        return Err(ValidationError::new(field, "must be finite"));
    }
    if mw < 0.0 {
        return Err(ValidationError::new(field, format!("negative power {mw}")));
    }
    Ok(())
}
