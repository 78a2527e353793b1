//! API request, response and query types.

use serde::{Deserialize, Serialize};

use crate::dispatch::TickOutcome;
use crate::model::{BatteryState, DispatchAction, Provenance};

/// `GET /status` query.
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub region: String,
}

/// Battery state and where it came from.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub battery: BatteryState,
    /// `"stored"` for a persisted state, `"default"` for the initial state.
    pub provenance: &'static str,
}

/// `POST /dispatch` body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchRequest {
    pub region: String,
    /// Overrides the snapshot price ($/MWh).
    pub price: Option<f64>,
    /// Overrides the snapshot curtailment risk flag.
    pub curtailment_risk: Option<bool>,
}

/// Decision summary returned by `POST /dispatch`.
#[derive(Debug, Serialize)]
pub struct DecisionBody {
    pub action: DispatchAction,
    pub target_mw: f64,
    pub reason: String,
    pub rule: String,
    pub soc_before: f64,
    pub soc_after: f64,
    pub expected_revenue: f64,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub decision: DecisionBody,
    pub snapshot_provenance: Provenance,
    pub confidence: f64,
    /// True when the tick had already been dispatched.
    pub replayed: bool,
}

impl From<TickOutcome> for DispatchResponse {
    fn from(o: TickOutcome) -> Self {
        let e = o.entry;
        Self {
            decision: DecisionBody {
                action: e.action,
                target_mw: e.power_mw,
                reason: e.reason,
                rule: e.rule,
                soc_before: e.soc_before,
                soc_after: e.soc_after,
                expected_revenue: e.expected_revenue,
            },
            snapshot_provenance: e.provenance,
            confidence: o.confidence,
            replayed: o.replayed,
        }
    }
}

/// `GET /metrics` query.
#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub region: Option<String>,
    /// Window length in days (default 7).
    pub days: Option<u32>,
}

/// `GET /logs` query.
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub region: Option<String>,
    /// Maximum number of entries (default 50).
    pub limit: Option<usize>,
}

/// Error body for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error category (`validation`, `configuration`, `persistence`, ...).
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::model::DispatchLogEntry;

    #[test]
    fn dispatch_response_maps_entry_fields() {
        let at = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        let outcome = TickOutcome {
            entry: DispatchLogEntry {
                id: Some(1),
                region: "ON".into(),
                timestamp: at,
                action: DispatchAction::Discharge,
                power_mw: 80.0,
                duration_hours: 0.25,
                soc_before: 60.0,
                soc_after: 52.0,
                reason: "peak".into(),
                rule: "peak_discharge".into(),
                price: 90.0,
                expected_revenue: 1584.0,
                renewable_absorption: false,
                curtailment_mitigation: false,
                provenance: Provenance::Cached,
            },
            state: BatteryState {
                region: "ON".into(),
                soc_percent: 52.0,
                capacity_mwh: 250.0,
                power_rating_mw: 100.0,
                last_updated: Some(at),
            },
            confidence: 0.7,
            replayed: false,
        };
        let resp = DispatchResponse::from(outcome);
        assert_eq!(resp.decision.target_mw, 80.0);
        assert_eq!(resp.decision.rule, "peak_discharge");
        assert_eq!(resp.snapshot_provenance, Provenance::Cached);
    }

    #[test]
    fn unknown_dispatch_fields_rejected() {
        let body = r#"{"region":"ON","price":20.0,"force":true}"#;
        assert!(serde_json::from_str::<DispatchRequest>(body).is_err());
    }
}
