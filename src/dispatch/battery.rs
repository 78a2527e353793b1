use crate::config::RegionConfig;
use crate::model::{BatteryState, DispatchAction};

/// Operating envelope of a regional battery fleet for one tick.
///
/// Combines the persisted state of charge with the region's configured
/// limits and converts between MW and SoC percent using the tick length.
///
/// # Sign Convention
/// Power is always a non-negative magnitude; the direction comes from the
/// [`DispatchAction`].
#[derive(Debug, Clone)]
pub struct Battery {
    /// State of charge (%).
    pub soc_percent: f64,

    /// Energy capacity (MWh).
    pub capacity_mwh: f64,

    /// Maximum charge power, already capped by the power rating (MW).
    pub max_charge_mw: f64,

    /// Maximum discharge power, already capped by the power rating (MW).
    pub max_discharge_mw: f64,

    /// Lower SoC bound (%).
    pub soc_min: f64,

    /// Upper SoC bound (%).
    pub soc_max: f64,

    /// Tick length in hours.
    dt_hours: f64,
}

impl Battery {
    /// Builds the envelope from stored state and region limits.
    ///
    /// Capacity comes from the stored state so that a fleet resized in
    /// configuration keeps the value it was persisted with. Rates are capped
    /// by both the configured and the stored power rating.
    pub fn new(state: &BatteryState, region: &RegionConfig, dt_hours: f64) -> Self {
        let rating = state.power_rating_mw;
        Self {
            soc_percent: state.soc_percent,
            capacity_mwh: state.capacity_mwh,
            max_charge_mw: region.effective_charge_mw().min(rating).max(0.0),
            max_discharge_mw: region.effective_discharge_mw().min(rating).max(0.0),
            soc_min: region.soc_min_percent,
            soc_max: region.soc_max_percent,
            dt_hours,
        }
    }

    pub fn dt_hours(&self) -> f64 {
        self.dt_hours
    }

    /// Power that would fill the battery to `soc_max` within one tick (MW).
    pub fn headroom_mw(&self) -> f64 {
        self.percent_to_mw(self.soc_max - self.soc_percent)
    }

    /// Power that would drain the battery to `floor` within one tick (MW).
    pub fn available_mw(&self, floor: f64) -> f64 {
        self.percent_to_mw(self.soc_percent - floor)
    }

    /// SoC after running `action` at `power_mw` for one tick.
    ///
    /// Charging never raises SoC above `soc_max` and discharging never lowers
    /// it below `soc_min`, unless it already started beyond that bound. The
    /// result is always within [0, 100].
    pub fn soc_after(&self, action: DispatchAction, power_mw: f64) -> f64 {
        let delta = power_mw.max(0.0) * self.dt_hours / self.capacity_mwh * 100.0;
        let soc = self.soc_percent;
        let next = match action {
            DispatchAction::Hold => soc,
            DispatchAction::Charge => (soc + delta).min(self.soc_max.max(soc)),
            DispatchAction::Discharge => (soc - delta).max(self.soc_min.min(soc)),
        };
        next.clamp(0.0, 100.0)
    }

    fn percent_to_mw(&self, percent: f64) -> f64 {
        if percent <= 0.0 || self.dt_hours <= 0.0 {
            return 0.0;
        }
        percent / 100.0 * self.capacity_mwh / self.dt_hours
    }
}
