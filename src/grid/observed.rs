use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::{GridSnapshot, SnapshotSource};
use crate::error::FetchError;
use crate::model::SourceType;
use crate::store::Store;

/// Builds snapshots from the latest stored observations.
///
/// Renewable output and demand come from the most recent hour that has both
/// within the lookback window; the renewable forecast is that hour carried
/// forward. Observations carry no price: hours at curtailment risk get the
/// oversupply price, all others the base price.
pub struct ObservedSource<S: Store> {
    store: Arc<S>,
    renewable_sources: Vec<SourceType>,
    base_price: f64,
    oversupply_price: f64,
    surplus_factor: f64,
    lookback: Duration,
}

impl<S: Store> ObservedSource<S> {
    pub fn new(store: Arc<S>, renewable_sources: Vec<SourceType>, surplus_factor: f64) -> Self {
        Self {
            store,
            renewable_sources,
            base_price: 50.0,
            oversupply_price: -5.0,
            surplus_factor,
            lookback: Duration::hours(3),
        }
    }

    /// Sets the indicative prices for balanced and oversupplied hours ($/MWh).
    pub fn with_prices(mut self, base_price: f64, oversupply_price: f64) -> Self {
        self.base_price = base_price;
        self.oversupply_price = oversupply_price;
        self
    }
}

impl<S: Store> SnapshotSource for ObservedSource<S> {
    fn fetch(&self, region: &str, at: DateTime<Utc>) -> Result<GridSnapshot, FetchError> {
        let start = at - self.lookback;
        let generation = self
            .store
            .generation_between(region, start, at)
            .map_err(|e| FetchError::Provider(e.to_string()))?;
        let demand = self
            .store
            .demand_between(region, start, at)
            .map_err(|e| FetchError::Provider(e.to_string()))?;

        let mut renewable: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
        for obs in generation
            .iter()
            .filter(|o| self.renewable_sources.contains(&o.source_type))
            .filter(|o| o.validate().is_ok())
        {
            *renewable.entry(obs.timestamp).or_default() += obs.generation_mw;
        }

        let latest = demand
            .iter()
            .rev()
            .filter(|d| d.validate().is_ok())
            .find_map(|d| renewable.get(&d.timestamp).map(|&r| (r, d.demand_mw)));

        let Some((renewable_mw, demand_mw)) = latest else {
            return Err(FetchError::NoData {
                region: region.to_string(),
            });
        };

        let curtailment_risk = renewable_mw > demand_mw * self.surplus_factor;
        Ok(GridSnapshot {
            region: region.to_string(),
            at,
            indicative_price: if curtailment_risk {
                self.oversupply_price
            } else {
                self.base_price
            },
            renewable_forecast_mw: renewable_mw,
            grid_demand_mw: demand_mw,
            curtailment_risk,
        })
    }

    fn name(&self) -> &'static str {
        "observations"
    }
}
