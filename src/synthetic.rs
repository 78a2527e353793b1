//! Seedable synthetic grid data.
//!
//! Used as the last-resort snapshot source and to seed demo observations.
//! Every value is a deterministic function of the seed, the region and the
//! timestamp, so repeated calls agree and tests are reproducible.

use std::f64::consts::PI;

use chrono::{DateTime, Duration, Timelike, Utc};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::error::FetchError;
use crate::grid::{GridSnapshot, SnapshotSource};
use crate::model::{DemandObservation, GenerationObservation, SourceType};

/// Provenance tag written on generated observations.
pub const SYNTHETIC_PROVENANCE: &str = "synthetic";

/// Shape of the hourly series produced by [`SyntheticGrid::observations`].
#[derive(Debug, Clone)]
pub struct ObservationProfile {
    /// Mean demand (MW).
    pub demand_base_mw: f64,
    /// Daily demand swing (MW); peaks in the early evening.
    pub demand_amp_mw: f64,
    /// Demand noise standard deviation (MW).
    pub demand_noise_mw: f64,
    /// Clear-sky solar peak at solar noon (MW).
    pub solar_peak_mw: f64,
    /// Sunrise hour (inclusive).
    pub sunrise_hour: u32,
    /// Sunset hour (exclusive).
    pub sunset_hour: u32,
    /// Mean wind output (MW).
    pub wind_mean_mw: f64,
    /// Wind noise standard deviation (MW).
    pub wind_noise_mw: f64,
}

impl Default for ObservationProfile {
    fn default() -> Self {
        Self {
            demand_base_mw: 12_000.0,
            demand_amp_mw: 2_500.0,
            demand_noise_mw: 300.0,
            solar_peak_mw: 9_000.0,
            sunrise_hour: 6,
            sunset_hour: 20,
            wind_mean_mw: 6_500.0,
            wind_noise_mw: 2_000.0,
        }
    }
}

/// Deterministic synthetic grid generator.
#[derive(Debug, Clone)]
pub struct SyntheticGrid {
    seed: u64,
    profile: ObservationProfile,
}

impl SyntheticGrid {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            profile: ObservationProfile::default(),
        }
    }

    pub fn with_profile(seed: u64, profile: ObservationProfile) -> Self {
        Self { seed, profile }
    }

    /// RNG for one (region, instant, stream) triple.
    fn rng_for(&self, region: &str, at: DateTime<Utc>, stream: u64) -> StdRng {
        // FNV-1a over the region code, mixed with the timestamp and stream id
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for b in region.bytes() {
            h ^= u64::from(b);
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
        let ts = at.timestamp() as u64;
        StdRng::seed_from_u64(self.seed ^ h ^ ts.rotate_left(17) ^ stream.wrapping_mul(0x9e37_79b9))
    }

    /// Snapshot for `region` at `at`.
    ///
    /// Daytime hours (06-18) carry more renewable output, the 17-20 evening
    /// peak carries higher demand and prices, and prices sag toward or below
    /// zero when renewables exceed demand.
    pub fn snapshot(&self, region: &str, at: DateTime<Utc>) -> GridSnapshot {
        let mut rng = self.rng_for(region, at, 0);
        let hour = at.hour();
        let daytime = (6..18).contains(&hour);
        let peak = (17..=20).contains(&hour);

        let renewable = if daytime {
            rng.random_range(800.0..1200.0)
        } else {
            rng.random_range(200.0..400.0)
        };
        let demand = if peak {
            rng.random_range(1200.0..1500.0)
        } else {
            rng.random_range(800.0..1000.0)
        };
        let price = if peak {
            rng.random_range(60.0..100.0)
        } else if renewable > demand {
            rng.random_range(-5.0..30.0)
        } else {
            rng.random_range(30.0..60.0)
        };

        GridSnapshot {
            region: region.to_string(),
            at,
            indicative_price: price,
            renewable_forecast_mw: renewable,
            grid_demand_mw: demand,
            curtailment_risk: renewable > demand * 1.1,
        }
    }

    /// Hourly solar, wind and demand observations for `hours` hours from `start`.
    pub fn observations(
        &self,
        region: &str,
        start: DateTime<Utc>,
        hours: u32,
    ) -> (Vec<GenerationObservation>, Vec<DemandObservation>) {
        let p = &self.profile;
        let mut generation = Vec::with_capacity(hours as usize * 2);
        let mut demand = Vec::with_capacity(hours as usize);

        for i in 0..hours {
            let at = start + Duration::hours(i64::from(i));
            let mut rng = self.rng_for(region, at, 1);
            let hour = f64::from(at.hour());

            let evening = (2.0 * PI * (hour - 12.0) / 24.0).sin();
            let noise = gaussian_noise(&mut rng, p.demand_noise_mw);
            let demand_mw = (p.demand_base_mw + p.demand_amp_mw * evening + noise).max(0.0);

            let solar_mw = p.solar_peak_mw
                * daylight_frac(at.hour(), p.sunrise_hour, p.sunset_hour)
                * (1.0 + gaussian_noise(&mut rng, 0.1)).max(0.0);
            let wind_mw = (p.wind_mean_mw + gaussian_noise(&mut rng, p.wind_noise_mw)).max(0.0);

            for (source_type, mw) in [(SourceType::Solar, solar_mw), (SourceType::Wind, wind_mw)] {
                generation.push(GenerationObservation {
                    region: region.to_string(),
                    source_type,
                    timestamp: at,
                    generation_mw: mw,
                    provenance: SYNTHETIC_PROVENANCE.to_string(),
                });
            }
            demand.push(DemandObservation {
                region: region.to_string(),
                timestamp: at,
                demand_mw,
            });
        }

        (generation, demand)
    }
}

impl SnapshotSource for SyntheticGrid {
    fn fetch(&self, region: &str, at: DateTime<Utc>) -> Result<GridSnapshot, FetchError> {
        Ok(self.snapshot(region, at))
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

/// Half-sine daylight shape: 0 outside `[sunrise, sunset)`, 1 at the midpoint.
fn daylight_frac(hour: u32, sunrise: u32, sunset: u32) -> f64 {
    if hour < sunrise || hour >= sunset {
        return 0.0;
    }
    let span = f64::from(sunset - sunrise);
    let x = (f64::from(hour - sunrise) + 0.5) / span;
    (PI * x).sin().max(0.0)
}

/// Gaussian noise with mean 0 via the Box-Muller transform.
fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }
    let u1: f64 = rng.random::<f64>().clamp(1e-12, 1.0);
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos() * std_dev
}
