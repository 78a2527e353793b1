//! TOML-based configuration, per-region battery parameters and presets.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::model::SourceType;

/// Top-level configuration parsed from TOML.
///
/// All sections have defaults matching the baseline preset. Load from TOML
/// with [`AppConfig::from_toml_file`] or use [`AppConfig::baseline`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database location and retry policy.
    #[serde(default)]
    pub store: StoreConfig,
    /// Curtailment detection thresholds.
    #[serde(default)]
    pub detector: DetectorConfig,
    /// Dispatch tick length, fetch limits and rule thresholds.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Mitigation simulator assumptions.
    #[serde(default)]
    pub mitigation: MitigationConfig,
    /// Synthetic data generator.
    #[serde(default)]
    pub synthetic: SyntheticConfig,
    /// Battery fleet parameters keyed by region code.
    #[serde(default = "default_regions")]
    pub regions: BTreeMap<String, RegionConfig>,
}

/// Database location and retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite file path.
    pub path: PathBuf,
    /// Backoff before the single retry of a failed store operation (ms).
    pub retry_backoff_ms: u64,
}

impl StoreConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("grid-balance.db"),
            retry_backoff_ms: 200,
        }
    }
}

/// Curtailment detection thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    /// Required headroom above demand (%).
    pub reserve_margin_pct: f64,
    /// Renewables must exceed the reserve threshold by this factor.
    pub oversupply_factor: f64,
    /// Hours with demand at or below this floor are ignored (MW).
    pub min_demand_mw: f64,
    /// Events at or below this size are not recorded (MW).
    pub significance_mw: f64,
    /// Observation interval (minutes); becomes the event duration.
    pub interval_minutes: u32,
    /// Indicative price attached to detected events ($/MWh).
    pub indicative_price: f64,
    /// Value of a curtailed MWh for opportunity cost ($/MWh).
    pub opportunity_price: f64,
    /// Source types summed into renewable generation.
    pub renewable_sources: Vec<SourceType>,
    /// Renewable/demand ratio above which the reason is plain oversupply.
    pub oversupply_reason_factor: f64,
    /// Curtailment share above which frequency regulation is blamed (%).
    pub frequency_reason_percent: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            reserve_margin_pct: 18.0,
            oversupply_factor: 1.1,
            min_demand_mw: 1000.0,
            significance_mw: 50.0,
            interval_minutes: 60,
            indicative_price: -5.0,
            opportunity_price: 50.0,
            renewable_sources: vec![SourceType::Solar, SourceType::Wind],
            oversupply_reason_factor: 1.15,
            frequency_reason_percent: 20.0,
        }
    }
}

impl DetectorConfig {
    /// Observation interval in hours.
    pub fn interval_hours(&self) -> f64 {
        f64::from(self.interval_minutes) / 60.0
    }
}

/// Dispatch tick length, fetch limits and rule thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    /// Interval between ticks (minutes). Every MW to MWh conversion uses it.
    pub tick_minutes: u32,
    /// Upper bound on a grid snapshot fetch (ms).
    pub fetch_timeout_ms: u64,
    /// How long a live snapshot may stand in for a failed fetch (s).
    pub cache_ttl_secs: u64,
    /// SoC given to a region with no stored state (%).
    pub initial_soc_percent: f64,
    /// Price used when no price signal is available ($/MWh).
    pub fallback_price: f64,
    /// Renewable/demand ratio that counts as surplus.
    pub surplus_factor: f64,
    /// Demand/renewable ratio that counts as deficit.
    pub deficit_factor: f64,
    /// Renewable/demand ratio that triggers a strategic discharge.
    pub strategic_factor: f64,
    /// Surplus charging only below this price ($/MWh).
    pub charge_price_max: f64,
    /// Peak discharging only above this price ($/MWh).
    pub discharge_price_min: f64,
    /// Pre-emptive charging only below this price ($/MWh).
    pub preemptive_price_max: f64,
    /// Pre-emptive charging only below this SoC (%).
    pub preemptive_soc_target: f64,
    /// Share of the charge rate used for pre-emptive charging.
    pub preemptive_rate_share: f64,
    /// Strategic discharge only above this SoC (%).
    pub strategic_soc_min: f64,
    /// Strategic discharge only above this price ($/MWh).
    pub strategic_price_min: f64,
    /// Share of the discharge rate used for strategic discharge.
    pub strategic_rate_share: f64,
    /// Strategic discharge never drains below this SoC (%).
    pub strategic_soc_floor: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick_minutes: 15,
            fetch_timeout_ms: 5000,
            cache_ttl_secs: 3600,
            initial_soc_percent: 50.0,
            fallback_price: 50.0,
            surplus_factor: 1.1,
            deficit_factor: 1.2,
            strategic_factor: 1.3,
            charge_price_max: 30.0,
            discharge_price_min: 60.0,
            preemptive_price_max: 40.0,
            preemptive_soc_target: 60.0,
            preemptive_rate_share: 0.5,
            strategic_soc_min: 40.0,
            strategic_price_min: 40.0,
            strategic_rate_share: 0.6,
            strategic_soc_floor: 30.0,
        }
    }
}

impl DispatchConfig {
    /// Tick length in hours.
    pub fn tick_hours(&self) -> f64 {
        f64::from(self.tick_minutes) / 60.0
    }
}

/// Mitigation simulator assumptions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MitigationConfig {
    /// Storage charging power available to absorb curtailment (MW).
    pub storage_power_mw: f64,
    pub storage_effectiveness: f64,
    pub storage_confidence: f64,
    /// Marginal cost of charging curtailed energy ($/MWh).
    pub storage_cost_per_mwh: f64,
    /// Value of stored energy when discharged later ($/MWh).
    pub discharge_revenue_per_mwh: f64,
    /// Residual curtailment must exceed this to call demand response (MW).
    pub residual_threshold_mw: f64,
    /// Share of the residual targeted by demand response.
    pub dr_share: f64,
    /// Demand response capacity cap (MW).
    pub dr_capacity_mw: f64,
    pub dr_effectiveness: f64,
    pub dr_confidence: f64,
    /// Incentive paid to participants ($/MWh).
    pub dr_incentive_per_mwh: f64,
    /// Value of load shifted by demand response ($/MWh).
    pub dr_revenue_per_mwh: f64,
}

impl Default for MitigationConfig {
    fn default() -> Self {
        Self {
            storage_power_mw: 100.0,
            storage_effectiveness: 0.95,
            storage_confidence: 0.92,
            storage_cost_per_mwh: 0.0,
            discharge_revenue_per_mwh: 80.0,
            residual_threshold_mw: 10.0,
            dr_share: 0.6,
            dr_capacity_mw: 100.0,
            dr_effectiveness: 0.80,
            dr_confidence: 0.85,
            dr_incentive_per_mwh: 20.0,
            dr_revenue_per_mwh: 60.0,
        }
    }
}

/// Synthetic data generator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyntheticConfig {
    /// Master random seed.
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self { seed: 42 }
    }
}

/// Battery fleet parameters for one region.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegionConfig {
    /// Total energy capacity (MWh).
    pub capacity_mwh: f64,
    /// Inverter power rating (MW).
    pub power_rating_mw: f64,
    /// Maximum charging power (MW).
    pub charge_rate_mw: f64,
    /// Maximum discharging power (MW).
    pub discharge_rate_mw: f64,
    /// Lowest SoC the dispatcher may reach (%).
    pub soc_min_percent: f64,
    /// Highest SoC the dispatcher may reach (%).
    pub soc_max_percent: f64,
    /// Round-trip efficiency (0.0-1.0).
    pub round_trip_efficiency: f64,
    /// Export limit; renewables above it are blamed on congestion (MW).
    pub transmission_capacity_mw: Option<f64>,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self::sized(100.0, 50.0)
    }
}

impl RegionConfig {
    /// Region with the given size and the standard operating envelope.
    pub fn sized(capacity_mwh: f64, power_rating_mw: f64) -> Self {
        Self {
            capacity_mwh,
            power_rating_mw,
            charge_rate_mw: power_rating_mw,
            discharge_rate_mw: power_rating_mw,
            soc_min_percent: 20.0,
            soc_max_percent: 90.0,
            round_trip_efficiency: 0.88,
            transmission_capacity_mw: None,
        }
    }

    /// Charge rate capped by the power rating (MW).
    pub fn effective_charge_mw(&self) -> f64 {
        self.charge_rate_mw.min(self.power_rating_mw)
    }

    /// Discharge rate capped by the power rating (MW).
    pub fn effective_discharge_mw(&self) -> f64 {
        self.discharge_rate_mw.min(self.power_rating_mw)
    }
}

fn default_regions() -> BTreeMap<String, RegionConfig> {
    [
        ("AB", RegionConfig::sized(120.0, 60.0)),
        ("BC", RegionConfig::sized(80.0, 40.0)),
        ("ON", RegionConfig::sized(250.0, 100.0)),
        ("QC", RegionConfig::sized(60.0, 30.0)),
    ]
    .into_iter()
    .map(|(code, cfg)| (code.to_string(), cfg))
    .collect()
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"dispatch.tick_minutes"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::baseline()
    }
}

impl AppConfig {
    /// Returns the baseline configuration: four provincial fleets, hourly
    /// observations and 15-minute dispatch ticks.
    pub fn baseline() -> Self {
        Self {
            store: StoreConfig::default(),
            detector: DetectorConfig::default(),
            dispatch: DispatchConfig::default(),
            mitigation: MitigationConfig::default(),
            synthetic: SyntheticConfig::default(),
            regions: default_regions(),
        }
    }

    /// Returns a single large Ontario fleet on 30-minute ticks.
    pub fn ontario_large() -> Self {
        let mut regions = BTreeMap::new();
        regions.insert(
            "ON".to_string(),
            RegionConfig {
                charge_rate_mw: 200.0,
                discharge_rate_mw: 200.0,
                ..RegionConfig::sized(500.0, 200.0)
            },
        );
        Self {
            dispatch: DispatchConfig {
                tick_minutes: 30,
                ..DispatchConfig::default()
            },
            regions,
            ..Self::baseline()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "ontario_large"];

    /// Loads configuration from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "ontario_large" => Ok(Self::ontario_large()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("config", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Looks up the battery parameters of a region.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the region has no parameters.
    pub fn region(&self, code: &str) -> Result<&RegionConfig, ConfigError> {
        self.regions.get(code).ok_or_else(|| {
            ConfigError::new(
                format!("regions.{code}"),
                "no battery parameters configured for region",
            )
        })
    }

    /// Configured region codes in sorted order.
    pub fn region_codes(&self) -> Vec<String> {
        self.regions.keys().cloned().collect()
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let d = &self.detector;
        if d.reserve_margin_pct < 0.0 {
            errors.push(ConfigError::new("detector.reserve_margin_pct", "must be >= 0"));
        }
        if d.oversupply_factor < 1.0 {
            errors.push(ConfigError::new("detector.oversupply_factor", "must be >= 1.0"));
        }
        if d.interval_minutes == 0 {
            errors.push(ConfigError::new("detector.interval_minutes", "must be > 0"));
        }
        if d.renewable_sources.is_empty() {
            errors.push(ConfigError::new(
                "detector.renewable_sources",
                "must name at least one source",
            ));
        }

        let p = &self.dispatch;
        if p.tick_minutes == 0 || 60 % p.tick_minutes != 0 {
            errors.push(ConfigError::new(
                "dispatch.tick_minutes",
                format!("must divide 60, got {}", p.tick_minutes),
            ));
        }
        if p.fetch_timeout_ms == 0 {
            errors.push(ConfigError::new("dispatch.fetch_timeout_ms", "must be > 0"));
        }
        if !(0.0..=100.0).contains(&p.initial_soc_percent) {
            errors.push(ConfigError::new(
                "dispatch.initial_soc_percent",
                "must be in [0, 100]",
            ));
        }
        for (field, share) in [
            ("dispatch.preemptive_rate_share", p.preemptive_rate_share),
            ("dispatch.strategic_rate_share", p.strategic_rate_share),
        ] {
            if !(0.0..=1.0).contains(&share) {
                errors.push(ConfigError::new(field, "must be in [0.0, 1.0]"));
            }
        }

        let m = &self.mitigation;
        for (field, eff) in [
            ("mitigation.storage_effectiveness", m.storage_effectiveness),
            ("mitigation.dr_effectiveness", m.dr_effectiveness),
            ("mitigation.dr_share", m.dr_share),
        ] {
            if !(0.0..=1.0).contains(&eff) {
                errors.push(ConfigError::new(field, "must be in [0.0, 1.0]"));
            }
        }

        for (code, r) in &self.regions {
            let field = |name: &str| format!("regions.{code}.{name}");
            if r.capacity_mwh <= 0.0 {
                errors.push(ConfigError::new(field("capacity_mwh"), "must be > 0"));
            }
            if r.power_rating_mw <= 0.0 {
                errors.push(ConfigError::new(field("power_rating_mw"), "must be > 0"));
            }
            if r.charge_rate_mw < 0.0 || r.discharge_rate_mw < 0.0 {
                errors.push(ConfigError::new(field("charge_rate_mw"), "rates must be >= 0"));
            }
            if !(0.0 <= r.soc_min_percent
                && r.soc_min_percent < r.soc_max_percent
                && r.soc_max_percent <= 100.0)
            {
                errors.push(ConfigError::new(
                    field("soc_min_percent"),
                    "must satisfy 0 <= soc_min_percent < soc_max_percent <= 100",
                ));
            }
            if !(r.round_trip_efficiency > 0.0 && r.round_trip_efficiency <= 1.0) {
                errors.push(ConfigError::new(
                    field("round_trip_efficiency"),
                    "must be in (0.0, 1.0]",
                ));
            }
        }

        errors
    }
}
