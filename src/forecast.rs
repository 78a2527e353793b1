//! Naive baseline forecasts and accuracy metrics for benchmarking supplied forecasts.
//!
//! Everything here is a pure function of its inputs; nothing is persisted
//! except through [`BaselinePerformance::to_record`].

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ForecastPerformanceRecord, SourceType};

/// z-score of a 95% confidence interval.
const Z_95: f64 = 1.96;

/// Floor for a baseline error used as a divisor.
const ERROR_EPSILON: f64 = 0.01;

/// Half-width of the window used to match history samples to a target time.
const MATCH_WINDOW_MINUTES: i64 = 30;

/// Naive forecasting method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMethod {
    Persistence,
    SeasonalNaiveDaily,
    SeasonalNaiveWeekly,
}

impl BaselineMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Persistence => "persistence",
            Self::SeasonalNaiveDaily => "seasonal_naive_daily",
            Self::SeasonalNaiveWeekly => "seasonal_naive_weekly",
        }
    }

    /// Default standard deviation as a share of the forecast magnitude.
    fn default_sigma_share(&self) -> f64 {
        match self {
            Self::Persistence => 0.15,
            Self::SeasonalNaiveDaily => 0.20,
            Self::SeasonalNaiveWeekly => 0.25,
        }
    }
}

impl fmt::Display for BaselineMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A naive point forecast with its 95% confidence interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastBaseline {
    pub method: BaselineMethod,
    pub predicted_value: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub notes: String,
}

fn baseline(
    method: BaselineMethod,
    value: f64,
    sigma: Option<f64>,
    notes: &str,
) -> ForecastBaseline {
    let sigma = sigma.unwrap_or(value.abs() * method.default_sigma_share());
    ForecastBaseline {
        method,
        predicted_value: value,
        ci_lower: (value - Z_95 * sigma).max(0.0),
        ci_upper: value + Z_95 * sigma,
        notes: notes.to_string(),
    }
}

/// Next value equals the latest observed value.
///
/// # Arguments
///
/// * `current` - Most recent observation
/// * `sigma` - Standard deviation override; defaults to 15% of `|current|`
pub fn persistence(current: f64, sigma: Option<f64>) -> ForecastBaseline {
    baseline(
        BaselineMethod::Persistence,
        current,
        sigma,
        "latest observed value carried forward",
    )
}

/// Value at the same hour one day earlier; sigma defaults to 20%.
pub fn seasonal_naive_daily(value_24h_ago: f64, sigma: Option<f64>) -> ForecastBaseline {
    baseline(
        BaselineMethod::SeasonalNaiveDaily,
        value_24h_ago,
        sigma,
        "same hour yesterday",
    )
}

/// Value at the same hour one week earlier; sigma defaults to 25%.
pub fn seasonal_naive_weekly(value_7d_ago: f64, sigma: Option<f64>) -> ForecastBaseline {
    baseline(
        BaselineMethod::SeasonalNaiveWeekly,
        value_7d_ago,
        sigma,
        "same hour last week",
    )
}

/// Accuracy of a forecast series against observed values.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ErrorMetrics {
    pub mae: f64,
    /// Mean absolute percentage error (%).
    pub mape: f64,
    pub rmse: f64,
    /// Mean signed error (forecast minus actual).
    pub bias: f64,
    /// Number of pairs that contributed.
    pub sample_count: usize,
}

/// Computes MAE, MAPE, RMSE and bias over paired forecasts and actuals.
///
/// Pairs with a non-finite value or a zero actual are skipped. Mismatched
/// lengths or no usable pair yield all-zero metrics with `sample_count == 0`.
pub fn error_metrics(forecasts: &[f64], actuals: &[f64]) -> ErrorMetrics {
    if forecasts.len() != actuals.len() {
        return ErrorMetrics::default();
    }

    let mut abs_sum = 0.0;
    let mut pct_sum = 0.0;
    let mut sq_sum = 0.0;
    let mut signed_sum = 0.0;
    let mut n = 0usize;

    for (&f, &a) in forecasts.iter().zip(actuals) {
        if !f.is_finite() || !a.is_finite() || a == 0.0 {
            continue;
        }
        let err = f - a;
        abs_sum += err.abs();
        pct_sum += (err / a).abs();
        sq_sum += err * err;
        signed_sum += err;
        n += 1;
    }

    if n == 0 {
        return ErrorMetrics::default();
    }

    let n_f = n as f64;
    ErrorMetrics {
        mae: abs_sum / n_f,
        mape: pct_sum / n_f * 100.0,
        rmse: (sq_sum / n_f).sqrt(),
        bias: signed_sum / n_f,
        sample_count: n,
    }
}

/// Candidate chosen as most accurate for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedMethod {
    Primary,
    Persistence,
    Seasonal,
}

/// Single-sample comparison of a primary forecast against two baselines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BaselineComparison {
    pub primary_error: f64,
    pub persistence_error: f64,
    pub seasonal_error: f64,
    /// Error reduction relative to persistence (%).
    pub improvement_vs_persistence: f64,
    /// Error reduction relative to the seasonal baseline (%).
    pub improvement_vs_seasonal: f64,
    pub recommended_method: RecommendedMethod,
}

/// Compares one primary forecast against persistence and seasonal baselines.
///
/// The recommended method is whichever candidate has the lowest absolute
/// error; ties keep the earlier candidate in primary, persistence, seasonal order.
pub fn compare_to_baselines(
    primary: f64,
    actual: f64,
    persistence: f64,
    seasonal: f64,
) -> BaselineComparison {
    let primary_error = (primary - actual).abs();
    let persistence_error = (persistence - actual).abs();
    let seasonal_error = (seasonal - actual).abs();

    let improvement = |baseline_err: f64| {
        (baseline_err - primary_error) / baseline_err.max(ERROR_EPSILON) * 100.0
    };

    let mut recommended = (RecommendedMethod::Primary, primary_error);
    for candidate in [
        (RecommendedMethod::Persistence, persistence_error),
        (RecommendedMethod::Seasonal, seasonal_error),
    ] {
        if candidate.1 < recommended.1 {
            recommended = candidate;
        }
    }

    BaselineComparison {
        primary_error,
        persistence_error,
        seasonal_error,
        improvement_vs_persistence: improvement(persistence_error),
        improvement_vs_seasonal: improvement(seasonal_error),
        recommended_method: recommended.0,
    }
}

/// Picks the most appropriate naive baseline for a forecast horizon.
///
/// Persistence up to 3h, the daily seasonal value up to 24h, then the weekly
/// seasonal value. Any missing seasonal value falls through to the next
/// option, ending at persistence.
pub fn select_baseline_for_horizon(
    horizon_hours: u32,
    current: f64,
    daily: Option<f64>,
    weekly: Option<f64>,
) -> ForecastBaseline {
    if horizon_hours <= 3 {
        return persistence(current, None);
    }
    if horizon_hours <= 24
        && let Some(value) = daily
    {
        return seasonal_naive_daily(value, None);
    }
    if let Some(value) = weekly {
        return seasonal_naive_weekly(value, None);
    }
    persistence(current, None)
}

/// Baseline inputs recovered from a history series for one target time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HistoricalBaselines {
    /// Latest value known when the forecast was issued.
    pub persistence: Option<f64>,
    /// Value at the target hour one day earlier.
    pub daily: Option<f64>,
    /// Value at the target hour one week earlier.
    pub weekly: Option<f64>,
}

/// Finds the samples each naive baseline needs for `target`.
///
/// A sample matches a reference time when it lies strictly within 30 minutes
/// of it; the closest match wins. Seasonal samples later than the issue time
/// (`target - horizon`) would not have been known and are ignored.
pub fn baselines_from_history(
    history: &[(DateTime<Utc>, f64)],
    target: DateTime<Utc>,
    horizon_hours: u32,
) -> HistoricalBaselines {
    let issued = target - Duration::hours(i64::from(horizon_hours));
    let known = |reference: DateTime<Utc>| {
        if reference > issued {
            None
        } else {
            nearest_within_window(history, reference)
        }
    };

    HistoricalBaselines {
        persistence: nearest_within_window(history, issued),
        daily: known(target - Duration::hours(24)),
        weekly: known(target - Duration::days(7)),
    }
}

fn nearest_within_window(
    history: &[(DateTime<Utc>, f64)],
    reference: DateTime<Utc>,
) -> Option<f64> {
    let window = Duration::minutes(MATCH_WINDOW_MINUTES);
    history
        .iter()
        .filter(|(_, v)| v.is_finite())
        .map(|&(ts, v)| ((ts - reference).abs(), v))
        .filter(|(distance, _)| *distance < window)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, v)| v)
}

/// Accuracy of one baseline series and how much a primary forecast beats it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselinePerformance {
    pub method: BaselineMethod,
    pub baseline: ErrorMetrics,
    pub primary: ErrorMetrics,
    /// MAE reduction of the primary forecast relative to the baseline (%).
    pub improvement_percent: f64,
    /// `1 - primary_mae / baseline_mae`.
    pub skill_score: f64,
}

/// Scores a primary forecast series against a baseline series.
pub fn baseline_performance(
    method: BaselineMethod,
    primary: &[f64],
    baseline: &[f64],
    actuals: &[f64],
) -> BaselinePerformance {
    let primary_metrics = error_metrics(primary, actuals);
    let baseline_metrics = error_metrics(baseline, actuals);
    let improvement_percent = if baseline_metrics.mae > 0.0 {
        (baseline_metrics.mae - primary_metrics.mae) / baseline_metrics.mae * 100.0
    } else {
        0.0
    };
    BaselinePerformance {
        method,
        baseline: baseline_metrics,
        primary: primary_metrics,
        improvement_percent,
        skill_score: skill_score(primary_metrics.mae, baseline_metrics.mae),
    }
}

/// `1 - model_error / baseline_error`; zero when the baseline error is not positive.
pub fn skill_score(model_error: f64, baseline_error: f64) -> f64 {
    if baseline_error > 0.0 {
        1.0 - model_error / baseline_error
    } else {
        0.0
    }
}

impl BaselinePerformance {
    /// Converts the primary forecast's accuracy into a storable record.
    pub fn to_record(
        &self,
        region: &str,
        source_type: SourceType,
        horizon_hours: u32,
        period: (DateTime<Utc>, DateTime<Utc>),
    ) -> ForecastPerformanceRecord {
        ForecastPerformanceRecord {
            region: region.to_string(),
            source_type,
            horizon_hours,
            method: format!("primary_vs_{}", self.method),
            mae: self.primary.mae,
            mape: self.primary.mape,
            rmse: self.primary.rmse,
            bias: self.primary.bias,
            sample_count: self.primary.sample_count,
            improvement_vs_baseline_percent: Some(self.improvement_percent),
            period_start: period.0,
            period_end: period.1,
        }
    }
}

/// Sample-weighted accuracy across stored performance records.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PerformanceSummary {
    pub mae: f64,
    pub mape: f64,
    pub rmse: f64,
    pub bias: f64,
    pub sample_count: usize,
    pub record_count: usize,
    /// Mean of the records that carry an improvement figure.
    pub mean_improvement_percent: Option<f64>,
}

impl PerformanceSummary {
    /// Weights every record by its sample count. RMSE is pooled through the
    /// mean squared error rather than averaged directly.
    pub fn from_records(records: &[ForecastPerformanceRecord]) -> Self {
        let samples: usize = records.iter().map(|r| r.sample_count).sum();
        if samples == 0 {
            return Self {
                record_count: records.len(),
                ..Self::default()
            };
        }

        let total = samples as f64;
        let weighted = |f: fn(&ForecastPerformanceRecord) -> f64| {
            records
                .iter()
                .map(|r| f(r) * r.sample_count as f64)
                .sum::<f64>()
                / total
        };
        let improvements: Vec<f64> = records
            .iter()
            .filter_map(|r| r.improvement_vs_baseline_percent)
            .collect();

        Self {
            mae: weighted(|r| r.mae),
            mape: weighted(|r| r.mape),
            rmse: weighted(|r| r.rmse * r.rmse).sqrt(),
            bias: weighted(|r| r.bias),
            sample_count: samples,
            record_count: records.len(),
            mean_improvement_percent: (!improvements.is_empty())
                .then(|| improvements.iter().sum::<f64>() / improvements.len() as f64),
        }
    }
}
