//! Grid-balancing decision core: curtailment detection, rule-based battery
//! dispatch, mitigation estimates and baseline forecast evaluation.

#[cfg(feature = "api")]
pub mod api;
pub mod config;
/// Curtailment detection, mitigation simulation and statistics.
pub mod curtailment;
/// Tick-driven battery dispatch.
pub mod dispatch;
pub mod error;
pub mod forecast;
pub mod grid;
pub mod io;
pub mod metrics;
pub mod model;
pub mod store;
pub mod synthetic;
