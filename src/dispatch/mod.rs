//! Rule-based battery dispatch.

pub mod battery;
pub mod engine;
pub mod rules;

pub use battery::Battery;
pub use engine::{
    BatchReport, DispatchEngine, RegionFailure, SnapshotOverrides, TickOutcome, align_to_tick,
    initial_state, plan_tick,
};
pub use rules::{Decision, DispatchRule, RULES, RuleContext};
