//! Curtailment detection, mitigation and rollups.

pub mod detector;
pub mod mitigation;
pub mod stats;

pub use detector::{CurtailmentDetector, Detection, DetectionReport, detect_and_store};
pub use mitigation::{MitigationSimulator, MitigationSummary, record_actuals, simulate_and_store};
pub use stats::{CurtailmentStatistics, ReasonBreakdown};
