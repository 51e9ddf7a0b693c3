//! Account risk classification and the kill switch it drives

pub mod level;
pub mod monitor;

pub use level::{Confidence, RiskAssessment, RiskLevel};
pub use monitor::{LatencyStats, RiskMonitor};
