pub mod metrics;

pub use metrics::{DispatchMetrics, MetricsSink};
