use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

use crate::error::ErrorCode;

/// Outcome recorder called concurrently from every dispatch task
pub trait MetricsSink: Send + Sync {
    fn record_submitted(&self);

    fn record_failure(&self, code: ErrorCode);

    fn record_latency(&self, latency: Duration);

    fn record_success(&self) {}
}

/// Latency histogram bucket bounds, milliseconds
const LATENCY_BUCKETS_MS: [u64; 8] = [1, 5, 10, 25, 50, 100, 500, 1000];

/// Lock-free dispatch metrics
pub struct DispatchMetrics {
    /// Dispatch attempts
    pub submitted: AtomicU64,
    /// Orders acknowledged by the broker
    pub succeeded: AtomicU64,
    failures: [AtomicU64; 8],
    latency_count: AtomicU64,
    latency_sum_us: AtomicU64,
    latency_max_us: AtomicU64,
    latency_buckets: [AtomicU64; 8],
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failures: Default::default(),
            latency_count: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: Default::default(),
        }
    }

    fn code_index(code: ErrorCode) -> usize {
        ErrorCode::ALL
            .iter()
            .position(|c| *c == code)
            .unwrap_or(ErrorCode::ALL.len() - 1)
    }

    pub fn failures(&self, code: ErrorCode) -> u64 {
        self.failures[Self::code_index(code)].load(Ordering::Relaxed)
    }

    pub fn total_failures(&self) -> u64 {
        self.failures.iter().map(|f| f.load(Ordering::Relaxed)).sum()
    }

    pub fn avg_latency(&self) -> Duration {
        let count = self.latency_count.load(Ordering::Relaxed);
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.latency_sum_us.load(Ordering::Relaxed) / count)
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_micros(self.latency_max_us.load(Ordering::Relaxed))
    }

    /// One-line status for logs
    pub fn summary(&self) -> String {
        let mut failures = String::new();
        for code in ErrorCode::ALL {
            let n = self.failures(code);
            if n > 0 {
                let _ = write!(failures, " {}={}", code, n);
            }
        }
        format!(
            "submitted={} succeeded={} failed={}{} avg_latency={}us max_latency={}us",
            self.submitted.load(Ordering::Relaxed),
            self.succeeded.load(Ordering::Relaxed),
            self.total_failures(),
            failures,
            self.avg_latency().as_micros(),
            self.max_latency().as_micros(),
        )
    }

    /// Export metrics in Prometheus format
    pub fn prometheus(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(
            out,
            "# HELP tradeguard_orders_submitted_total Dispatch attempts\n\
             # TYPE tradeguard_orders_submitted_total counter\n\
             tradeguard_orders_submitted_total {}\n",
            self.submitted.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "# HELP tradeguard_orders_succeeded_total Orders acknowledged by the broker\n\
             # TYPE tradeguard_orders_succeeded_total counter\n\
             tradeguard_orders_succeeded_total {}\n",
            self.succeeded.load(Ordering::Relaxed)
        );

        let _ = writeln!(
            out,
            "# HELP tradeguard_orders_failed_total Failed dispatches by error code\n\
             # TYPE tradeguard_orders_failed_total counter"
        );
        for code in ErrorCode::ALL {
            let _ = writeln!(
                out,
                "tradeguard_orders_failed_total{{code=\"{}\"}} {}",
                code,
                self.failures(code)
            );
        }
        out.push('\n');

        let _ = writeln!(
            out,
            "# HELP tradeguard_dispatch_latency_seconds Dispatch latency\n\
             # TYPE tradeguard_dispatch_latency_seconds histogram"
        );
        for (bound, bucket) in LATENCY_BUCKETS_MS.iter().zip(&self.latency_buckets) {
            let _ = writeln!(
                out,
                "tradeguard_dispatch_latency_seconds_bucket{{le=\"{}\"}} {}",
                *bound as f64 / 1000.0,
                bucket.load(Ordering::Relaxed)
            );
        }
        let count = self.latency_count.load(Ordering::Relaxed);
        let _ = writeln!(
            out,
            "tradeguard_dispatch_latency_seconds_bucket{{le=\"+Inf\"}} {}\n\
             tradeguard_dispatch_latency_seconds_sum {}\n\
             tradeguard_dispatch_latency_seconds_count {}",
            count,
            self.latency_sum_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            count
        );

        out
    }

    /// Log periodic status
    pub fn log_status(&self) {
        info!("{}", self.summary());
    }
}

impl MetricsSink for DispatchMetrics {
    fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, code: ErrorCode) {
        self.failures[Self::code_index(code)].fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, latency: Duration) {
        let us = latency.as_micros().min(u64::MAX as u128) as u64;
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(us, Ordering::Relaxed);
        self.latency_max_us.fetch_max(us, Ordering::Relaxed);

        // Cumulative buckets
        for (bound, bucket) in LATENCY_BUCKETS_MS.iter().zip(&self.latency_buckets) {
            if us <= bound * 1_000 {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_code() {
        let metrics = DispatchMetrics::new();
        metrics.record_submitted();
        metrics.record_submitted();
        metrics.record_success();
        metrics.record_failure(ErrorCode::RiskHalt);

        assert_eq!(metrics.submitted.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.failures(ErrorCode::RiskHalt), 1);
        assert_eq!(metrics.failures(ErrorCode::CircuitOpen), 0);
        assert_eq!(metrics.total_failures(), 1);
        assert!(metrics.summary().contains("RISK_HALT=1"));
    }

    #[test]
    fn test_latency_histogram() {
        let metrics = DispatchMetrics::new();
        metrics.record_latency(Duration::from_micros(800));
        metrics.record_latency(Duration::from_millis(20));

        assert_eq!(metrics.max_latency(), Duration::from_millis(20));
        assert_eq!(metrics.avg_latency(), Duration::from_micros(10_400));

        let text = metrics.prometheus();
        assert!(text.contains("tradeguard_dispatch_latency_seconds_bucket{le=\"0.001\"} 1"));
        assert!(text.contains("tradeguard_dispatch_latency_seconds_bucket{le=\"0.025\"} 2"));
        assert!(text.contains("tradeguard_dispatch_latency_seconds_count 2"));
        assert!(text.contains("tradeguard_orders_failed_total{code=\"UNKNOWN_ERROR\"} 0"));
    }
}
