//! Wiring for the whole subsystem from one [`AppConfig`]

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::AppConfig;
use crate::coordination::clock::monotonic;
use crate::coordination::{CircuitBreakerRegistry, SharedClock};
use crate::exchange::OrderExecutor;
use crate::persistence::{JsonFileSnapshotSink, SnapshotService};
use crate::platform::Dispatcher;
use crate::risk::RiskMonitor;
use crate::services::DispatchMetrics;

/// Risk monitor, breakers and dispatcher sharing one kill switch
pub struct TradeGuard {
    pub config: AppConfig,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub risk: Arc<RiskMonitor>,
    pub metrics: Arc<DispatchMetrics>,
    pub dispatcher: Arc<Dispatcher>,
}

impl TradeGuard {
    pub fn new(config: AppConfig, executor: Arc<dyn OrderExecutor>) -> Self {
        Self::with_clock(config, executor, monotonic())
    }

    /// Build with an explicit clock for breaker and recovery timers
    pub fn with_clock(
        config: AppConfig,
        executor: Arc<dyn OrderExecutor>,
        clock: SharedClock,
    ) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::with_clock(
            config.circuit_breaker.clone(),
            clock.clone(),
        ));
        let risk = Arc::new(RiskMonitor::with_clock(
            config.risk.clone(),
            breakers.kill_switch(),
            clock,
        ));
        let metrics = Arc::new(DispatchMetrics::new());
        let dispatcher = Arc::new(Dispatcher::new(
            config.dispatcher.clone(),
            breakers.clone(),
            risk.clone(),
            executor,
            metrics.clone(),
        ));

        info!(
            kill_switch_mode = %config.risk.kill_switch_mode,
            breaker_reset_mode = %config.circuit_breaker.reset_mode,
            "Trade guard assembled"
        );

        Self {
            config,
            breakers,
            risk,
            metrics,
            dispatcher,
        }
    }

    /// Periodic snapshot writer, when enabled in config
    pub fn snapshot_service(&self) -> Option<SnapshotService> {
        let cfg = &self.config.snapshot;
        if !cfg.enabled {
            return None;
        }
        let sink = Arc::new(JsonFileSnapshotSink::new(&cfg.directory, cfg.max_snapshots));
        Some(SnapshotService::new(
            Duration::from_secs(cfg.interval_secs),
            sink,
            self.risk.clone(),
            self.breakers.clone(),
        ))
    }
}
