//! Order dispatcher: the single entry point for order submission.
//!
//! Pipeline per order: validate, resolve the track, take global and track
//! slots together, check the kill switch, submit through the symbol's
//! circuit breaker under a timeout, then release and record. Every failure
//! comes back inside the [`OrderResult`]; nothing is raised past
//! [`Dispatcher::dispatch`].
//!
//! The kill switch only gates new admissions. Orders already past the gate
//! run to completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::admission::{admit_within, GlobalAdmissionLimiter, SlotStats, TradeTrack};
use crate::config::DispatcherConfig;
use crate::coordination::CircuitBreakerRegistry;
use crate::domain::{AssetType, ExecutionReceipt, Order, SymbolMap};
use crate::error::{BrokerError, DispatchError, ErrorCode};
use crate::exchange::{breaker_name, OrderExecutor};
use crate::risk::RiskMonitor;
use crate::services::MetricsSink;
use crate::validation::validate_order;

/// Outcome of one dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub success: bool,
    pub error_code: Option<ErrorCode>,
    /// Human-readable reason, for audit logs
    pub detail: Option<String>,
    pub latency_us: u64,
    pub receipt: Option<ExecutionReceipt>,
    pub completed_at: DateTime<Utc>,
}

impl OrderResult {
    pub fn ok(order_id: impl Into<String>, receipt: ExecutionReceipt, latency: Duration) -> Self {
        Self {
            order_id: order_id.into(),
            success: true,
            error_code: None,
            detail: None,
            latency_us: latency.as_micros() as u64,
            receipt: Some(receipt),
            completed_at: Utc::now(),
        }
    }

    pub fn rejected(order_id: impl Into<String>, err: &DispatchError, latency: Duration) -> Self {
        Self {
            order_id: order_id.into(),
            success: false,
            error_code: Some(err.code()),
            detail: Some(err.to_string()),
            latency_us: latency.as_micros() as u64,
            receipt: None,
            completed_at: Utc::now(),
        }
    }

    pub fn latency(&self) -> Duration {
        Duration::from_micros(self.latency_us)
    }
}

/// Point-in-time admission counts
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStats {
    pub global: SlotStats,
    pub tracks: Vec<SlotStats>,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    symbols: SymbolMap,
    global: Arc<GlobalAdmissionLimiter>,
    tracks: HashMap<AssetType, Arc<TradeTrack>>,
    breakers: Arc<CircuitBreakerRegistry>,
    risk: Arc<RiskMonitor>,
    executor: Arc<dyn OrderExecutor>,
    metrics: Arc<dyn MetricsSink>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        breakers: Arc<CircuitBreakerRegistry>,
        risk: Arc<RiskMonitor>,
        executor: Arc<dyn OrderExecutor>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        if let Some(warning) = config.capacity_warning() {
            warn!("{}", warning);
        }

        let tracks: HashMap<_, _> = config
            .tracks
            .iter()
            .map(|t| (t.asset_type, Arc::new(TradeTrack::from_config(t))))
            .collect();

        info!(
            global_max_concurrent = config.global_max_concurrent,
            tracks = tracks.len(),
            execution_timeout_ms = config.execution_timeout_ms,
            "Dispatcher ready"
        );

        Self {
            symbols: SymbolMap::new(config.symbol_map.clone()),
            global: Arc::new(GlobalAdmissionLimiter::new(config.global_max_concurrent)),
            tracks,
            breakers,
            risk,
            executor,
            metrics,
            config,
        }
    }

    /// Submit one order. Never panics or returns an error; the result says
    /// what happened.
    pub async fn dispatch(&self, order: Order) -> OrderResult {
        let started = Instant::now();
        self.metrics.record_submitted();

        let outcome = self.run(&order).await;
        let latency = started.elapsed();
        self.metrics.record_latency(latency);

        match outcome {
            Ok(receipt) => {
                self.metrics.record_success();
                debug!(
                    order_id = %order.order_id,
                    symbol = %order.symbol,
                    latency_us = latency.as_micros() as u64,
                    "Order executed"
                );
                OrderResult::ok(order.order_id, receipt, latency)
            }
            Err(err) => {
                let code = err.code();
                self.metrics.record_failure(code);
                if code == ErrorCode::Unknown {
                    error!(
                        order_id = %order.order_id,
                        symbol = %order.symbol,
                        side = %order.side,
                        quantity = %order.quantity,
                        error = %err,
                        "Dispatch failed with unexpected error"
                    );
                } else {
                    info!(
                        order_id = %order.order_id,
                        symbol = %order.symbol,
                        code = %code,
                        reason = %err,
                        "Order rejected"
                    );
                }
                OrderResult::rejected(order.order_id, &err, latency)
            }
        }
    }

    async fn run(&self, order: &Order) -> Result<ExecutionReceipt, DispatchError> {
        validate_order(order).map_err(|e| DispatchError::Validation(e.to_string()))?;
        let track = self.resolve_track(order)?;

        let permit = admit_within(&self.global, &track, self.config.admission_timeout()).await?;

        if self.risk.is_halted() {
            permit.release();
            let reason = self
                .risk
                .halt_reason()
                .unwrap_or_else(|| "kill switch engaged".to_string());
            return Err(DispatchError::RiskHalt { reason });
        }

        let breaker = self.breakers.get_or_create(&breaker_name(&order.symbol));
        let timeout = self.config.execution_timeout();
        let executor = self.executor.clone();

        let result = breaker
            .execute_with(
                || async move {
                    match tokio::time::timeout(timeout, executor.submit_order(order)).await {
                        Ok(result) => result,
                        Err(_) => Err(BrokerError::Timeout(timeout)),
                    }
                },
                BrokerError::counts_as_failure,
            )
            .await;

        permit.release();
        result.map_err(DispatchError::from)
    }

    fn resolve_track(&self, order: &Order) -> Result<Arc<TradeTrack>, DispatchError> {
        let asset_type = self.symbols.classify(&order.symbol).ok_or_else(|| {
            DispatchError::Validation(format!(
                "cannot resolve asset type for symbol '{}'",
                order.symbol
            ))
        })?;

        if let Some(declared) = order.asset_type {
            if declared != asset_type {
                return Err(DispatchError::Validation(format!(
                    "symbol '{}' is {} but order declares {}",
                    order.symbol, asset_type, declared
                )));
            }
        }

        self.tracks.get(&asset_type).cloned().ok_or_else(|| {
            DispatchError::Validation(format!("no track serves asset type '{}'", asset_type))
        })
    }

    pub fn track(&self, asset_type: AssetType) -> Option<&Arc<TradeTrack>> {
        self.tracks.get(&asset_type)
    }

    pub fn global(&self) -> &Arc<GlobalAdmissionLimiter> {
        &self.global
    }

    pub fn risk(&self) -> &Arc<RiskMonitor> {
        &self.risk
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn stats(&self) -> DispatcherStats {
        let mut tracks: Vec<_> = self.tracks.values().map(|t| t.stats()).collect();
        tracks.sort_by(|a, b| a.name.cmp(&b.name));
        DispatcherStats {
            global: self.global.stats(),
            tracks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, KillSwitchMode};
    use crate::coordination::{CircuitBreakerConfig, CircuitState};
    use crate::domain::AccountState;
    use crate::exchange::traits::MockOrderExecutor;
    use crate::exchange::{PaperExecutor, PaperFault};
    use crate::services::DispatchMetrics;
    use rust_decimal_macros::dec;

    struct Harness {
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<DispatchMetrics>,
    }

    fn harness(executor: Arc<dyn OrderExecutor>, tweak: impl FnOnce(&mut AppConfig)) -> Harness {
        let mut config = AppConfig::default_config();
        config.circuit_breaker = CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        config.risk.kill_switch_mode = KillSwitchMode::Manual;
        config.dispatcher.admission_timeout_ms = 0;
        tweak(&mut config);

        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));
        let risk = Arc::new(RiskMonitor::new(config.risk.clone(), breakers.kill_switch()));
        let metrics = Arc::new(DispatchMetrics::new());
        let dispatcher = Arc::new(Dispatcher::new(
            config.dispatcher,
            breakers,
            risk,
            executor,
            metrics.clone(),
        ));
        Harness {
            dispatcher,
            metrics,
        }
    }

    fn paper() -> Arc<PaperExecutor> {
        Arc::new(PaperExecutor::new(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let h = harness(paper(), |_| {});
        let result = h.dispatcher.dispatch(Order::buy("EURUSD", dec!(1))).await;
        assert!(result.success, "{:?}", result.detail);
        assert!(result.receipt.is_some());
        assert_eq!(h.metrics.succeeded.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(h.dispatcher.global().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_invalid_order_touches_nothing() {
        let mut executor = MockOrderExecutor::new();
        executor.expect_submit_order().never();
        let h = harness(Arc::new(executor), |_| {});

        let result = h.dispatcher.dispatch(Order::buy("EURUSD", dec!(0))).await;
        assert_eq!(result.error_code, Some(ErrorCode::Validation));
        assert_eq!(h.dispatcher.global().stats().granted, 0);
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_validation_error() {
        let h = harness(paper(), |_| {});
        let result = h.dispatcher.dispatch(Order::buy("ZZZ", dec!(1))).await;
        assert_eq!(result.error_code, Some(ErrorCode::Validation));
        assert!(result.detail.unwrap().contains("ZZZ"));
    }

    #[tokio::test]
    async fn test_untracked_asset_type_is_validation_error() {
        let h = harness(paper(), |_| {});
        let result = h.dispatcher.dispatch(Order::buy("US30", dec!(1))).await;
        assert_eq!(result.error_code, Some(ErrorCode::Validation));
    }

    #[tokio::test]
    async fn test_halt_blocks_without_calling_broker() {
        let mut executor = MockOrderExecutor::new();
        executor.expect_submit_order().never();
        let h = harness(Arc::new(executor), |_| {});

        let level = h
            .dispatcher
            .risk()
            .evaluate(AccountState::new(
                dec!(10000),
                dec!(9750),
                dec!(0),
                dec!(100),
                dec!(-250),
                dec!(10000),
            ))
            .unwrap();
        assert_eq!(level, crate::risk::RiskLevel::Halt);

        let result = h.dispatcher.dispatch(Order::buy("EURUSD", dec!(1))).await;
        assert_eq!(result.error_code, Some(ErrorCode::RiskHalt));
        assert_eq!(h.dispatcher.global().in_flight(), 0);
        assert_eq!(h.dispatcher.track(AssetType::Forex).unwrap().current_count(), 0);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_failures() {
        let executor = paper();
        executor.set_fault(PaperFault::Transport);
        let h = harness(executor.clone(), |_| {});

        for _ in 0..2 {
            let result = h.dispatcher.dispatch(Order::buy("EURUSD", dec!(1))).await;
            assert_eq!(result.error_code, Some(ErrorCode::UpstreamUnavailable));
        }

        let result = h.dispatcher.dispatch(Order::buy("EURUSD", dec!(1))).await;
        assert_eq!(result.error_code, Some(ErrorCode::CircuitOpen));
        assert_eq!(executor.calls(), 2);

        // other symbols have their own breaker
        executor.set_fault(PaperFault::None);
        let result = h.dispatcher.dispatch(Order::buy("GBPUSD", dec!(1))).await;
        assert!(result.success);
        assert_eq!(
            h.dispatcher.breakers().get("broker.EURUSD").unwrap().state(),
            CircuitState::Open
        );
    }

    #[tokio::test]
    async fn test_open_breaker_covers_every_spelling_of_symbol() {
        let executor = paper();
        executor.set_fault(PaperFault::Transport);
        let h = harness(executor.clone(), |_| {});

        for _ in 0..2 {
            h.dispatcher.dispatch(Order::buy("EURUSD", dec!(1))).await;
        }
        executor.set_fault(PaperFault::None);

        for spelling in ["EURUSD.pro", "eurusd"] {
            let result = h.dispatcher.dispatch(Order::buy(spelling, dec!(1))).await;
            assert_eq!(result.error_code, Some(ErrorCode::CircuitOpen), "{spelling}");
        }
        assert_eq!(executor.calls(), 2);
        assert!(h.dispatcher.breakers().get("broker.EURUSD.pro").is_none());
    }

    #[tokio::test]
    async fn test_declared_asset_type_must_match_symbol() {
        let mut executor = MockOrderExecutor::new();
        executor.expect_submit_order().never();
        let h = harness(Arc::new(executor), |_| {});

        let order = Order::buy("EURUSD", dec!(1)).with_asset_type(AssetType::Crypto);
        let result = h.dispatcher.dispatch(order).await;
        assert_eq!(result.error_code, Some(ErrorCode::Validation));
        assert!(result.detail.unwrap().contains("crypto"));
        assert_eq!(h.dispatcher.track(AssetType::Crypto).unwrap().stats().granted, 0);
    }

    #[tokio::test]
    async fn test_declared_asset_type_matching_symbol_is_routed() {
        let h = harness(paper(), |_| {});
        let order = Order::buy("XAUUSD.x", dec!(1)).with_asset_type(AssetType::Metals);
        let result = h.dispatcher.dispatch(order).await;
        assert!(result.success, "{:?}", result.detail);
        assert_eq!(h.dispatcher.track(AssetType::Metals).unwrap().stats().granted, 1);
    }

    #[tokio::test]
    async fn test_rejections_do_not_trip_breaker() {
        let executor = paper();
        executor.set_fault(PaperFault::Reject);
        let h = harness(executor, |_| {});

        for _ in 0..4 {
            let result = h.dispatcher.dispatch(Order::buy("EURUSD", dec!(1))).await;
            assert_eq!(result.error_code, Some(ErrorCode::OrderRejected));
        }
        assert_eq!(
            h.dispatcher.breakers().get("broker.EURUSD").unwrap().state(),
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn test_execution_timeout_releases_slots() {
        let executor = paper();
        executor.set_fault(PaperFault::Hang);
        let h = harness(executor, |c| c.dispatcher.execution_timeout_ms = 20);

        let result = h.dispatcher.dispatch(Order::buy("XAUUSD", dec!(1))).await;
        assert_eq!(result.error_code, Some(ErrorCode::UpstreamTimeout));
        assert_eq!(h.dispatcher.global().in_flight(), 0);
        assert_eq!(h.dispatcher.track(AssetType::Metals).unwrap().current_count(), 0);
    }

    #[tokio::test]
    async fn test_unexpected_broker_error_is_unknown() {
        let mut executor = MockOrderExecutor::new();
        executor
            .expect_submit_order()
            .returning(|_| Err(BrokerError::Other(anyhow::anyhow!("socket closed mid-frame"))));
        let h = harness(Arc::new(executor), |_| {});

        let result = h.dispatcher.dispatch(Order::buy("EURUSD", dec!(1))).await;
        assert_eq!(result.error_code, Some(ErrorCode::Unknown));
        assert!(result.detail.unwrap().contains("socket closed"));
        assert_eq!(h.metrics.failures(ErrorCode::Unknown), 1);
    }

    #[tokio::test]
    async fn test_track_exhaustion() {
        let executor = paper();
        executor.set_latency(Duration::from_millis(100));
        let h = harness(executor, |c| {
            for track in &mut c.dispatcher.tracks {
                track.max_concurrent = 1;
            }
        });

        let first = {
            let dispatcher = h.dispatcher.clone();
            tokio::spawn(async move { dispatcher.dispatch(Order::buy("EURUSD", dec!(1))).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = h.dispatcher.dispatch(Order::buy("GBPUSD", dec!(1))).await;
        assert_eq!(second.error_code, Some(ErrorCode::ResourceExhausted));
        assert!(first.await.unwrap().success);
    }
}
