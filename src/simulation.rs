//! Scripted end-to-end scenarios against the paper executor

use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{AppConfig, KillSwitchMode};
use crate::coordination::ManualClock;
use crate::domain::{AccountState, Order};
use crate::error::Result;
use crate::exchange::PaperExecutor;
use crate::guard::TradeGuard;
use crate::platform::{DispatcherStats, OrderResult};
use crate::risk::{RiskAssessment, RiskLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// 0.5% drawdown at 1.2x leverage
    Normal,
    /// Equity gaps down 2.5%
    FlashCrash,
    /// Oversized position pushes leverage past the ceiling
    FatFinger,
    /// HALT, then metrics recover and the cooldown passes
    Recovery,
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Scenario::Normal => "normal",
            Scenario::FlashCrash => "flash-crash",
            Scenario::FatFinger => "fat-finger",
            Scenario::Recovery => "recovery",
        };
        write!(f, "{}", s)
    }
}

const PEAK: Decimal = dec!(10000);
const ACCOUNT_LEVERAGE: Decimal = dec!(100);

const SYMBOLS: [&str; 5] = ["EURUSD", "XAUUSD", "BTCUSD", "GBPUSDm", "USDJPY.pro"];

fn tick(equity: Decimal, margin_used: Decimal) -> AccountState {
    AccountState::new(PEAK, equity, margin_used, ACCOUNT_LEVERAGE, equity - PEAK, PEAK)
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub assessment: Option<RiskAssessment>,
    pub level: RiskLevel,
    pub submitted: usize,
    pub succeeded: usize,
    /// Failures by error code
    pub failures: BTreeMap<String, usize>,
    pub broker_peak_in_flight: usize,
    pub dispatcher: DispatcherStats,
    pub metrics: String,
    pub results: Vec<OrderResult>,
}

impl ScenarioReport {
    fn build(
        scenario: Scenario,
        guard: &TradeGuard,
        executor: &PaperExecutor,
        results: Vec<OrderResult>,
    ) -> Self {
        let mut failures = BTreeMap::new();
        for code in results.iter().filter_map(|r| r.error_code) {
            *failures.entry(code.to_string()).or_insert(0) += 1;
        }
        Self {
            scenario,
            assessment: guard.risk.last_assessment(),
            level: guard.risk.current_level(),
            submitted: results.len(),
            succeeded: results.iter().filter(|r| r.success).count(),
            failures,
            broker_peak_in_flight: executor.peak_in_flight(),
            dispatcher: guard.dispatcher.stats(),
            metrics: guard.metrics.summary(),
            results,
        }
    }
}

/// Fire `orders` concurrent orders at the dispatcher
async fn fire(guard: &TradeGuard, orders: usize) -> Vec<OrderResult> {
    let dispatches = (0..orders).map(|i| {
        let dispatcher = guard.dispatcher.clone();
        let symbol = SYMBOLS[i % SYMBOLS.len()];
        let order = Order::buy(symbol, dec!(0.1)).with_metadata("sim_index", i.to_string());
        async move { dispatcher.dispatch(order).await }
    });
    join_all(dispatches).await
}

/// Run one scenario end to end with a paper executor
pub async fn run_scenario(
    config: AppConfig,
    scenario: Scenario,
    orders: usize,
) -> Result<ScenarioReport> {
    let clock = Arc::new(ManualClock::new());
    let executor = Arc::new(PaperExecutor::new(Duration::from_millis(5)));
    let guard = TradeGuard::with_clock(config, executor.clone(), clock.clone());
    let risk = &guard.risk;

    info!(scenario = %scenario, orders, "Running scenario");

    // Seed the session at the peak
    for _ in 0..=guard.config.risk.warmup_ticks {
        risk.evaluate_or_degraded(tick(PEAK, Decimal::ZERO));
    }

    match scenario {
        Scenario::Normal => {
            risk.evaluate(tick(dec!(9950), dec!(120)))?;
        }
        Scenario::FlashCrash => {
            risk.evaluate(tick(dec!(9950), dec!(120)))?;
            risk.evaluate(tick(dec!(9750), dec!(120)))?;
        }
        Scenario::FatFinger => {
            risk.evaluate(tick(dec!(9950), dec!(640)))?;
        }
        Scenario::Recovery => {
            risk.evaluate(tick(dec!(9750), dec!(120)))?;
            let halted = fire(&guard, orders.min(SYMBOLS.len())).await;
            info!(
                rejected = halted.iter().filter(|r| !r.success).count(),
                "Orders during HALT"
            );

            risk.evaluate(tick(dec!(9960), dec!(120)))?;
            clock.advance(guard.config.risk.recovery_cooldown() + Duration::from_secs(1));
            risk.evaluate(tick(dec!(9965), dec!(120)))?;

            if guard.config.risk.kill_switch_mode == KillSwitchMode::Manual {
                risk.reset_kill_switch("simulation")?;
            }
        }
    }

    let results = fire(&guard, orders).await;
    let report = ScenarioReport::build(scenario, &guard, &executor, results);
    info!(
        scenario = %scenario,
        level = %report.level,
        succeeded = report.succeeded,
        submitted = report.submitted,
        "Scenario complete"
    );
    Ok(report)
}
