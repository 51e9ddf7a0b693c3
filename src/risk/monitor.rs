//! Drawdown and leverage monitor.
//!
//! Every account tick is banded into a [`RiskLevel`]. Escalation is applied
//! immediately; lifting a WARNING or HALT waits until the metrics have stayed
//! lower for the recovery cooldown. Reaching HALT trips the kill switch.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::level::{Confidence, RiskAssessment, RiskLevel};
use crate::config::{KillSwitchMode, RiskConfig};
use crate::coordination::clock::monotonic;
use crate::coordination::{CircuitBreaker, CircuitState, SharedClock, TripReason};
use crate::domain::AccountState;
use crate::error::RiskError;

/// A pending downgrade from WARNING or HALT
#[derive(Debug, Clone, Copy)]
struct PendingRecovery {
    since: Instant,
    /// Highest raw level seen while waiting
    target: RiskLevel,
}

#[derive(Debug)]
struct MonitorState {
    reported: RiskLevel,
    pending: Option<PendingRecovery>,
    session_peak: Decimal,
    ticks: u64,
    last_assessment: Option<RiskAssessment>,
}

/// Evaluation timing
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyStats {
    pub evaluations: u64,
    pub over_budget: u64,
    pub max_us: u64,
    pub total_us: u64,
}

impl LatencyStats {
    pub fn avg_us(&self) -> u64 {
        if self.evaluations == 0 {
            0
        } else {
            self.total_us / self.evaluations
        }
    }

    fn record(&mut self, elapsed: Duration, budget: Duration) {
        let us = elapsed.as_micros().min(u64::MAX as u128) as u64;
        self.evaluations += 1;
        self.total_us = self.total_us.saturating_add(us);
        self.max_us = self.max_us.max(us);
        if elapsed > budget {
            self.over_budget += 1;
        }
    }
}

/// Deterministic risk monitor.
///
/// One feed task calls [`RiskMonitor::evaluate`]; any number of readers use
/// [`RiskMonitor::current_level`] and [`RiskMonitor::is_halted`], which never
/// take the evaluation lock.
pub struct RiskMonitor {
    config: RiskConfig,
    kill_switch: Arc<CircuitBreaker>,
    clock: SharedClock,
    state: Mutex<MonitorState>,
    latest: RwLock<Option<Arc<AccountState>>>,
    level: AtomicU8,
    latency: Mutex<LatencyStats>,
}

impl std::fmt::Debug for RiskMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskMonitor")
            .field("level", &self.current_level())
            .field("kill_switch", &self.kill_switch.state())
            .finish()
    }
}

impl RiskMonitor {
    pub fn new(config: RiskConfig, kill_switch: Arc<CircuitBreaker>) -> Self {
        Self::with_clock(config, kill_switch, monotonic())
    }

    pub fn with_clock(
        config: RiskConfig,
        kill_switch: Arc<CircuitBreaker>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            kill_switch,
            clock,
            state: Mutex::new(MonitorState {
                reported: RiskLevel::Normal,
                pending: None,
                session_peak: Decimal::ZERO,
                ticks: 0,
                last_assessment: None,
            }),
            latest: RwLock::new(None),
            level: AtomicU8::new(RiskLevel::Normal.as_u8()),
            latency: Mutex::new(LatencyStats::default()),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Evaluate one account snapshot and return the level that now gates
    /// trading.
    pub fn evaluate(&self, state: AccountState) -> Result<RiskLevel, RiskError> {
        self.assess(state).map(|a| a.level)
    }

    /// Like [`evaluate`](Self::evaluate) but falls back to NORMAL with
    /// degraded confidence while there is not enough data.
    pub fn evaluate_or_degraded(&self, state: AccountState) -> RiskAssessment {
        match self.assess(state) {
            Ok(assessment) => assessment,
            Err(e) => {
                debug!(error = %e, "Risk evaluation degraded");
                RiskAssessment::degraded(e.to_string())
            }
        }
    }

    /// Full evaluation with the metrics behind the level
    pub fn assess(&self, state: AccountState) -> Result<RiskAssessment, RiskError> {
        let started = Instant::now();
        let result = self.assess_inner(state);
        self.record_latency(started.elapsed());
        result
    }

    fn assess_inner(&self, state: AccountState) -> Result<RiskAssessment, RiskError> {
        state
            .check()
            .map_err(|reason| RiskError::InsufficientData { reason })?;

        let snapshot = Arc::new(state);
        *self.latest.write() = Some(snapshot.clone());

        let (assessment, previous) = {
            let mut st = self.state.lock();
            st.ticks += 1;

            if snapshot.peak_balance > st.session_peak {
                st.session_peak = snapshot.peak_balance;
            } else if snapshot.peak_balance < st.session_peak {
                warn!(
                    feed_peak = %snapshot.peak_balance,
                    session_peak = %st.session_peak,
                    "Feed peak balance decreased within session; keeping session peak"
                );
            }

            if st.ticks <= u64::from(self.config.warmup_ticks) {
                return Err(RiskError::InsufficientData {
                    reason: format!(
                        "warming up: tick {} of {}",
                        st.ticks, self.config.warmup_ticks
                    ),
                });
            }

            let peak = st.session_peak;
            let drawdown = snapshot
                .drawdown_from(peak)
                .ok_or_else(|| RiskError::InsufficientData {
                    reason: "no positive peak balance yet".to_string(),
                })?;
            let drawdown_level = RiskLevel::from_thresholds(
                drawdown,
                self.config.drawdown_warning,
                self.config.max_daily_drawdown,
            );

            let effective_leverage = snapshot.effective_leverage();
            let leverage_level = match effective_leverage {
                Some(lev) => RiskLevel::from_thresholds(
                    lev,
                    self.config.leverage_warning,
                    self.config.max_account_leverage,
                ),
                // Equity wiped out against a positive peak
                None => RiskLevel::Halt,
            };

            let raw_level = drawdown_level.max(leverage_level);
            let previous = st.reported;
            let level = self.apply_hysteresis(&mut st, raw_level);
            st.reported = level;
            self.level.store(level.as_u8(), Ordering::Release);

            let reason = (level > RiskLevel::Normal).then(|| {
                describe(drawdown, drawdown_level, effective_leverage, leverage_level)
            });

            let assessment = RiskAssessment {
                level,
                raw_level,
                drawdown_level,
                leverage_level,
                drawdown,
                effective_leverage,
                peak_balance: peak,
                position_multiplier: level.position_multiplier(),
                confidence: Confidence::Full,
                reason,
                evaluated_at: Utc::now(),
            };
            st.last_assessment = Some(assessment.clone());
            (assessment, previous)
        };

        self.apply_kill_switch(previous, &assessment);
        Ok(assessment)
    }

    fn apply_hysteresis(&self, st: &mut MonitorState, raw: RiskLevel) -> RiskLevel {
        let current = st.reported;

        if raw >= current {
            if st.pending.take().is_some() && raw > current {
                debug!(level = %raw, "Recovery interrupted by escalation");
            }
            return raw;
        }

        // CAUTION drops straight back to NORMAL
        if current < RiskLevel::Warning {
            st.pending = None;
            return raw;
        }

        let cooldown = self.config.recovery_cooldown();
        let now = self.clock.now();
        let pending = st.pending.get_or_insert(PendingRecovery {
            since: now,
            target: raw,
        });
        pending.target = pending.target.max(raw);

        let waited = now.saturating_duration_since(pending.since);
        if waited >= cooldown {
            let target = pending.target;
            st.pending = None;
            info!(
                from = %current,
                to = %target,
                waited_secs = waited.as_secs(),
                "Risk level lowered after recovery cooldown"
            );
            target
        } else {
            debug!(
                level = %current,
                raw = %raw,
                remaining_secs = (cooldown - waited).as_secs(),
                "Holding risk level during recovery cooldown"
            );
            current
        }
    }

    fn apply_kill_switch(&self, previous: RiskLevel, assessment: &RiskAssessment) {
        let level = assessment.level;

        if level == RiskLevel::Halt {
            let reason = assessment.reason.clone().unwrap_or_default();
            if self.kill_switch.trip(TripReason::Manual(format!("risk HALT: {}", reason))) {
                error!(
                    drawdown = %assessment.drawdown,
                    leverage = ?assessment.effective_leverage,
                    "Risk level HALT - kill switch engaged"
                );
            }
            return;
        }

        if previous != RiskLevel::Halt {
            if level != previous {
                info!(from = %previous, to = %level, "Risk level changed");
            }
            return;
        }

        match self.config.kill_switch_mode {
            KillSwitchMode::Auto => {
                let was = self.kill_switch.reset();
                info!(
                    to = %level,
                    kill_switch_was = %was,
                    "Risk recovered from HALT - kill switch released"
                );
            }
            KillSwitchMode::Manual => {
                warn!(
                    to = %level,
                    "Risk recovered from HALT - kill switch stays engaged until operator reset"
                );
            }
        }
    }

    fn record_latency(&self, elapsed: Duration) {
        let budget = self.config.latency_budget();
        if elapsed > budget {
            warn!(
                elapsed_us = elapsed.as_micros() as u64,
                budget_ms = self.config.latency_budget_ms,
                "Risk evaluation exceeded latency budget"
            );
        }
        self.latency.lock().record(elapsed, budget);
    }

    /// Level currently gating trading
    pub fn current_level(&self) -> RiskLevel {
        RiskLevel::from_u8(self.level.load(Ordering::Acquire))
    }

    /// True while the level is HALT or the kill switch is not closed
    pub fn is_halted(&self) -> bool {
        self.current_level() == RiskLevel::Halt
            || self.kill_switch.state() != CircuitState::Closed
    }

    /// Human-readable reason trading is blocked, if it is
    pub fn halt_reason(&self) -> Option<String> {
        if self.current_level() == RiskLevel::Halt {
            let detail = self
                .state
                .lock()
                .last_assessment
                .as_ref()
                .and_then(|a| a.reason.clone())
                .unwrap_or_default();
            return Some(format!("risk level HALT ({})", detail));
        }
        match self.kill_switch.state() {
            CircuitState::Closed => None,
            state => Some(format!("kill switch {} pending reset", state)),
        }
    }

    pub fn position_multiplier(&self) -> Decimal {
        self.current_level().position_multiplier()
    }

    pub fn last_assessment(&self) -> Option<RiskAssessment> {
        self.state.lock().last_assessment.clone()
    }

    /// Most recent account snapshot
    pub fn latest_state(&self) -> Option<Arc<AccountState>> {
        self.latest.read().clone()
    }

    pub fn session_peak(&self) -> Decimal {
        self.state.lock().session_peak
    }

    pub fn latency_stats(&self) -> LatencyStats {
        self.latency.lock().clone()
    }

    pub fn kill_switch(&self) -> &Arc<CircuitBreaker> {
        &self.kill_switch
    }

    /// Operator release of the kill switch. Refused while the level is HALT.
    pub fn reset_kill_switch(&self, operator: &str) -> Result<(), RiskError> {
        let level = self.current_level();
        if level == RiskLevel::Halt {
            warn!(operator = %operator, "Kill switch reset refused while HALT");
            return Err(RiskError::ResetRefused { level });
        }
        let was = self.kill_switch.reset();
        info!(operator = %operator, kill_switch_was = %was, level = %level, "Kill switch reset by operator");
        Ok(())
    }

    /// Start a new session: forget the peak and restart warm-up.
    /// The reported level and kill switch are left as they are.
    pub fn reset_session(&self) {
        let mut st = self.state.lock();
        st.session_peak = Decimal::ZERO;
        st.ticks = 0;
        st.pending = None;
        info!(level = %st.reported, "Risk session reset");
    }
}

fn describe(
    drawdown: Decimal,
    drawdown_level: RiskLevel,
    leverage: Option<Decimal>,
    leverage_level: RiskLevel,
) -> String {
    let leverage = leverage
        .map(|l| format!("{}x", l.round_dp(2)))
        .unwrap_or_else(|| "n/a (equity <= 0)".to_string());
    format!(
        "drawdown {}% [{}], leverage {} [{}]",
        (drawdown * Decimal::ONE_HUNDRED).round_dp(2),
        drawdown_level,
        leverage,
        leverage_level
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{CircuitBreakerConfig, ManualClock, ResetMode};
    use rust_decimal_macros::dec;

    fn config(mode: KillSwitchMode) -> RiskConfig {
        RiskConfig {
            max_daily_drawdown: dec!(0.02),
            drawdown_warning: dec!(0.01),
            max_account_leverage: dec!(5),
            leverage_warning: dec!(3),
            recovery_cooldown_seconds: 60,
            kill_switch_mode: mode,
            warmup_ticks: 0,
            latency_budget_ms: 10,
        }
    }

    fn setup(mode: KillSwitchMode) -> (RiskMonitor, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let kill_switch = Arc::new(CircuitBreaker::with_clock(
            "risk.kill_switch",
            CircuitBreakerConfig {
                reset_mode: ResetMode::Manual,
                ..Default::default()
            },
            clock.clone(),
        ));
        let monitor = RiskMonitor::with_clock(config(mode), kill_switch, clock.clone());
        (monitor, clock)
    }

    /// 10k peak account at 1:100
    fn tick(equity: Decimal, margin: Decimal) -> AccountState {
        AccountState::new(
            dec!(10000),
            equity,
            margin,
            dec!(100),
            equity - dec!(10000),
            dec!(10000),
        )
    }

    #[test]
    fn test_normal_conditions() {
        let (monitor, _) = setup(KillSwitchMode::Auto);
        let assessment = monitor.assess(tick(dec!(9950), dec!(200))).unwrap();
        assert_eq!(assessment.level, RiskLevel::Normal);
        assert_eq!(assessment.drawdown, dec!(0.005));
        assert_eq!(assessment.confidence, Confidence::Full);
        assert!(!monitor.is_halted());
    }

    #[test]
    fn test_flash_crash_halts_and_trips_kill_switch() {
        let (monitor, _) = setup(KillSwitchMode::Auto);
        // 2.5% drawdown, modest leverage
        let level = monitor.evaluate(tick(dec!(9750), dec!(100))).unwrap();
        assert_eq!(level, RiskLevel::Halt);
        assert!(monitor.is_halted());
        assert_eq!(monitor.kill_switch().state(), CircuitState::Open);
        assert!(monitor.halt_reason().unwrap().contains("HALT"));
        assert_eq!(monitor.position_multiplier(), Decimal::ZERO);
    }

    #[test]
    fn test_fat_finger_leverage_halts() {
        let (monitor, _) = setup(KillSwitchMode::Auto);
        // drawdown 0.5% but 6.4x effective leverage
        let assessment = monitor.assess(tick(dec!(9950), dec!(640))).unwrap();
        assert_eq!(assessment.drawdown_level, RiskLevel::Normal);
        assert_eq!(assessment.leverage_level, RiskLevel::Halt);
        assert_eq!(assessment.level, RiskLevel::Halt);
    }

    #[test]
    fn test_intermediate_bands() {
        let (monitor, _) = setup(KillSwitchMode::Auto);
        assert_eq!(
            monitor.evaluate(tick(dec!(9880), dec!(0))).unwrap(),
            RiskLevel::Caution
        );
        assert_eq!(
            monitor.evaluate(tick(dec!(9840), dec!(0))).unwrap(),
            RiskLevel::Warning
        );
        assert_eq!(monitor.position_multiplier(), dec!(0.5));
    }

    #[test]
    fn test_non_positive_equity_halts() {
        let (monitor, _) = setup(KillSwitchMode::Auto);
        let assessment = monitor.assess(tick(dec!(0), dec!(10))).unwrap();
        assert_eq!(assessment.level, RiskLevel::Halt);
        assert_eq!(assessment.effective_leverage, None);
    }

    #[test]
    fn test_recovery_requires_cooldown() {
        let (monitor, clock) = setup(KillSwitchMode::Auto);
        monitor.evaluate(tick(dec!(9750), dec!(0))).unwrap();
        assert!(monitor.is_halted());

        // Metrics back to normal, level held
        assert_eq!(
            monitor.evaluate(tick(dec!(9990), dec!(0))).unwrap(),
            RiskLevel::Halt
        );
        clock.advance(Duration::from_secs(30));
        assert_eq!(
            monitor.evaluate(tick(dec!(9990), dec!(0))).unwrap(),
            RiskLevel::Halt
        );

        clock.advance(Duration::from_secs(31));
        assert_eq!(
            monitor.evaluate(tick(dec!(9990), dec!(0))).unwrap(),
            RiskLevel::Normal
        );
        assert!(!monitor.is_halted());
        assert_eq!(monitor.kill_switch().state(), CircuitState::Closed);
    }

    #[test]
    fn test_recovery_lands_on_highest_level_seen() {
        let (monitor, clock) = setup(KillSwitchMode::Auto);
        monitor.evaluate(tick(dec!(9750), dec!(0))).unwrap();

        monitor.evaluate(tick(dec!(9990), dec!(0))).unwrap();
        // dips into CAUTION mid-cooldown
        monitor.evaluate(tick(dec!(9880), dec!(0))).unwrap();
        clock.advance(Duration::from_secs(61));
        assert_eq!(
            monitor.evaluate(tick(dec!(9990), dec!(0))).unwrap(),
            RiskLevel::Caution
        );
    }

    #[test]
    fn test_escalation_restarts_cooldown() {
        let (monitor, clock) = setup(KillSwitchMode::Auto);
        monitor.evaluate(tick(dec!(9750), dec!(0))).unwrap();
        monitor.evaluate(tick(dec!(9990), dec!(0))).unwrap();
        clock.advance(Duration::from_secs(50));
        // back at HALT
        monitor.evaluate(tick(dec!(9700), dec!(0))).unwrap();
        monitor.evaluate(tick(dec!(9990), dec!(0))).unwrap();
        clock.advance(Duration::from_secs(20));
        assert_eq!(
            monitor.evaluate(tick(dec!(9990), dec!(0))).unwrap(),
            RiskLevel::Halt
        );
    }

    #[test]
    fn test_caution_drops_immediately() {
        let (monitor, _) = setup(KillSwitchMode::Auto);
        monitor.evaluate(tick(dec!(9880), dec!(0))).unwrap();
        assert_eq!(
            monitor.evaluate(tick(dec!(9990), dec!(0))).unwrap(),
            RiskLevel::Normal
        );
    }

    #[test]
    fn test_manual_kill_switch_needs_operator() {
        let (monitor, clock) = setup(KillSwitchMode::Manual);
        monitor.evaluate(tick(dec!(9750), dec!(0))).unwrap();

        assert_eq!(
            monitor.reset_kill_switch("ops"),
            Err(RiskError::ResetRefused {
                level: RiskLevel::Halt
            })
        );

        monitor.evaluate(tick(dec!(9990), dec!(0))).unwrap();
        clock.advance(Duration::from_secs(61));
        assert_eq!(
            monitor.evaluate(tick(dec!(9990), dec!(0))).unwrap(),
            RiskLevel::Normal
        );
        // level recovered, switch still engaged
        assert!(monitor.is_halted());
        assert!(monitor.halt_reason().unwrap().contains("kill switch"));

        monitor.reset_kill_switch("ops").unwrap();
        assert!(!monitor.is_halted());
    }

    #[test]
    fn test_warmup_reports_insufficient_data() {
        let clock = Arc::new(ManualClock::new());
        let kill_switch = Arc::new(CircuitBreaker::with_clock(
            "ks",
            CircuitBreakerConfig::default(),
            clock.clone(),
        ));
        let mut cfg = config(KillSwitchMode::Auto);
        cfg.warmup_ticks = 2;
        let monitor = RiskMonitor::with_clock(cfg, kill_switch, clock);

        assert!(matches!(
            monitor.evaluate(tick(dec!(9750), dec!(0))),
            Err(RiskError::InsufficientData { .. })
        ));
        let degraded = monitor.evaluate_or_degraded(tick(dec!(9750), dec!(0)));
        assert_eq!(degraded.level, RiskLevel::Normal);
        assert_eq!(degraded.confidence, Confidence::Degraded);
        assert_eq!(monitor.current_level(), RiskLevel::Normal);

        assert_eq!(
            monitor.evaluate(tick(dec!(9750), dec!(0))).unwrap(),
            RiskLevel::Halt
        );
    }

    #[test]
    fn test_missing_peak_is_insufficient_data() {
        let (monitor, _) = setup(KillSwitchMode::Auto);
        let mut state = tick(dec!(100), dec!(0));
        state.peak_balance = Decimal::ZERO;
        assert!(matches!(
            monitor.evaluate(state),
            Err(RiskError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_session_peak_never_decreases() {
        let (monitor, _) = setup(KillSwitchMode::Auto);
        monitor.evaluate(tick(dec!(10000), dec!(0))).unwrap();

        let mut lower = tick(dec!(9750), dec!(0));
        lower.peak_balance = dec!(9750);
        // still measured against the 10k session peak
        assert_eq!(monitor.evaluate(lower).unwrap(), RiskLevel::Halt);
        assert_eq!(monitor.session_peak(), dec!(10000));

        monitor.reset_session();
        assert_eq!(monitor.session_peak(), Decimal::ZERO);
    }

    #[test]
    fn test_latest_state_and_latency_are_tracked() {
        let (monitor, _) = setup(KillSwitchMode::Auto);
        monitor.evaluate(tick(dec!(9950), dec!(0))).unwrap();
        monitor.evaluate(tick(dec!(9940), dec!(0))).unwrap();
        assert_eq!(monitor.latest_state().unwrap().equity, dec!(9940));
        assert_eq!(monitor.latency_stats().evaluations, 2);
    }
}
