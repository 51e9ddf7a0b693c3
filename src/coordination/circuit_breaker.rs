//! Circuit Breaker
//!
//! Isolates a failing downstream dependency. One breaker guards one
//! resource; instances are never shared between unrelated resources (see
//! [`super::CircuitBreakerRegistry`]).
//!
//! Transitions:
//! - `Closed -> Open` when consecutive failures reach `failure_threshold`,
//!   when the rolling failure rate reaches `failure_rate_threshold` over at
//!   least `min_calls_for_rate` calls, or when a single call is slower than
//!   `slow_call_duration_ms`. The absolute count can trip the breaker before
//!   the rate sample floor is reached.
//! - `Open -> HalfOpen` after `open_duration_ms` on the monotonic clock, only
//!   when `reset_mode = auto`. With `reset_mode = manual` the breaker stays
//!   open until [`CircuitBreaker::reset`].
//! - `HalfOpen` admits at most `half_open_max_calls` trial calls. Any trial
//!   failure reopens (restarting the open timer); all trials succeeding closes.
//!
//! All counters and the state live behind one mutex per breaker.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::clock::{monotonic, SharedClock};
use crate::error::CircuitBreakerError;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,
    /// Failure threshold exceeded - calls blocked
    Open,
    /// Recovery period - limited trial calls allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// How an open breaker gets back to service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMode {
    /// Move to half-open after `open_duration_ms`
    Auto,
    /// Stay open until an operator calls `reset()`
    Manual,
}

impl std::fmt::Display for ResetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResetMode::Auto => write!(f, "auto"),
            ResetMode::Manual => write!(f, "manual"),
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker regardless of sample size
    pub failure_threshold: u32,
    /// Failure fraction (0, 1] over the rolling window that trips the breaker
    pub failure_rate_threshold: Decimal,
    /// Minimum calls in the window before the rate check applies
    pub min_calls_for_rate: u32,
    /// Number of most recent calls the rate is computed over
    pub rate_window_size: u32,
    /// Calls slower than this count as failures and trip the breaker
    pub slow_call_duration_ms: u64,
    /// Trial calls allowed while half-open
    pub half_open_max_calls: u32,
    /// Time spent open before trial calls are allowed (auto mode)
    pub open_duration_ms: u64,
    pub reset_mode: ResetMode,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: Decimal::new(5, 1), // 50%
            min_calls_for_rate: 10,
            rate_window_size: 20,
            slow_call_duration_ms: 2_000,
            half_open_max_calls: 1,
            open_duration_ms: 30_000,
            reset_mode: ResetMode::Auto,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn slow_call_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_call_duration_ms)
    }

    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.failure_threshold == 0 {
            errors.push("circuit_breaker.failure_threshold must be at least 1".to_string());
        }
        if self.failure_rate_threshold <= Decimal::ZERO || self.failure_rate_threshold > Decimal::ONE
        {
            errors.push(format!(
                "circuit_breaker.failure_rate_threshold must be in (0, 1], got {}",
                self.failure_rate_threshold
            ));
        }
        if self.min_calls_for_rate == 0 {
            errors.push("circuit_breaker.min_calls_for_rate must be at least 1".to_string());
        }
        if self.rate_window_size < self.min_calls_for_rate {
            errors.push(format!(
                "circuit_breaker.rate_window_size ({}) must be >= min_calls_for_rate ({})",
                self.rate_window_size, self.min_calls_for_rate
            ));
        }
        if self.slow_call_duration_ms == 0 {
            errors.push("circuit_breaker.slow_call_duration_ms must be positive".to_string());
        }
        if self.half_open_max_calls == 0 {
            errors.push("circuit_breaker.half_open_max_calls must be at least 1".to_string());
        }
        if self.reset_mode == ResetMode::Auto && self.open_duration_ms == 0 {
            errors.push(
                "circuit_breaker.open_duration_ms must be positive when reset_mode = auto"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Trip reasons for the circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TripReason {
    ConsecutiveFailures(u32),
    FailureRate { failures: u32, calls: u32 },
    SlowCall { elapsed_ms: u64 },
    HalfOpenTrialFailed,
    Manual(String),
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TripReason::ConsecutiveFailures(n) => write!(f, "{} consecutive failures", n),
            TripReason::FailureRate { failures, calls } => {
                write!(f, "failure rate {}/{} calls", failures, calls)
            }
            TripReason::SlowCall { elapsed_ms } => write!(f, "slow call {}ms", elapsed_ms),
            TripReason::HalfOpenTrialFailed => write!(f, "half-open trial failed"),
            TripReason::Manual(reason) => write!(f, "manual: {}", reason),
        }
    }
}

/// Point-in-time view of a breaker, for monitoring and snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub reset_mode: ResetMode,
    pub consecutive_failures: u32,
    pub window_calls: u32,
    pub window_failures: u32,
    pub half_open_in_flight: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    pub total_trips: u64,
    pub last_trip_reason: Option<TripReason>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Bumped on every transition; results from calls admitted in an older
    /// generation only touch the lifetime totals.
    generation: u64,
    consecutive_failures: u32,
    /// Rolling outcomes, `true` = failure
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    half_open_successes: u32,
    last_trip_reason: Option<TripReason>,
    total_calls: u64,
    total_failures: u64,
    rejected_calls: u64,
    total_trips: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            generation: 0,
            consecutive_failures: 0,
            window: VecDeque::new(),
            opened_at: None,
            half_open_in_flight: 0,
            half_open_successes: 0,
            last_trip_reason: None,
            total_calls: 0,
            total_failures: 0,
            rejected_calls: 0,
            total_trips: 0,
        }
    }

    fn window_failures(&self) -> u32 {
        self.window.iter().filter(|failed| **failed).count() as u32
    }

    fn clear_counters(&mut self) {
        self.consecutive_failures = 0;
        self.window.clear();
        self.half_open_in_flight = 0;
        self.half_open_successes = 0;
    }
}

/// Admission handed out by the breaker for one call. Dropping it without
/// calling `complete` (the call future was cancelled) gives a half-open
/// trial slot back without recording an outcome.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    completed: bool,
}

impl CallPermit<'_> {
    fn complete(mut self, failed: bool, elapsed: Duration) {
        self.completed = true;
        self.breaker
            .on_call_complete(self.generation, self.trial, failed, elapsed);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.completed && self.trial {
            self.breaker.on_trial_abandoned(self.generation);
        }
    }
}

/// Circuit breaker guarding one downstream resource
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Mutex<BreakerInner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.inner.lock().state)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker on the process monotonic clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, monotonic())
    }

    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, applying the open-duration timeout first
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Run `operation` through the breaker; every error counts as a failure
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(operation, |_| true).await
    }

    /// Run `operation` through the breaker; `counts_as_failure` decides
    /// whether an error reflects on the resource's health.
    ///
    /// Fails fast without invoking `operation` while the breaker is open or
    /// its half-open trial slots are taken.
    pub async fn execute_with<F, Fut, T, E, C>(
        &self,
        operation: F,
        counts_as_failure: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let permit = self.admit::<E>()?;
        let started = self.clock.now();
        let result = operation().await;
        let elapsed = self.clock.now().saturating_duration_since(started);

        match result {
            Ok(value) => {
                permit.complete(false, elapsed);
                Ok(value)
            }
            Err(e) => {
                permit.complete(counts_as_failure(&e), elapsed);
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    fn admit<E>(&self) -> Result<CallPermit<'_>, CircuitBreakerError<E>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(CallPermit {
                breaker: self,
                generation: inner.generation,
                trial: false,
                completed: false,
            }),
            CircuitState::Open => {
                inner.rejected_calls += 1;
                let retry_after = match self.config.reset_mode {
                    ResetMode::Auto => inner.opened_at.map(|opened| {
                        let elapsed = self.clock.now().saturating_duration_since(opened);
                        self.config.open_duration().saturating_sub(elapsed)
                    }),
                    ResetMode::Manual => None,
                };
                Err(CircuitBreakerError::Open {
                    name: self.name.clone(),
                    retry_after,
                })
            }
            CircuitState::HalfOpen => {
                let admitted = inner.half_open_in_flight + inner.half_open_successes;
                if admitted >= self.config.half_open_max_calls {
                    inner.rejected_calls += 1;
                    return Err(CircuitBreakerError::HalfOpenSaturated {
                        name: self.name.clone(),
                    });
                }
                inner.half_open_in_flight += 1;
                debug!(
                    breaker = %self.name,
                    in_flight = inner.half_open_in_flight,
                    "Half-open trial call admitted"
                );
                Ok(CallPermit {
                    breaker: self,
                    generation: inner.generation,
                    trial: true,
                    completed: false,
                })
            }
        }
    }

    fn on_call_complete(&self, generation: u64, trial: bool, failed: bool, elapsed: Duration) {
        let slow = elapsed > self.config.slow_call_threshold();
        let failed = failed || slow;

        let mut inner = self.inner.lock();
        inner.total_calls += 1;
        if failed {
            inner.total_failures += 1;
        }

        if inner.generation != generation {
            debug!(breaker = %self.name, "Ignoring outcome of call admitted before last transition");
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.window.push_back(failed);
                while inner.window.len() > self.config.rate_window_size as usize {
                    inner.window.pop_front();
                }

                if failed {
                    inner.consecutive_failures += 1;
                } else {
                    inner.consecutive_failures = 0;
                }

                if slow {
                    self.open(
                        &mut inner,
                        TripReason::SlowCall {
                            elapsed_ms: elapsed.as_millis() as u64,
                        },
                    );
                } else if failed && inner.consecutive_failures >= self.config.failure_threshold {
                    let n = inner.consecutive_failures;
                    self.open(&mut inner, TripReason::ConsecutiveFailures(n));
                } else if let Some((failures, calls)) = self.rate_exceeded(&inner) {
                    self.open(&mut inner, TripReason::FailureRate { failures, calls });
                }
            }
            CircuitState::HalfOpen if trial => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                if failed {
                    self.open(&mut inner, TripReason::HalfOpenTrialFailed);
                } else {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.half_open_max_calls {
                        self.close(&mut inner);
                    }
                }
            }
            _ => {}
        }
    }

    fn on_trial_abandoned(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    fn rate_exceeded(&self, inner: &BreakerInner) -> Option<(u32, u32)> {
        let calls = inner.window.len() as u32;
        if calls < self.config.min_calls_for_rate {
            return None;
        }
        let failures = inner.window_failures();
        let rate = Decimal::from(failures) / Decimal::from(calls);
        (rate >= self.config.failure_rate_threshold).then_some((failures, calls))
    }

    /// Lazy `Open -> HalfOpen` once the open duration has elapsed (auto mode)
    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open || self.config.reset_mode != ResetMode::Auto {
            return;
        }
        let Some(opened_at) = inner.opened_at else {
            return;
        };
        if self.clock.now().saturating_duration_since(opened_at) >= self.config.open_duration() {
            inner.state = CircuitState::HalfOpen;
            inner.generation += 1;
            inner.half_open_in_flight = 0;
            inner.half_open_successes = 0;
            info!(breaker = %self.name, "Circuit breaker transitioning to HALF-OPEN");
        }
    }

    fn open(&self, inner: &mut BreakerInner, reason: TripReason) {
        let from = inner.state;
        inner.state = CircuitState::Open;
        inner.generation += 1;
        inner.opened_at = Some(self.clock.now());
        inner.clear_counters();
        inner.total_trips += 1;
        warn!(
            breaker = %self.name,
            from = %from,
            reason = %reason,
            "Circuit breaker TRIPPED"
        );
        inner.last_trip_reason = Some(reason);
    }

    fn close(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.generation += 1;
        inner.opened_at = None;
        inner.clear_counters();
        info!(breaker = %self.name, "Circuit breaker CLOSED - normal operation resumed");
    }

    /// Force the breaker open. Returns `false` if it was already open.
    pub fn trip(&self, reason: TripReason) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            debug!(breaker = %self.name, reason = %reason, "Trip requested on open breaker");
            return false;
        }
        self.open(&mut inner, reason);
        true
    }

    /// Manually trip the circuit
    pub fn manual_trip(&self, reason: &str) -> bool {
        self.trip(TripReason::Manual(reason.to_string()))
    }

    /// Force the breaker closed outside normal recovery.
    /// Returns the state it was in.
    pub fn reset(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        if previous != CircuitState::Closed {
            self.close(&mut inner);
            warn!(breaker = %self.name, from = %previous, "Circuit breaker force-closed");
        }
        previous
    }

    /// Get circuit breaker statistics
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            reset_mode: self.config.reset_mode,
            consecutive_failures: inner.consecutive_failures,
            window_calls: inner.window.len() as u32,
            window_failures: inner.window_failures(),
            half_open_in_flight: inner.half_open_in_flight,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
            total_trips: inner.total_trips,
            last_trip_reason: inner.last_trip_reason.clone(),
        }
    }
}
