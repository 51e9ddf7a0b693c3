//! Circuit breaker registry
//!
//! Maps resource names to breaker instances so each downstream venue or
//! symbol gets its own breaker. The name [`KILL_SWITCH`] is reserved for the
//! risk monitor's kill switch, which is always manual-reset.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, ResetMode,
};
use super::clock::{monotonic, SharedClock};

/// Reserved breaker name for the risk kill switch
pub const KILL_SWITCH: &str = "risk.kill_switch";

pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
    clock: SharedClock,
    kill_switch: Arc<CircuitBreaker>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self::with_clock(default_config, monotonic())
    }

    pub fn with_clock(default_config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        // The kill switch only closes through the risk monitor or an operator
        let kill_switch_config = CircuitBreakerConfig {
            reset_mode: ResetMode::Manual,
            ..default_config.clone()
        };
        let kill_switch = Arc::new(CircuitBreaker::with_clock(
            KILL_SWITCH,
            kill_switch_config,
            clock.clone(),
        ));

        let breakers = DashMap::new();
        breakers.insert(KILL_SWITCH.to_string(), kill_switch.clone());

        Self {
            breakers,
            default_config,
            clock,
            kill_switch,
        }
    }

    /// The breaker for `name`, created with the default config on first use
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(breaker = %name, "Registering circuit breaker");
                Arc::new(CircuitBreaker::with_clock(
                    name,
                    self.default_config.clone(),
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    /// Register a breaker with its own config. Returns `false` (and keeps the
    /// existing breaker) if the name is already taken.
    pub fn register(&self, name: &str, config: CircuitBreakerConfig) -> bool {
        if self.breakers.contains_key(name) {
            warn!(breaker = %name, "Circuit breaker already registered");
            return false;
        }
        self.breakers.insert(
            name.to_string(),
            Arc::new(CircuitBreaker::with_clock(name, config, self.clock.clone())),
        );
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.value().clone())
    }

    pub fn kill_switch(&self) -> Arc<CircuitBreaker> {
        self.kill_switch.clone()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Stats for every registered breaker, sorted by name
    pub fn snapshot(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().stats())
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Names of breakers that are not closed
    pub fn open_breakers(&self) -> Vec<String> {
        self.breakers
            .iter()
            .filter(|entry| entry.value().state() != CircuitState::Closed)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Force-close every breaker except the kill switch.
    /// Returns how many were not closed.
    pub fn reset_all(&self) -> usize {
        let mut reset = 0;
        for entry in self.breakers.iter() {
            if entry.key() == KILL_SWITCH {
                continue;
            }
            if entry.value().reset() != CircuitState::Closed {
                reset += 1;
            }
        }
        reset
    }
}
