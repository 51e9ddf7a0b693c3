//! Coordination layer
//!
//! Failure isolation for downstream dependencies:
//! - Monotonic clock abstraction shared by every timer
//! - Circuit breaker state machine
//! - Registry mapping resource names to breakers (and the kill switch)

pub mod circuit_breaker;
pub mod clock;
pub mod registry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, ResetMode,
    TripReason,
};
pub use clock::{Clock, ManualClock, MonotonicClock, SharedClock};
pub use registry::{CircuitBreakerRegistry, KILL_SWITCH};
