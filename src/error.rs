use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::risk::RiskLevel;

/// Main error type for the guard subsystem
#[derive(Error, Debug)]
pub enum GuardError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    // IO / serialization
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Input errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Risk errors
    #[error("Risk error: {0}")]
    Risk(#[from] RiskError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for GuardError
pub type Result<T> = std::result::Result<T, GuardError>;

/// Errors raised by the risk monitor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RiskError {
    /// Warm-up: not enough history to compute a trustworthy level.
    /// Callers treat this as NORMAL with degraded confidence.
    #[error("Insufficient data: {reason}")]
    InsufficientData { reason: String },

    #[error("Kill switch reset refused while risk level is {level}")]
    ResetRefused { level: RiskLevel },
}

/// Errors from the admission limiters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("global admission ceiling reached ({limit} in flight)")]
    GlobalExhausted { limit: usize },

    #[error("track '{track}' at capacity ({limit} in flight)")]
    TrackExhausted { track: String, limit: usize },

    #[error("no admission slot within {waited_ms}ms: {cause}")]
    TimedOut { waited_ms: u64, cause: String },
}

/// Errors returned by [`crate::coordination::CircuitBreaker::execute`]
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Breaker is open; the operation was not invoked.
    Open {
        name: String,
        retry_after: Option<Duration>,
    },
    /// Breaker is half-open and every trial slot is taken.
    HalfOpenSaturated { name: String },
    /// The wrapped operation itself failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerError::Open {
                name,
                retry_after: Some(after),
            } => write!(f, "circuit '{}' is open, retry in {}ms", name, after.as_millis()),
            CircuitBreakerError::Open {
                name,
                retry_after: None,
            } => write!(f, "circuit '{}' is open until manually reset", name),
            CircuitBreakerError::HalfOpenSaturated { name } => {
                write!(f, "circuit '{}' is half-open and all trial calls are in flight", name)
            }
            CircuitBreakerError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for CircuitBreakerError<E> {}

/// Errors reported by the external execution collaborator
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("order rejected by broker: {0}")]
    Rejected(String),

    #[error("broker call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("broker transport failure: {0}")]
    Transport(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BrokerError {
    /// Business rejections say nothing about the health of the venue, so
    /// they do not count against its circuit breaker.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, BrokerError::Rejected(_))
    }
}

/// Machine-readable rejection codes carried by every failed `OrderResult`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "RESOURCE_EXHAUSTED")]
    ResourceExhausted,
    #[serde(rename = "CIRCUIT_OPEN")]
    CircuitOpen,
    #[serde(rename = "RISK_HALT")]
    RiskHalt,
    #[serde(rename = "UPSTREAM_TIMEOUT")]
    UpstreamTimeout,
    #[serde(rename = "ORDER_REJECTED")]
    OrderRejected,
    #[serde(rename = "UPSTREAM_UNAVAILABLE")]
    UpstreamUnavailable,
    #[serde(rename = "UNKNOWN_ERROR")]
    Unknown,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 8] = [
        ErrorCode::Validation,
        ErrorCode::ResourceExhausted,
        ErrorCode::CircuitOpen,
        ErrorCode::RiskHalt,
        ErrorCode::UpstreamTimeout,
        ErrorCode::OrderRejected,
        ErrorCode::UpstreamUnavailable,
        ErrorCode::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "VALIDATION_ERROR",
            ErrorCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::RiskHalt => "RISK_HALT",
            ErrorCode::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            ErrorCode::OrderRejected => "ORDER_REJECTED",
            ErrorCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorCode::Unknown => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of reasons a dispatch can fail
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    ResourceExhausted(#[from] AdmissionError),

    #[error("{detail}")]
    CircuitOpen { name: String, detail: String },

    #[error("trading halted: {reason}")]
    RiskHalt { reason: String },

    #[error("execution timed out after {}ms", .after.as_millis())]
    UpstreamTimeout { after: Duration },

    #[error("{0}")]
    OrderRejected(String),

    #[error("{0}")]
    UpstreamUnavailable(String),

    #[error("unexpected failure: {0}")]
    Unknown(String),
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::Validation(_) => ErrorCode::Validation,
            DispatchError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            DispatchError::CircuitOpen { .. } => ErrorCode::CircuitOpen,
            DispatchError::RiskHalt { .. } => ErrorCode::RiskHalt,
            DispatchError::UpstreamTimeout { .. } => ErrorCode::UpstreamTimeout,
            DispatchError::OrderRejected(_) => ErrorCode::OrderRejected,
            DispatchError::UpstreamUnavailable(_) => ErrorCode::UpstreamUnavailable,
            DispatchError::Unknown(_) => ErrorCode::Unknown,
        }
    }
}

impl From<BrokerError> for DispatchError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Rejected(reason) => DispatchError::OrderRejected(reason),
            BrokerError::Timeout(after) => DispatchError::UpstreamTimeout { after },
            BrokerError::Transport(reason) => DispatchError::UpstreamUnavailable(reason),
            BrokerError::Other(e) => DispatchError::Unknown(format!("{:#}", e)),
        }
    }
}

impl From<CircuitBreakerError<BrokerError>> for DispatchError {
    fn from(err: CircuitBreakerError<BrokerError>) -> Self {
        match err {
            CircuitBreakerError::Inner(e) => e.into(),
            rejection @ (CircuitBreakerError::Open { .. }
            | CircuitBreakerError::HalfOpenSaturated { .. }) => {
                let detail = rejection.to_string();
                let name = match rejection {
                    CircuitBreakerError::Open { name, .. }
                    | CircuitBreakerError::HalfOpenSaturated { name } => name,
                    CircuitBreakerError::Inner(_) => String::new(),
                };
                DispatchError::CircuitOpen { name, detail }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ErrorCode::Validation.as_str(), "VALIDATION_ERROR");
        assert_eq!(ErrorCode::RiskHalt.to_string(), "RISK_HALT");
        assert_eq!(
            serde_json::to_string(&ErrorCode::Unknown).unwrap(),
            "\"UNKNOWN_ERROR\""
        );
    }

    #[test]
    fn test_broker_errors_map_to_specific_codes() {
        let rejected: DispatchError = BrokerError::Rejected("margin".into()).into();
        assert_eq!(rejected.code(), ErrorCode::OrderRejected);

        let timeout: DispatchError = BrokerError::Timeout(Duration::from_millis(250)).into();
        assert_eq!(timeout.code(), ErrorCode::UpstreamTimeout);

        let other: DispatchError = BrokerError::Other(anyhow::anyhow!("boom")).into();
        assert_eq!(other.code(), ErrorCode::Unknown);
    }

    #[test]
    fn test_breaker_rejection_maps_to_circuit_open() {
        let err: DispatchError = CircuitBreakerError::<BrokerError>::Open {
            name: "EURUSD".into(),
            retry_after: Some(Duration::from_secs(3)),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::CircuitOpen);
        assert!(err.to_string().contains("EURUSD"));
    }

    #[test]
    fn test_rejections_do_not_count_as_breaker_failures() {
        assert!(!BrokerError::Rejected("x".into()).counts_as_failure());
        assert!(BrokerError::Transport("x".into()).counts_as_failure());
    }
}
