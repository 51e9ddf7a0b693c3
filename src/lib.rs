pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod guard;
pub mod persistence;
pub mod platform;
pub mod risk;
pub mod services;
pub mod simulation;
pub mod validation;

pub use config::{AppConfig, DispatcherConfig, KillSwitchMode, RiskConfig, TrackConfig};
pub use coordination::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, ManualClock,
    ResetMode, KILL_SWITCH,
};
pub use domain::{AccountState, AssetType, ExecutionReceipt, Order, OrderSide, SymbolMap};
pub use error::{
    AdmissionError, BrokerError, CircuitBreakerError, DispatchError, ErrorCode, GuardError,
    Result, RiskError,
};
pub use exchange::{OrderExecutor, PaperExecutor, PaperFault};
pub use guard::TradeGuard;
pub use persistence::{JsonFileSnapshotSink, Snapshot, SnapshotService, SnapshotSink};
pub use platform::{Dispatcher, DispatcherStats, GlobalAdmissionLimiter, OrderResult, TradeTrack};
pub use risk::{Confidence, RiskAssessment, RiskLevel, RiskMonitor};
pub use services::{DispatchMetrics, MetricsSink};
