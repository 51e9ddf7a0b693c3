use config::{Config, Environment, File, FileFormat};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coordination::CircuitBreakerConfig;
use crate::domain::{AssetType, SymbolMap, SymbolRule};
use crate::error::{GuardError, Result};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub risk: RiskConfig,
    /// Defaults for every per-resource breaker
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

/// What clears the kill switch once risk falls back below HALT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillSwitchMode {
    /// Cleared by the risk monitor after the recovery cooldown
    Auto,
    /// Cleared only by an operator
    Manual,
}

impl std::fmt::Display for KillSwitchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillSwitchMode::Auto => write!(f, "auto"),
            KillSwitchMode::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskConfig {
    /// Drawdown fraction at which trading halts (e.g., 0.02 = 2%)
    pub max_daily_drawdown: Decimal,
    /// Drawdown fraction at which risk is elevated
    pub drawdown_warning: Decimal,
    /// Effective leverage at which trading halts
    pub max_account_leverage: Decimal,
    /// Effective leverage at which risk is elevated
    pub leverage_warning: Decimal,
    /// Seconds the level must stay lower before a WARNING/HALT is lifted
    pub recovery_cooldown_seconds: u64,
    pub kill_switch_mode: KillSwitchMode,
    /// Ticks ignored after start or session reset
    #[serde(default)]
    pub warmup_ticks: u32,
    /// Evaluations slower than this are logged
    #[serde(default = "default_latency_budget_ms")]
    pub latency_budget_ms: u64,
}

fn default_latency_budget_ms() -> u64 {
    10
}

impl RiskConfig {
    pub fn recovery_cooldown(&self) -> Duration {
        Duration::from_secs(self.recovery_cooldown_seconds)
    }

    pub fn latency_budget(&self) -> Duration {
        Duration::from_millis(self.latency_budget_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.drawdown_warning <= Decimal::ZERO {
            errors.push("risk.drawdown_warning must be positive".to_string());
        }
        if self.max_daily_drawdown > Decimal::ONE {
            errors.push(format!(
                "risk.max_daily_drawdown must not exceed 1.0, got {}",
                self.max_daily_drawdown
            ));
        }
        if self.drawdown_warning >= self.max_daily_drawdown {
            errors.push(format!(
                "risk.drawdown_warning ({}) must be less than risk.max_daily_drawdown ({})",
                self.drawdown_warning, self.max_daily_drawdown
            ));
        }
        if self.leverage_warning <= Decimal::ZERO {
            errors.push("risk.leverage_warning must be positive".to_string());
        }
        if self.leverage_warning >= self.max_account_leverage {
            errors.push(format!(
                "risk.leverage_warning ({}) must be less than risk.max_account_leverage ({})",
                self.leverage_warning, self.max_account_leverage
            ));
        }
        if self.latency_budget_ms == 0 {
            errors.push("risk.latency_budget_ms must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackConfig {
    pub track_id: String,
    pub asset_type: AssetType,
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Hard ceiling on in-flight orders across all tracks
    pub global_max_concurrent: usize,
    pub tracks: Vec<TrackConfig>,
    /// How long a dispatch may wait for admission slots (0 = fail immediately)
    #[serde(default = "default_admission_timeout_ms")]
    pub admission_timeout_ms: u64,
    /// Bound on each broker call
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
    /// Prefix table mapping symbols to asset types
    #[serde(default = "SymbolMap::default_rules")]
    pub symbol_map: Vec<SymbolRule>,
}

fn default_admission_timeout_ms() -> u64 {
    50
}

fn default_execution_timeout_ms() -> u64 {
    5_000
}

/// Upper bound accepted for dispatcher timeouts (one hour)
pub const MAX_TIMEOUT_MS: u64 = 3_600_000;

impl DispatcherConfig {
    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn track_capacity(&self) -> usize {
        self.tracks.iter().map(|t| t.max_concurrent).sum()
    }

    /// Warning text when the tracks together could exceed the global ceiling.
    /// The ceiling is never raised to match.
    pub fn capacity_warning(&self) -> Option<String> {
        let total = self.track_capacity();
        (total > self.global_max_concurrent).then(|| {
            format!(
                "sum of track max_concurrent ({}) exceeds global_max_concurrent ({}); \
                 global ceiling stays at {}",
                total, self.global_max_concurrent, self.global_max_concurrent
            )
        })
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.global_max_concurrent == 0 {
            errors.push("dispatcher.global_max_concurrent must be at least 1".to_string());
        }
        if self.tracks.is_empty() {
            errors.push("dispatcher.tracks must define at least one track".to_string());
        }
        if self.execution_timeout_ms == 0 {
            errors.push("dispatcher.execution_timeout_ms must be positive".to_string());
        }
        for (key, value) in [
            ("admission_timeout_ms", self.admission_timeout_ms),
            ("execution_timeout_ms", self.execution_timeout_ms),
        ] {
            if value > MAX_TIMEOUT_MS {
                errors.push(format!(
                    "dispatcher.{} ({}) exceeds the maximum of {}",
                    key, value, MAX_TIMEOUT_MS
                ));
            }
        }

        let mut ids = HashSet::new();
        let mut assets = HashSet::new();
        for track in &self.tracks {
            if track.track_id.trim().is_empty() {
                errors.push("dispatcher.tracks: track_id cannot be empty".to_string());
            }
            if track.max_concurrent == 0 {
                errors.push(format!(
                    "dispatcher.tracks[{}].max_concurrent must be at least 1",
                    track.track_id
                ));
            }
            if !ids.insert(track.track_id.as_str()) {
                errors.push(format!("dispatcher.tracks: duplicate track_id '{}'", track.track_id));
            }
            if !assets.insert(track.asset_type) {
                errors.push(format!(
                    "dispatcher.tracks: asset type '{}' is served by more than one track",
                    track.asset_type
                ));
            }
        }

        for rule in &self.symbol_map {
            if rule.prefix.trim().is_empty() {
                errors.push("dispatcher.symbol_map: prefix cannot be empty".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    pub interval_secs: u64,
    /// Snapshot files kept on disk
    pub max_snapshots: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("snapshots"),
            interval_secs: 60,
            max_snapshots: 20,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("TRADEGUARD_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (TRADEGUARD_RISK__MAX_DAILY_DRAWDOWN, etc.)
            .add_source(env_source(std::env::vars()));

        Self::finish(builder.build()?)
    }

    /// Load configuration from one file, with environment overrides
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_file_with_env(path, std::env::vars())
    }

    /// Load one file with overrides taken from `vars` instead of the
    /// process environment. Only `TRADEGUARD_<SECTION>__<KEY>` entries apply.
    pub fn load_file_with_env<P, I>(path: P, vars: I) -> Result<Self>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = (String, String)>,
    {
        let builder = Config::builder()
            .add_source(File::from(path.as_ref()).required(true))
            .add_source(env_source(vars));

        Self::finish(builder.build()?)
    }

    /// Parse TOML text without environment overrides
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?;

        Self::finish(config)
    }

    fn finish(config: Config) -> Result<Self> {
        let app: AppConfig = config.try_deserialize()?;
        app.validate().map_err(GuardError::InvalidConfig)?;
        Ok(app)
    }

    /// Validate configuration values, collecting every problem
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for section in [
            self.risk.validate(),
            self.circuit_breaker.validate(),
            self.dispatcher.validate(),
        ] {
            if let Err(mut e) = section {
                errors.append(&mut e);
            }
        }

        if self.snapshot.enabled {
            if self.snapshot.interval_secs == 0 {
                errors.push("snapshot.interval_secs must be positive".to_string());
            }
            if self.snapshot.max_snapshots == 0 {
                errors.push("snapshot.max_snapshots must be at least 1".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Create a default configuration for CLI usage
    pub fn default_config() -> Self {
        use rust_decimal_macros::dec;

        Self {
            risk: RiskConfig {
                max_daily_drawdown: dec!(0.02),
                drawdown_warning: dec!(0.01),
                max_account_leverage: dec!(5.0),
                leverage_warning: dec!(3.0),
                recovery_cooldown_seconds: 300,
                kill_switch_mode: KillSwitchMode::Auto,
                warmup_ticks: 0,
                latency_budget_ms: default_latency_budget_ms(),
            },
            circuit_breaker: CircuitBreakerConfig::default(),
            dispatcher: DispatcherConfig {
                global_max_concurrent: 10,
                tracks: vec![
                    TrackConfig {
                        track_id: "fx".to_string(),
                        asset_type: AssetType::Forex,
                        max_concurrent: 4,
                    },
                    TrackConfig {
                        track_id: "metals".to_string(),
                        asset_type: AssetType::Metals,
                        max_concurrent: 3,
                    },
                    TrackConfig {
                        track_id: "crypto".to_string(),
                        asset_type: AssetType::Crypto,
                        max_concurrent: 3,
                    },
                ],
                admission_timeout_ms: default_admission_timeout_ms(),
                execution_timeout_ms: default_execution_timeout_ms(),
                symbol_map: SymbolMap::default_rules(),
            },
            logging: LoggingConfig::default(),
            snapshot: SnapshotConfig::default(),
        }
    }
}

const ENV_PREFIX: &str = "TRADEGUARD";

/// Overrides of the form `TRADEGUARD_RISK__RECOVERY_COOLDOWN_SECONDS`.
/// Variables without a section separator (`TRADEGUARD_ENV`,
/// `TRADEGUARD_CONFIG`) select files and are not config keys.
fn env_source<I>(vars: I) -> Environment
where
    I: IntoIterator<Item = (String, String)>,
{
    let overrides: config::Map<String, String> = vars
        .into_iter()
        .filter(|(key, _)| {
            key.strip_prefix(ENV_PREFIX)
                .and_then(|rest| rest.strip_prefix('_'))
                .is_some_and(|rest| rest.contains("__"))
        })
        .collect();

    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .source(Some(overrides))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"
        [risk]
        max_daily_drawdown = "0.02"
        drawdown_warning = "0.01"
        max_account_leverage = "5.0"
        leverage_warning = "3.0"
        recovery_cooldown_seconds = 60
        kill_switch_mode = "manual"

        [dispatcher]
        global_max_concurrent = 10

        [[dispatcher.tracks]]
        track_id = "fx"
        asset_type = "forex"
        max_concurrent = 4

        [[dispatcher.tracks]]
        track_id = "metals"
        asset_type = "metals"
        max_concurrent = 2
    "#;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default_config().validate().is_ok());
    }

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.risk.max_daily_drawdown, dec!(0.02));
        assert_eq!(config.risk.kill_switch_mode, KillSwitchMode::Manual);
        assert_eq!(config.dispatcher.tracks.len(), 2);
        assert_eq!(config.dispatcher.execution_timeout_ms, 5_000);
        assert_eq!(config.circuit_breaker, CircuitBreakerConfig::default());
        assert!(!config.dispatcher.symbol_map.is_empty());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let raw = SAMPLE.replace("[dispatcher]", "[dispatcher]\nauto_grow_global = true");
        let err = AppConfig::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, GuardError::Config(_)), "got {err:?}");
    }

    #[test]
    fn test_soft_threshold_must_be_below_hard() {
        let raw = SAMPLE.replace(r#"drawdown_warning = "0.01""#, r#"drawdown_warning = "0.02""#);
        match AppConfig::from_toml_str(&raw) {
            Err(GuardError::InvalidConfig(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("drawdown_warning"));
            }
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_capacity_warning_keeps_ceiling() {
        let mut config = AppConfig::default_config().dispatcher;
        config.global_max_concurrent = 10;
        for track in &mut config.tracks {
            track.max_concurrent = 10;
        }
        assert!(config.validate().is_ok());
        let warning = config.capacity_warning().unwrap();
        assert!(warning.contains("(30)"));
        assert_eq!(config.global_max_concurrent, 10);
    }

    #[test]
    fn test_duplicate_tracks_rejected() {
        let mut config = AppConfig::default_config().dispatcher;
        config.tracks[1].asset_type = AssetType::Forex;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("more than one track")));
    }

    #[test]
    fn test_timeouts_are_bounded() {
        let mut config = AppConfig::default_config().dispatcher;
        config.admission_timeout_ms = u64::MAX;
        config.execution_timeout_ms = MAX_TIMEOUT_MS + 1;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("admission_timeout_ms")));
        assert!(errors.iter().any(|e| e.contains("execution_timeout_ms")));

        config.admission_timeout_ms = MAX_TIMEOUT_MS;
        config.execution_timeout_ms = MAX_TIMEOUT_MS;
        assert!(config.validate().is_ok());
    }
}
