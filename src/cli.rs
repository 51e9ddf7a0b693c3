use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::Result;
use crate::persistence::JsonFileSnapshotSink;
use crate::simulation::{run_scenario, Scenario};

#[derive(Parser)]
#[command(name = "tradeguard")]
#[command(version = "0.1.0")]
#[command(about = "Risk monitor, kill switch and bounded order dispatcher", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (defaults to config/ directory layering)
    #[arg(short, long, global = true, env = "TRADEGUARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit JSON logs
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate configuration, then print the effective limits
    CheckConfig,
    /// Run a scripted scenario against the paper executor
    Simulate {
        #[arg(short, long, value_enum)]
        scenario: Scenario,
        /// Concurrent orders to fire
        #[arg(short, long, default_value = "20")]
        orders: usize,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the newest crash-recovery snapshot
    InspectSnapshot {
        /// Snapshot directory (defaults to snapshot.directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

/// Load configuration from `--config`, else from the `config/` directory,
/// else fall back to built-in defaults.
/// Where the running configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    File(PathBuf),
    Directory(PathBuf),
    BuiltIn,
}

pub fn load_config(path: Option<&Path>) -> Result<(AppConfig, ConfigOrigin)> {
    load_config_from(path, Path::new("config"))
}

fn load_config_from(path: Option<&Path>, config_dir: &Path) -> Result<(AppConfig, ConfigOrigin)> {
    match path {
        Some(path) => Ok((
            AppConfig::load_file(path)?,
            ConfigOrigin::File(path.to_path_buf()),
        )),
        None if config_dir.join("default.toml").exists() => Ok((
            AppConfig::load_from(config_dir)?,
            ConfigOrigin::Directory(config_dir.to_path_buf()),
        )),
        None => {
            let config = AppConfig::default_config();
            config
                .validate()
                .map_err(crate::error::GuardError::InvalidConfig)?;
            Ok((config, ConfigOrigin::BuiltIn))
        }
    }
}

/// Report the config origin once logging is up
pub fn log_config_origin(origin: &ConfigOrigin) {
    match origin {
        ConfigOrigin::File(path) => info!(path = %path.display(), "Configuration loaded"),
        ConfigOrigin::Directory(dir) => info!(dir = %dir.display(), "Configuration loaded"),
        ConfigOrigin::BuiltIn => warn!(
            "No --config given and config/default.toml not found; running on built-in defaults"
        ),
    }
}

pub fn check_config(config: &AppConfig) -> Result<()> {
    let risk = &config.risk;
    let dispatcher = &config.dispatcher;
    let breaker = &config.circuit_breaker;

    println!("\n=== Risk ===");
    println!(
        "  Drawdown:  warn {}  halt {}",
        risk.drawdown_warning, risk.max_daily_drawdown
    );
    println!(
        "  Leverage:  warn {}x  halt {}x",
        risk.leverage_warning, risk.max_account_leverage
    );
    println!(
        "  Recovery cooldown: {}s  kill switch: {}  warm-up ticks: {}",
        risk.recovery_cooldown_seconds, risk.kill_switch_mode, risk.warmup_ticks
    );

    println!("\n=== Circuit breakers ===");
    println!(
        "  Failures: {} consecutive or rate {} over >= {} calls (window {})",
        breaker.failure_threshold,
        breaker.failure_rate_threshold,
        breaker.min_calls_for_rate,
        breaker.rate_window_size
    );
    println!(
        "  Slow call: {}ms  open for: {}ms  half-open trials: {}  reset: {}",
        breaker.slow_call_duration_ms,
        breaker.open_duration_ms,
        breaker.half_open_max_calls,
        breaker.reset_mode
    );

    println!("\n=== Dispatcher ===");
    println!(
        "  Global ceiling: {}  admission wait: {}ms  execution timeout: {}ms",
        dispatcher.global_max_concurrent,
        dispatcher.admission_timeout_ms,
        dispatcher.execution_timeout_ms
    );
    for track in &dispatcher.tracks {
        println!(
            "  Track {:<10} {:<10} max {}",
            track.track_id, track.asset_type, track.max_concurrent
        );
    }
    if let Some(warning) = dispatcher.capacity_warning() {
        println!("\n  WARNING: {}", warning);
    }

    println!("\nConfiguration OK");
    Ok(())
}

pub async fn simulate(config: AppConfig, scenario: Scenario, orders: usize, json: bool) -> Result<()> {
    let report = run_scenario(config, scenario, orders).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n=== Scenario: {} ===", report.scenario);
    if let Some(assessment) = &report.assessment {
        println!(
            "  Risk level: {} (drawdown {}, leverage {})",
            report.level,
            assessment.drawdown.round_dp(4),
            assessment
                .effective_leverage
                .map(|l| format!("{}x", l.round_dp(2)))
                .unwrap_or_else(|| "n/a".to_string())
        );
    }
    println!(
        "  Orders: {} submitted, {} succeeded",
        report.submitted, report.succeeded
    );
    for (code, count) in &report.failures {
        println!("    {:<22} {}", code, count);
    }
    println!(
        "  Peak concurrency: global {}/{}  broker {}",
        report.dispatcher.global.peak, report.dispatcher.global.limit, report.broker_peak_in_flight
    );
    for track in &report.dispatcher.tracks {
        println!("    track {:<10} peak {}/{}", track.name, track.peak, track.limit);
    }
    println!("  Metrics: {}", report.metrics);
    Ok(())
}

pub async fn inspect_snapshot(config: &AppConfig, dir: Option<PathBuf>) -> Result<()> {
    let dir = dir.unwrap_or_else(|| config.snapshot.directory.clone());
    let sink = JsonFileSnapshotSink::new(&dir, config.snapshot.max_snapshots);

    match sink.latest().await? {
        Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        None => info!(dir = %dir.display(), "No snapshots found"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::try_parse_from([
            "tradeguard",
            "simulate",
            "--scenario",
            "flash-crash",
            "--orders",
            "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Simulate {
                scenario, orders, ..
            } => {
                assert_eq!(scenario, Scenario::FlashCrash);
                assert_eq!(orders, 5);
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_scenario() {
        assert!(Cli::try_parse_from(["tradeguard", "simulate", "--scenario", "meltdown"]).is_err());
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(load_config(Some(Path::new("/nonexistent/tradeguard.toml"))).is_err());
    }

    #[test]
    fn test_missing_config_dir_falls_back_to_built_in() {
        let dir = std::env::temp_dir().join(format!("tradeguard-empty-{}", uuid::Uuid::new_v4()));
        let (config, origin) = load_config_from(None, &dir).unwrap();
        assert_eq!(origin, ConfigOrigin::BuiltIn);
        assert_eq!(config, AppConfig::default_config());
    }

    #[test]
    fn test_config_dir_with_defaults_is_used() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("config");
        let (config, origin) = load_config_from(None, &dir).unwrap();
        assert_eq!(origin, ConfigOrigin::Directory(dir));
        assert_eq!(config.risk.kill_switch_mode, crate::config::KillSwitchMode::Manual);
    }
}
