//! Snapshot Service
//!
//! Periodic, write-only state snapshots for crash recovery.
//! Snapshots are written:
//! - On a regular interval (`snapshot.interval_secs`)
//! - Once more on shutdown

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::coordination::{CircuitBreakerRegistry, CircuitBreakerStats, CircuitState};
use crate::domain::AccountState;
use crate::error::Result;
use crate::risk::{RiskLevel, RiskMonitor};

const SNAPSHOT_PREFIX: &str = "snapshot-";
const SNAPSHOT_EXT: &str = ".json";

/// Snapshot data structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub account: Option<AccountState>,
    pub risk_level: RiskLevel,
    pub kill_switch: CircuitState,
    pub breakers: Vec<CircuitBreakerStats>,
}

impl Snapshot {
    pub fn capture(risk: &RiskMonitor, breakers: &CircuitBreakerRegistry) -> Self {
        Self {
            taken_at: Utc::now(),
            account: risk.latest_state().map(|s| (*s).clone()),
            risk_level: risk.current_level(),
            kill_switch: breakers.kill_switch().state(),
            breakers: breakers.snapshot(),
        }
    }
}

/// Receiver of snapshots. Write-only from the core's point of view.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn write(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Writes each snapshot as its own JSON file and keeps the newest
/// `max_snapshots`.
///
/// Files are written to a temp name and renamed into place, so a crash
/// mid-write never leaves a truncated snapshot under the final name.
#[derive(Debug)]
pub struct JsonFileSnapshotSink {
    dir: PathBuf,
    max_snapshots: usize,
    seq: AtomicU64,
}

impl JsonFileSnapshotSink {
    pub fn new(dir: impl Into<PathBuf>, max_snapshots: usize) -> Self {
        Self {
            dir: dir.into(),
            max_snapshots: max_snapshots.max(1),
            seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot files, oldest first
    pub async fn list(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(SNAPSHOT_EXT) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Newest snapshot on disk, for recovery tooling
    pub async fn latest(&self) -> Result<Option<Snapshot>> {
        let Some(path) = self.list().await?.pop() else {
            return Ok(None);
        };
        let raw = tokio::fs::read(&path).await?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    async fn prune(&self) -> Result<usize> {
        let files = self.list().await?;
        let excess = files.len().saturating_sub(self.max_snapshots);
        for path in &files[..excess] {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(path = %path.display(), error = %e, "Failed to prune snapshot");
            }
        }
        Ok(excess)
    }
}

#[async_trait]
impl SnapshotSink for JsonFileSnapshotSink {
    async fn write(&self, snapshot: &Snapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{}{:020}-{:06}{}",
            SNAPSHOT_PREFIX,
            snapshot.taken_at.timestamp_micros(),
            seq,
            SNAPSHOT_EXT
        );
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!(".{}.tmp", name));

        let body = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        let pruned = self.prune().await?;
        debug!(path = %path.display(), pruned, "Snapshot written");
        Ok(())
    }
}

/// Periodic snapshot task
pub struct SnapshotService {
    interval: Duration,
    sink: Arc<dyn SnapshotSink>,
    risk: Arc<RiskMonitor>,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl SnapshotService {
    pub fn new(
        interval: Duration,
        sink: Arc<dyn SnapshotSink>,
        risk: Arc<RiskMonitor>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            interval,
            sink,
            risk,
            breakers,
        }
    }

    /// Capture and write one snapshot now
    pub async fn snapshot_now(&self) -> Result<()> {
        let snapshot = Snapshot::capture(&self.risk, &self.breakers);
        self.sink.write(&snapshot).await
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped),
    /// then write a final snapshot.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                "Snapshot service started"
            );
            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Err(e) = self.snapshot_now().await {
                            error!(error = %e, "Failed to write snapshot");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            if let Err(e) = self.snapshot_now().await {
                error!(error = %e, "Failed to write shutdown snapshot");
            }
            info!("Snapshot service stopped");
        })
    }
}
