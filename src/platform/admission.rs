//! Admission control: a global ceiling plus per-asset-class tracks.
//!
//! Each limiter owns its count behind its own mutex. A dispatch takes one
//! slot from the global limiter and one from its track in a single critical
//! section (global lock, then track lock) so availability is never checked
//! and consumed separately.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::config::{TrackConfig, MAX_TIMEOUT_MS};
use crate::domain::AssetType;
use crate::error::AdmissionError;

#[derive(Debug, Default)]
struct SlotCount {
    in_flight: usize,
    peak: usize,
    granted: u64,
    rejected: u64,
}

impl SlotCount {
    fn take(&mut self) {
        self.in_flight += 1;
        self.peak = self.peak.max(self.in_flight);
        self.granted += 1;
    }

    /// Returns `false` (and leaves the count alone) when nothing is held
    fn give_back(&mut self) -> bool {
        if self.in_flight == 0 {
            return false;
        }
        self.in_flight -= 1;
        true
    }
}

/// Counts for one limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStats {
    pub name: String,
    pub limit: usize,
    pub in_flight: usize,
    pub peak: usize,
    pub granted: u64,
    pub rejected: u64,
}

/// Bounds total in-flight operations against the shared downstream resource
#[derive(Debug)]
pub struct GlobalAdmissionLimiter {
    limit: usize,
    count: Mutex<SlotCount>,
    released: Notify,
}

impl GlobalAdmissionLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            count: Mutex::new(SlotCount::default()),
            released: Notify::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.count.lock().in_flight
    }

    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.in_flight())
    }

    /// Take one slot or fail without waiting
    pub fn try_acquire(&self) -> Result<(), AdmissionError> {
        let mut count = self.count.lock();
        if count.in_flight >= self.limit {
            count.rejected += 1;
            return Err(AdmissionError::GlobalExhausted { limit: self.limit });
        }
        count.take();
        Ok(())
    }

    /// Return one slot. Rejected (returns `false`) when nothing is held.
    pub fn release(&self) -> bool {
        let ok = self.count.lock().give_back();
        if ok {
            self.released.notify_waiters();
        } else {
            error!("Global admission release with no slot held; ignoring");
        }
        ok
    }

    pub fn stats(&self) -> SlotStats {
        let count = self.count.lock();
        SlotStats {
            name: "global".to_string(),
            limit: self.limit,
            in_flight: count.in_flight,
            peak: count.peak,
            granted: count.granted,
            rejected: count.rejected,
        }
    }
}

/// Per-asset-class concurrency limiter
#[derive(Debug)]
pub struct TradeTrack {
    track_id: String,
    asset_type: AssetType,
    max_concurrent: usize,
    count: Mutex<SlotCount>,
}

impl TradeTrack {
    pub fn new(track_id: impl Into<String>, asset_type: AssetType, max_concurrent: usize) -> Self {
        Self {
            track_id: track_id.into(),
            asset_type,
            max_concurrent,
            count: Mutex::new(SlotCount::default()),
        }
    }

    pub fn from_config(config: &TrackConfig) -> Self {
        Self::new(config.track_id.clone(), config.asset_type, config.max_concurrent)
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn current_count(&self) -> usize {
        self.count.lock().in_flight
    }

    pub fn stats(&self) -> SlotStats {
        let count = self.count.lock();
        SlotStats {
            name: self.track_id.clone(),
            limit: self.max_concurrent,
            in_flight: count.in_flight,
            peak: count.peak,
            granted: count.granted,
            rejected: count.rejected,
        }
    }
}

/// One global slot and one track slot, returned together on release or drop
#[derive(Debug)]
pub struct AdmissionPermit {
    global: Arc<GlobalAdmissionLimiter>,
    track: Arc<TradeTrack>,
    released: AtomicBool,
}

impl AdmissionPermit {
    pub fn track_id(&self) -> &str {
        self.track.track_id()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Give both slots back. Only the first call has any effect.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            debug!(track = %self.track.track_id, "Admission permit already released");
            return false;
        }
        let (global_ok, track_ok) = {
            let mut global = self.global.count.lock();
            let mut track = self.track.count.lock();
            (global.give_back(), track.give_back())
        };
        if !(global_ok && track_ok) {
            error!(
                track = %self.track.track_id,
                global_ok,
                track_ok,
                "Admission counts out of step on release"
            );
        }
        self.global.released.notify_waiters();
        global_ok && track_ok
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if !self.is_released() {
            self.release();
        }
    }
}

/// Take a global and a track slot in one critical section, or neither
pub fn try_admit(
    global: &Arc<GlobalAdmissionLimiter>,
    track: &Arc<TradeTrack>,
) -> Result<AdmissionPermit, AdmissionError> {
    let mut g = global.count.lock();
    let mut t = track.count.lock();

    if g.in_flight >= global.limit {
        g.rejected += 1;
        return Err(AdmissionError::GlobalExhausted {
            limit: global.limit,
        });
    }
    if t.in_flight >= track.max_concurrent {
        t.rejected += 1;
        return Err(AdmissionError::TrackExhausted {
            track: track.track_id.clone(),
            limit: track.max_concurrent,
        });
    }

    g.take();
    t.take();

    Ok(AdmissionPermit {
        global: global.clone(),
        track: track.clone(),
        released: AtomicBool::new(false),
    })
}

/// [`try_admit`], retried on every release until `timeout` passes.
/// A zero timeout fails on the first miss.
pub async fn admit_within(
    global: &Arc<GlobalAdmissionLimiter>,
    track: &Arc<TradeTrack>,
    timeout: Duration,
) -> Result<AdmissionPermit, AdmissionError> {
    if timeout.is_zero() {
        return try_admit(global, track);
    }

    let now = Instant::now();
    let deadline = now
        .checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_millis(MAX_TIMEOUT_MS));
    loop {
        let notified = global.released.notified();
        tokio::pin!(notified);
        // Register before trying so a release in between is not missed
        notified.as_mut().enable();

        let cause = match try_admit(global, track) {
            Ok(permit) => return Ok(permit),
            Err(e) => e,
        };

        if tokio::time::timeout_at(deadline, notified).await.is_err() {
            return Err(AdmissionError::TimedOut {
                waited_ms: timeout.as_millis() as u64,
                cause: cause.to_string(),
            });
        }
    }
}
