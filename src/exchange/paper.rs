//! In-process executor with scripted latency and faults

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

use super::traits::OrderExecutor;
use crate::domain::{ExecutionReceipt, Order};
use crate::error::BrokerError;

/// Failure injected into paper submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperFault {
    None,
    /// Connection-level failure
    Transport,
    /// Business rejection
    Reject,
    /// Never answers
    Hang,
}

/// Fills every order after a fixed latency unless a fault is scripted.
#[derive(Debug)]
pub struct PaperExecutor {
    latency: Mutex<Duration>,
    fault: Mutex<PaperFault>,
    /// Fail every Nth call with a transport error
    fail_every: Option<u64>,
    calls: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl PaperExecutor {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency: Mutex::new(latency),
            fault: Mutex::new(PaperFault::None),
            fail_every: None,
            calls: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_fail_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn set_fault(&self, fault: PaperFault) {
        *self.fault.lock() = fault;
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Highest number of submissions seen running at once
    /// Calls currently inside `submit_order`
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Acquire)
    }
}

impl Default for PaperExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(5))
    }
}

#[async_trait]
impl OrderExecutor for PaperExecutor {
    async fn submit_order(&self, order: &Order) -> Result<ExecutionReceipt, BrokerError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        let _guard = InFlight(&self.in_flight);

        let latency = *self.latency.lock();
        let fault = *self.fault.lock();

        match fault {
            PaperFault::Hang => std::future::pending::<()>().await,
            _ => tokio::time::sleep(latency).await,
        }

        if fault == PaperFault::Transport || self.fail_every.is_some_and(|n| call % n == 0) {
            debug!(order_id = %order.order_id, call, "Paper executor transport failure");
            return Err(BrokerError::Transport(format!(
                "paper venue unreachable (call {})",
                call
            )));
        }
        if fault == PaperFault::Reject {
            return Err(BrokerError::Rejected(format!(
                "paper venue rejected {} {}",
                order.side, order.symbol
            )));
        }

        Ok(ExecutionReceipt {
            order_id: order.order_id.clone(),
            broker_order_id: format!("paper-{}", call),
            filled_quantity: order.quantity,
            avg_price: None,
            executed_at: Utc::now(),
        })
    }
}
