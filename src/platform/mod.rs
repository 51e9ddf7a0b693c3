//! Order admission and dispatch

pub mod admission;
pub mod dispatcher;

pub use admission::{
    admit_within, try_admit, AdmissionPermit, GlobalAdmissionLimiter, SlotStats, TradeTrack,
};
pub use dispatcher::{Dispatcher, DispatcherStats, OrderResult};
