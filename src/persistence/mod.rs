//! Crash-recovery snapshots

pub mod snapshot;

pub use snapshot::{JsonFileSnapshotSink, Snapshot, SnapshotService, SnapshotSink};
