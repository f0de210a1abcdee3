// Reconcile module - LEDGER TO MIRROR
// Commit-then-mirror operations, desync tracking, and event-log resync

mod derive;
mod desync;
mod operation;
mod record;
mod resync;

pub use derive::{created_id, derive_writes, expected_event, DeriveError};
pub use desync::{replay_points, DesyncQueue, MirrorDesync};
pub use operation::{
    OperationOutcome, ReconcileError, Reconciler, ReconcilerConfig, ReconcilerStats,
    StatsSnapshot,
};
pub use record::records_for_event;
pub use resync::{
    Drift, DriftReport, DriftSubject, RepairReport, Resync, ResyncConfig, ResyncError,
    ResyncReport, ResyncWorker,
};
