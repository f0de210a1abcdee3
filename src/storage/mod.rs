// Storage module - PERSISTENCE
// The mirror store: sled-backed projections of ledger state with idempotent upserts

mod query;
mod store;
mod write;

pub use query::{AppealQuery, TaskQuery};
pub use store::{MirrorStore, StorageStats, StoreError};
pub use write::{MirrorWrite, MirrorWriter, WriteOutcome};
