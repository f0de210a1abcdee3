// Ledger module - THE SOURCE OF TRUTH
// Client surface of the authoritative ledger, its event log, and a reference implementation

mod client;
mod event;
mod memory;

pub use client::{
    AppealView, LedgerCall, LedgerClient, LedgerError, LedgerQuery, LedgerValue, Receipt,
    RewardView, TaskView,
};
pub use event::{EventData, EventStream, LedgerEvent};
pub use memory::{InMemoryLedger, LedgerConfig};
