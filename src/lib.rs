// Ledger Mirror - Keeps a queryable mirror consistent with an authoritative ledger
//
// Every state change is one signed ledger call. Once its receipt is final the
// change is committed; mirror writes follow as idempotent upserts, and any
// that fail are repaired by replaying the ledger's event log.

pub mod artifact;
pub mod ledger;
pub mod model;
pub mod reconcile;
pub mod service;
pub mod storage;
