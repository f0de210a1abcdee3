// Desync Queue - Committed ledger changes the mirror failed to record
//
// Producers are live operations; the consumer is the resync worker. The
// queue only says which streams need replay and from where; resync derives
// the actual records from the event log.

use crate::ledger::EventStream;
use crate::model::{BlockNumber, TxHash};
use crate::storage::MirrorWrite;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// A committed ledger change whose mirror write did not land
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorDesync {
    pub stream: EventStream,
    pub tx_hash: TxHash,
    pub block_number: BlockNumber,
    /// The write that failed, if derivation got that far
    pub write: Option<MirrorWrite>,
    pub reason: String,
}

/// Shared queue of pending desyncs
#[derive(Clone, Default)]
pub struct DesyncQueue {
    pending: Arc<Mutex<Vec<MirrorDesync>>>,
    notify: Arc<Notify>,
}

impl DesyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MirrorDesync>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a desync and wake the worker
    pub fn push(&self, desync: MirrorDesync) {
        self.lock().push(desync);
        self.notify.notify_one();
    }

    /// Take everything queued so far
    pub fn drain(&self) -> Vec<MirrorDesync> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Wait until something is pushed
    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

/// Earliest failed block per stream
pub fn replay_points(desyncs: &[MirrorDesync]) -> Vec<(EventStream, BlockNumber)> {
    let mut points: Vec<(EventStream, BlockNumber)> = Vec::new();
    for d in desyncs {
        match points.iter_mut().find(|(s, _)| *s == d.stream) {
            Some((_, block)) => *block = (*block).min(d.block_number),
            None => points.push((d.stream, d.block_number)),
        }
    }
    points
}
