// Reconciled Operation - One ledger call followed by its mirror writes
//
// Flow for every state change:
// 1. Submit the call and wait for a final receipt
// 2. A rejected or reverted call ends here with nothing written
// 3. Derive mirror writes from the receipt
// 4. Apply each write independently, retrying transient failures
// 5. A write that still fails becomes a desync for resync to repair
//
// Steps 1-5 run on their own task, so a caller that stops waiting after
// submission does not stop the mirror from being written.

use crate::ledger::{EventStream, LedgerCall, LedgerClient, LedgerError, Receipt};
use crate::model::{
    Address, Appeal, AppealId, EntityKind, Reward, RewardId, Task, TaskId, TxHash,
};
use crate::reconcile::derive::{created_id, derive_writes, DeriveError};
use crate::reconcile::desync::{DesyncQueue, MirrorDesync};
use crate::reconcile::resync::{Resync, ResyncConfig, ResyncError};
use crate::artifact::UploadError;
use crate::storage::{MirrorStore, MirrorWrite, MirrorWriter, StoreError, WriteOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors surfaced to callers of a reconciled operation
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The ledger refused the call; nothing changed anywhere
    #[error("Ledger rejected {method}: {reason}")]
    LedgerRejected { method: &'static str, reason: String },

    #[error("Upload failed before submission: {0}")]
    Upload(#[from] UploadError),

    #[error("No {kind} #{id} on the ledger")]
    NotFound { kind: EntityKind, id: u64 },

    #[error("{0} is not an admin")]
    Unauthorized(Address),

    #[error("{0} is sold out")]
    SoldOut(RewardId),

    #[error("Insufficient points: have {available}, need {required}")]
    InsufficientBalance { available: i64, required: u64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Mirror read failed: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger read failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Resync(#[from] ResyncError),

    #[error("Operation task aborted: {0}")]
    Aborted(String),
}

impl ReconcileError {
    /// Whether the ledger may have changed state.
    /// Only `Aborted` is ambiguous; every other error is raised before or
    /// instead of a committed call.
    pub fn may_have_committed(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

// ============================================================================
// CONFIG
// ============================================================================

/// Configuration for the reconciler
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Attempts per mirror write before it becomes a desync
    pub write_attempts: u32,
    /// Delay between write attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Run a resync pass when a mutation targets an id the mirror lacks
    pub resync_on_missing: bool,
}

impl ReconcilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_attempts(mut self, attempts: u32) -> Self {
        self.write_attempts = attempts;
        self
    }

    pub fn with_retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }

    pub fn with_resync_on_missing(mut self, enabled: bool) -> Self {
        self.resync_on_missing = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ReconcileError> {
        if self.write_attempts == 0 {
            return Err(ReconcileError::InvalidInput(
                "write_attempts must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            write_attempts: 3,
            retry_delay_ms: 50,
            resync_on_missing: true,
        }
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Counters across all operations of a reconciler
#[derive(Debug, Default)]
pub struct ReconcilerStats {
    submitted: AtomicU64,
    rejected: AtomicU64,
    committed: AtomicU64,
    writes_applied: AtomicU64,
    writes_skipped: AtomicU64,
    desyncs: AtomicU64,
}

/// Point-in-time copy of [`ReconcilerStats`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub rejected: u64,
    pub committed: u64,
    pub writes_applied: u64,
    pub writes_skipped: u64,
    pub desyncs: u64,
}

impl ReconcilerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            writes_applied: self.writes_applied.load(Ordering::Relaxed),
            writes_skipped: self.writes_skipped.load(Ordering::Relaxed),
            desyncs: self.desyncs.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// OUTCOME
// ============================================================================

/// Result of a committed operation.
///
/// The ledger change is final. `desyncs` lists mirror writes that did not
/// land; they are already queued for resync.
#[derive(Clone, Debug)]
pub struct OperationOutcome {
    pub call: LedgerCall,
    pub receipt: Receipt,
    pub applied: Vec<(MirrorWrite, WriteOutcome)>,
    pub desyncs: Vec<MirrorDesync>,
}

impl OperationOutcome {
    pub fn tx_hash(&self) -> TxHash {
        self.receipt.tx_hash
    }

    pub fn is_fully_mirrored(&self) -> bool {
        self.desyncs.is_empty()
    }

    pub fn created_task_id(&self) -> Option<TaskId> {
        match self.call {
            LedgerCall::CreateTask { .. } => created_id(&self.receipt).map(TaskId),
            _ => None,
        }
    }

    pub fn created_reward_id(&self) -> Option<RewardId> {
        match self.call {
            LedgerCall::CreateReward { .. } => created_id(&self.receipt).map(RewardId),
            _ => None,
        }
    }

    pub fn created_appeal_id(&self) -> Option<AppealId> {
        match self.call {
            LedgerCall::CreateAppeal { .. } => created_id(&self.receipt).map(AppealId),
            _ => None,
        }
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

/// Runs reconciled operations against one ledger and one mirror
#[derive(Clone)]
pub struct Reconciler {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<MirrorStore>,
    writer: Arc<dyn MirrorWriter>,
    resync: Arc<Resync>,
    desyncs: DesyncQueue,
    config: ReconcilerConfig,
    stats: Arc<ReconcilerStats>,
}

impl Reconciler {
    pub fn new(ledger: Arc<dyn LedgerClient>, store: Arc<MirrorStore>) -> Self {
        let resync = Arc::new(Resync::new(
            ledger.clone(),
            store.clone(),
            ResyncConfig::default(),
        ));
        Self {
            writer: store.clone(),
            ledger,
            store,
            resync,
            desyncs: DesyncQueue::new(),
            config: ReconcilerConfig::default(),
            stats: Arc::new(ReconcilerStats::default()),
        }
    }

    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_resync_config(mut self, config: ResyncConfig) -> Self {
        self.resync = Arc::new(Resync::new(self.ledger.clone(), self.store.clone(), config));
        self
    }

    /// Route live mirror writes through another writer.
    /// Reads and resync keep using the store.
    pub fn with_writer(mut self, writer: Arc<dyn MirrorWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<MirrorStore> {
        &self.store
    }

    pub fn resync(&self) -> &Arc<Resync> {
        &self.resync
    }

    pub fn desyncs(&self) -> &DesyncQueue {
        &self.desyncs
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // ========================================================================
    // EXECUTION
    // ========================================================================

    /// Submit a call and mirror its receipt with the default derivation
    pub async fn execute(&self, call: LedgerCall, signer: &Address) -> Result<OperationOutcome, ReconcileError> {
        self.execute_with(call, signer, derive_writes).await
    }

    /// Submit a call and mirror its receipt with a custom derivation
    pub async fn execute_with<F>(
        &self,
        call: LedgerCall,
        signer: &Address,
        derive: F,
    ) -> Result<OperationOutcome, ReconcileError>
    where
        F: FnOnce(&LedgerCall, &Receipt) -> Result<Vec<MirrorWrite>, DeriveError> + Send + 'static,
    {
        let this = self.clone();
        let signer = signer.clone();
        let handle = tokio::spawn(async move { this.run(call, signer, derive).await });
        handle
            .await
            .map_err(|e| ReconcileError::Aborted(e.to_string()))?
    }

    async fn run<F>(&self, call: LedgerCall, signer: Address, derive: F) -> Result<OperationOutcome, ReconcileError>
    where
        F: FnOnce(&LedgerCall, &Receipt) -> Result<Vec<MirrorWrite>, DeriveError>,
    {
        let method = call.method();
        ReconcilerStats::bump(&self.stats.submitted);
        debug!(method, signer = %signer, "submitting ledger call");

        let receipt = match self.ledger.call(&call, &signer).await {
            Ok(receipt) => receipt,
            Err(e) => {
                ReconcilerStats::bump(&self.stats.rejected);
                warn!(method, error = %e, "ledger call not submitted");
                return Err(ReconcileError::LedgerRejected {
                    method,
                    reason: e.to_string(),
                });
            }
        };

        if !receipt.is_success() {
            ReconcilerStats::bump(&self.stats.rejected);
            let reason = receipt
                .revert_reason
                .clone()
                .unwrap_or_else(|| "reverted".to_string());
            warn!(method, tx = %receipt.tx_hash, reason = %reason, "ledger call reverted");
            return Err(ReconcileError::LedgerRejected { method, reason });
        }

        ReconcilerStats::bump(&self.stats.committed);
        info!(method, tx = %receipt.tx_hash, block = receipt.block_number, "ledger call committed");

        let mut outcome = OperationOutcome {
            call,
            receipt,
            applied: Vec::new(),
            desyncs: Vec::new(),
        };

        let writes = match derive(&outcome.call, &outcome.receipt) {
            Ok(writes) => writes,
            Err(e) => {
                let desync = self.desync(&outcome, None, e.to_string());
                outcome.desyncs.push(desync);
                return Ok(outcome);
            }
        };

        for write in writes {
            match self.apply_with_retry(&write).await {
                Ok(result) => {
                    if result.changed() {
                        ReconcilerStats::bump(&self.stats.writes_applied);
                    } else {
                        ReconcilerStats::bump(&self.stats.writes_skipped);
                    }
                    debug!(method, %write, ?result, "mirror write");
                    outcome.applied.push((write, result));
                }
                Err(e) => {
                    let desync = self.desync(&outcome, Some(write), e.to_string());
                    outcome.desyncs.push(desync);
                }
            }
        }

        Ok(outcome)
    }

    async fn apply_with_retry(&self, write: &MirrorWrite) -> Result<WriteOutcome, StoreError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.writer.apply(write) {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempts < self.config.write_attempts => {
                    debug!(%write, attempts, error = %e, "retrying mirror write");
                    if self.config.retry_delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn desync(&self, outcome: &OperationOutcome, write: Option<MirrorWrite>, reason: String) -> MirrorDesync {
        ReconcilerStats::bump(&self.stats.desyncs);
        let desync = MirrorDesync {
            stream: outcome.call.stream(),
            tx_hash: outcome.receipt.tx_hash,
            block_number: outcome.receipt.block_number,
            write,
            reason,
        };
        warn!(
            method = outcome.call.method(),
            tx = %desync.tx_hash,
            block = desync.block_number,
            reason = %desync.reason,
            "mirror desync queued for resync"
        );
        self.desyncs.push(desync.clone());
        desync
    }

    // ========================================================================
    // PRECONDITIONS
    // ========================================================================

    /// Fail locally unless the ledger lists `signer` as an admin
    pub async fn require_admin(&self, signer: &Address) -> Result<(), ReconcileError> {
        if self.ledger.is_admin(signer).await? {
            Ok(())
        } else {
            Err(ReconcileError::Unauthorized(signer.clone()))
        }
    }

    /// Resync `stream` once if the mirror lacks a record, then look again
    async fn lookup<T, F>(&self, stream: EventStream, kind: EntityKind, id: u64, read: F) -> Result<T, ReconcileError>
    where
        F: Fn(&MirrorStore) -> Result<Option<T>, StoreError>,
    {
        if let Some(found) = read(self.store.as_ref())? {
            return Ok(found);
        }
        if self.config.resync_on_missing {
            info!(%stream, %kind, id, "mirror miss, resyncing");
            self.resync.run(stream).await?;
            if let Some(found) = read(self.store.as_ref())? {
                return Ok(found);
            }
        }
        Err(ReconcileError::NotFound { kind, id })
    }

    pub async fn task(&self, id: TaskId) -> Result<Task, ReconcileError> {
        self.lookup(EventStream::Tasks, EntityKind::Task, id.0, |s| s.get_task(id))
            .await
    }

    pub async fn reward(&self, id: RewardId) -> Result<Reward, ReconcileError> {
        self.lookup(EventStream::Rewards, EntityKind::Reward, id.0, |s| s.get_reward(id))
            .await
    }

    pub async fn appeal(&self, id: AppealId) -> Result<Appeal, ReconcileError> {
        self.lookup(EventStream::Appeals, EntityKind::Appeal, id.0, |s| s.get_appeal(id))
            .await
    }
}
