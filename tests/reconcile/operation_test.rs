// Reconciled Operation Tests
// Tests for commit-then-mirror, rejection handling, desyncs and cancellation

use ledger_mirror::ledger::{
    InMemoryLedger, LedgerCall, LedgerClient, LedgerConfig, LedgerQuery, LedgerValue,
};
use ledger_mirror::model::{Address, EntityKind, RewardId, TaskChange, TaskId, TaskStatus};
use ledger_mirror::reconcile::{DeriveError, ReconcileError, Reconciler, ReconcilerConfig};
use ledger_mirror::storage::{MirrorStore, MirrorWrite, MirrorWriter, StoreError, WriteOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn admin() -> Address {
    Address::parse("0xad").unwrap()
}

fn member() -> Address {
    Address::parse("0xaaa").unwrap()
}

fn create_task() -> LedgerCall {
    LedgerCall::CreateTask {
        title: "Sweep".to_string(),
        description: "Hall".to_string(),
        points: 10,
        deadline: 0,
    }
}

/// Store writer that fails matching writes with a transient error
struct FlakyWriter {
    store: Arc<MirrorStore>,
    matches: fn(&MirrorWrite) -> bool,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyWriter {
    fn new(store: Arc<MirrorStore>, matches: fn(&MirrorWrite) -> bool, failures: usize) -> Self {
        Self {
            store,
            matches,
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl MirrorWriter for FlakyWriter {
    fn apply(&self, write: &MirrorWrite) -> Result<WriteOutcome, StoreError> {
        if (self.matches)(write) {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::DatabaseError("disk full".to_string()));
            }
        }
        self.store.apply(write)
    }
}

fn is_task_patch(write: &MirrorWrite) -> bool {
    matches!(write, MirrorWrite::PatchTask { .. })
}

struct Env {
    _dir: TempDir,
    ledger: Arc<InMemoryLedger>,
    store: Arc<MirrorStore>,
    reconciler: Reconciler,
}

fn setup_with(ledger_config: LedgerConfig) -> Env {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MirrorStore::open(dir.path()).unwrap());
    let ledger = Arc::new(InMemoryLedger::with_config(admin(), ledger_config));
    let reconciler = Reconciler::new(ledger.clone(), store.clone())
        .with_config(ReconcilerConfig::new().with_retry_delay_ms(0));
    Env {
        _dir: dir,
        ledger,
        store,
        reconciler,
    }
}

fn setup() -> Env {
    setup_with(LedgerConfig::default())
}

// ============================================================================
// CONFIG
// ============================================================================

#[test]
fn test_config_validation() {
    assert!(ReconcilerConfig::default().validate().is_ok());
    assert!(ReconcilerConfig::new()
        .with_write_attempts(0)
        .validate()
        .is_err());
}

// ============================================================================
// COMMIT THEN MIRROR
// ============================================================================

#[tokio::test]
async fn test_committed_call_is_mirrored() {
    let env = setup();
    let outcome = env.reconciler.execute(create_task(), &admin()).await.unwrap();

    assert!(outcome.is_fully_mirrored());
    assert_eq!(outcome.created_task_id(), Some(TaskId(0)));
    assert_eq!(outcome.created_reward_id(), None);
    assert_eq!(outcome.applied.len(), 1);
    assert_eq!(outcome.applied[0].1, WriteOutcome::Applied);

    let task = env.store.get_task(TaskId(0)).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Created);
    assert_eq!(task.stamp.tx_hash, outcome.tx_hash());

    let stats = env.reconciler.stats();
    assert_eq!((stats.submitted, stats.committed, stats.writes_applied), (1, 1, 1));
}

#[tokio::test]
async fn test_revert_is_surfaced_and_nothing_written() {
    let env = setup();
    let err = env
        .reconciler
        .execute(create_task(), &member())
        .await
        .unwrap_err();

    match &err {
        ReconcileError::LedgerRejected { method, reason } => {
            assert_eq!(*method, "createTask");
            assert_eq!(reason, "caller is not an admin");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!err.may_have_committed());
    assert!(env.store.is_empty().unwrap());
    assert_eq!(env.reconciler.stats().rejected, 1);
    assert!(env.reconciler.desyncs().is_empty());
}

#[tokio::test]
async fn test_signing_rejection_writes_nothing() {
    let env = setup();
    env.ledger.reject_next_call("user denied transaction signature");

    let err = env
        .reconciler
        .execute(create_task(), &admin())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::LedgerRejected { .. }));
    assert!(err.to_string().contains("user denied"));
    assert!(env.store.is_empty().unwrap());
    assert_eq!(env.ledger.head_block().await.unwrap(), 0);
}

// ============================================================================
// DESYNCS AND RETRIES
// ============================================================================

#[tokio::test]
async fn test_failed_write_becomes_desync() {
    let env = setup();
    let writer = Arc::new(FlakyWriter::new(env.store.clone(), is_task_patch, usize::MAX));
    let reconciler = env.reconciler.clone().with_writer(writer.clone());

    reconciler.execute(create_task(), &admin()).await.unwrap();
    let outcome = reconciler
        .execute(LedgerCall::AssignTask { task_id: TaskId(0) }, &member())
        .await
        .unwrap();

    // The ledger change stands
    assert_eq!(outcome.desyncs.len(), 1);
    assert!(!outcome.is_fully_mirrored());
    let view = env
        .ledger
        .query(&LedgerQuery::Task(TaskId(0)))
        .await
        .unwrap()
        .into_task()
        .unwrap()
        .unwrap();
    assert_eq!(view.status, TaskStatus::Assigned);

    // The mirror lags and the gap is queued
    let mirrored = env.store.get_task(TaskId(0)).unwrap().unwrap();
    assert_eq!(mirrored.status, TaskStatus::Created);
    assert_eq!(reconciler.desyncs().len(), 1);
    assert_eq!(outcome.desyncs[0].block_number, outcome.receipt.block_number);
    assert_eq!(writer.attempts(), 3);
    assert_eq!(reconciler.stats().desyncs, 1);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let env = setup();
    let writer = Arc::new(FlakyWriter::new(env.store.clone(), is_task_patch, 2));
    let reconciler = env.reconciler.clone().with_writer(writer.clone());

    reconciler.execute(create_task(), &admin()).await.unwrap();
    let outcome = reconciler
        .execute(LedgerCall::AssignTask { task_id: TaskId(0) }, &member())
        .await
        .unwrap();

    assert!(outcome.is_fully_mirrored());
    assert_eq!(writer.attempts(), 3);
    assert_eq!(
        env.store.get_task(TaskId(0)).unwrap().unwrap().assignee,
        Some(member())
    );
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let env = setup();
    let writer = Arc::new(FlakyWriter::new(env.store.clone(), is_task_patch, 0));
    let reconciler = env.reconciler.clone().with_writer(writer.clone());
    reconciler.execute(create_task(), &admin()).await.unwrap();

    // Derive a change the mirrored task cannot take
    let outcome = reconciler
        .execute_with(
            LedgerCall::AssignTask { task_id: TaskId(0) },
            &member(),
            |_, receipt| {
                Ok(vec![MirrorWrite::PatchTask {
                    task_id: TaskId(0),
                    change: TaskChange::Completed,
                    stamp: receipt.events[0].stamp,
                }])
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.desyncs.len(), 1);
    assert!(outcome.desyncs[0].write.is_some());
    assert_eq!(writer.attempts(), 1);
}

#[tokio::test]
async fn test_derive_failure_becomes_desync() {
    let env = setup();
    let outcome = env
        .reconciler
        .execute_with(create_task(), &admin(), |call, _| {
            Err(DeriveError::MissingEvent {
                method: call.method(),
                expected: "TaskCreated",
            })
        })
        .await
        .unwrap();

    assert!(outcome.applied.is_empty());
    assert_eq!(outcome.desyncs.len(), 1);
    assert!(outcome.desyncs[0].write.is_none());
    assert!(outcome.desyncs[0].reason.contains("TaskCreated"));
    assert!(env.store.get_task(TaskId(0)).unwrap().is_none());
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[tokio::test]
async fn test_caller_timeout_does_not_stop_mirror_write() {
    let env = setup_with(LedgerConfig::new().with_latency_ms(60));

    let result = tokio::time::timeout(
        Duration::from_millis(10),
        env.reconciler.execute(create_task(), &admin()),
    )
    .await;
    assert!(result.is_err());

    let mut mirrored = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        mirrored = env.store.get_task(TaskId(0)).unwrap();
        if mirrored.is_some() {
            break;
        }
    }
    assert!(mirrored.is_some());
    assert_eq!(
        env.ledger.query(&LedgerQuery::TaskCount).await.unwrap(),
        LedgerValue::Count(1)
    );
}

// ============================================================================
// LOOKUPS
// ============================================================================

#[tokio::test]
async fn test_lookup_miss_triggers_resync() {
    let env = setup();
    // Committed behind the mirror's back
    env.ledger.call(&create_task(), &admin()).await.unwrap();
    assert!(env.store.get_task(TaskId(0)).unwrap().is_none());

    let task = env.reconciler.task(TaskId(0)).await.unwrap();
    assert_eq!(task.title, "Sweep");
    assert!(env.store.get_task(TaskId(0)).unwrap().is_some());
}

#[tokio::test]
async fn test_lookup_of_unknown_id_is_not_found() {
    let env = setup();
    let err = env.reconciler.reward(RewardId(4)).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::NotFound {
            kind: EntityKind::Reward,
            id: 4
        }
    ));
}

#[tokio::test]
async fn test_lookup_without_resync() {
    let env = setup();
    let reconciler = env
        .reconciler
        .clone()
        .with_config(ReconcilerConfig::new().with_resync_on_missing(false));
    env.ledger.call(&create_task(), &admin()).await.unwrap();

    let err = reconciler.task(TaskId(0)).await.unwrap_err();
    assert!(matches!(err, ReconcileError::NotFound { .. }));
}

#[tokio::test]
async fn test_require_admin() {
    let env = setup();
    assert!(env.reconciler.require_admin(&admin()).await.is_ok());
    let err = env.reconciler.require_admin(&member()).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Unauthorized(a) if a == member()));
}
