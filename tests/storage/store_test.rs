// MirrorStore Tests
// Tests for idempotent upserts, receipt ordering, append rows and reads

use ledger_mirror::ledger::EventStream;
use ledger_mirror::model::{
    Address, Appeal, AppealId, EntityKind, ExchangeRecord, LedgerStamp, PointsHistory, Reward,
    RewardId, RewardStatus, Task, TaskChange, TaskId, TaskStatus, TxHash,
};
use ledger_mirror::storage::{
    AppealQuery, MirrorStore, MirrorWrite, MirrorWriter, StoreError, TaskQuery, WriteOutcome,
};
use tempfile::TempDir;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn open() -> (TempDir, MirrorStore) {
    let dir = TempDir::new().unwrap();
    let store = MirrorStore::open(dir.path()).unwrap();
    (dir, store)
}

fn stamp(block: u64, log_index: u32) -> LedgerStamp {
    LedgerStamp {
        tx_hash: TxHash::from_bytes([block as u8; 32]),
        block_number: block,
        log_index,
        timestamp: 1_700_000_000 + block * 12,
    }
}

fn admin() -> Address {
    Address::parse("0xad").unwrap()
}

fn member() -> Address {
    Address::parse("0xaaa").unwrap()
}

fn task(id: u64, block: u64) -> Task {
    Task {
        id: TaskId(id),
        creator: admin(),
        title: format!("Task {}", id),
        description: String::new(),
        points: 10,
        assignee: None,
        status: TaskStatus::Created,
        deadline: 0,
        proof: None,
        stamp: stamp(block, 0),
    }
}

fn reward(id: u64, stock: u64, block: u64) -> Reward {
    Reward::new(
        RewardId(id),
        format!("Reward {}", id),
        "desc".into(),
        30,
        stock,
        "ipfs://img".into(),
        stamp(block, 0),
    )
}

fn assign(id: u64, block: u64) -> MirrorWrite {
    MirrorWrite::PatchTask {
        task_id: TaskId(id),
        change: TaskChange::Assigned { assignee: member() },
        stamp: stamp(block, 0),
    }
}

// ============================================================================
// REPLACEMENT WRITES
// ============================================================================

#[test]
fn test_same_write_twice_is_byte_identical() {
    let (_dir, store) = open();
    let writes = [MirrorWrite::PutTask(task(1, 1)), assign(1, 2)];

    for w in &writes {
        assert_eq!(store.apply(w).unwrap(), WriteOutcome::Applied);
        let before = store.entries_with_prefix(b"task:").unwrap();
        assert_eq!(store.apply(w).unwrap(), WriteOutcome::Unchanged);
        assert_eq!(store.entries_with_prefix(b"task:").unwrap(), before);
    }

    // Replaying the older put once the assignment landed changes nothing
    let before = store.entries_with_prefix(b"task:").unwrap();
    assert_eq!(store.apply(&writes[0]).unwrap(), WriteOutcome::Stale);
    assert_eq!(store.entries_with_prefix(b"task:").unwrap(), before);
}

#[test]
fn test_higher_block_wins() {
    let (_dir, store) = open();
    store.apply(&MirrorWrite::PutReward(reward(2, 5, 1))).unwrap();

    let later = MirrorWrite::PatchReward {
        reward_id: RewardId(2),
        stock: 3,
        stamp: stamp(9, 0),
    };
    let earlier = MirrorWrite::PatchReward {
        reward_id: RewardId(2),
        stock: 4,
        stamp: stamp(8, 0),
    };

    assert_eq!(store.apply(&later).unwrap(), WriteOutcome::Applied);
    assert_eq!(store.apply(&earlier).unwrap(), WriteOutcome::Stale);
    assert_eq!(store.get_reward(RewardId(2)).unwrap().unwrap().stock, 3);
}

#[test]
fn test_log_index_breaks_ties() {
    let (_dir, store) = open();
    store.apply(&MirrorWrite::PutReward(reward(0, 5, 1))).unwrap();

    let second = MirrorWrite::PatchReward {
        reward_id: RewardId(0),
        stock: 3,
        stamp: stamp(4, 1),
    };
    let first = MirrorWrite::PatchReward {
        reward_id: RewardId(0),
        stock: 4,
        stamp: stamp(4, 0),
    };
    store.apply(&second).unwrap();
    assert_eq!(store.apply(&first).unwrap(), WriteOutcome::Stale);
    assert_eq!(store.get_reward(RewardId(0)).unwrap().unwrap().stock, 3);
}

#[test]
fn test_stock_zero_marks_sold_out() {
    let (_dir, store) = open();
    store.apply(&MirrorWrite::PutReward(reward(0, 1, 1))).unwrap();
    store
        .apply(&MirrorWrite::PatchReward {
            reward_id: RewardId(0),
            stock: 0,
            stamp: stamp(2, 0),
        })
        .unwrap();

    let stored = store.get_reward(RewardId(0)).unwrap().unwrap();
    assert_eq!(stored.status, RewardStatus::SoldOut);
}

#[test]
fn test_patch_without_base_fails() {
    let (_dir, store) = open();
    let err = store.apply(&assign(7, 2)).unwrap_err();
    assert!(matches!(
        err,
        StoreError::MissingBase {
            kind: EntityKind::Task,
            id: 7
        }
    ));
    assert!(err.is_transient());
}

#[test]
fn test_illegal_change_is_refused() {
    let (_dir, store) = open();
    store.apply(&MirrorWrite::PutTask(task(1, 1))).unwrap();
    let err = store
        .apply(&MirrorWrite::PatchTask {
            task_id: TaskId(1),
            change: TaskChange::Completed,
            stamp: stamp(3, 0),
        })
        .unwrap_err();

    assert!(matches!(err, StoreError::Transition(_)));
    assert!(!err.is_transient());
    assert_eq!(store.get_task(TaskId(1)).unwrap().unwrap().status, TaskStatus::Created);
}

#[test]
fn test_appeal_resolution_patch() {
    let (_dir, store) = open();
    let appeal = Appeal::new(AppealId(0), member(), 5, "late".into(), stamp(1, 0));
    store.apply(&MirrorWrite::PutAppeal(appeal.clone())).unwrap();

    let resolve = MirrorWrite::PatchAppeal {
        appeal_id: AppealId(0),
        approved: false,
        stamp: stamp(3, 0),
    };
    assert_eq!(store.apply(&resolve).unwrap(), WriteOutcome::Applied);
    assert_eq!(store.apply(&resolve).unwrap(), WriteOutcome::Unchanged);
    assert_eq!(
        store.apply(&MirrorWrite::PutAppeal(appeal)).unwrap(),
        WriteOutcome::Stale
    );

    let stored = store.get_appeal(AppealId(0)).unwrap().unwrap();
    assert!(stored.resolved);
    assert!(!stored.approved);
    assert_eq!(stored.resolution_tx_hash(), Some(stamp(3, 0).tx_hash));
}

// ============================================================================
// APPEND WRITES
// ============================================================================

#[test]
fn test_append_is_idempotent() {
    let (_dir, store) = open();
    let row = PointsHistory::task_reward(member(), 10, "Sweep".into(), stamp(4, 0));

    assert_eq!(store.apply(&MirrorWrite::AppendPoints(row.clone())).unwrap(), WriteOutcome::Applied);
    assert_eq!(store.apply(&MirrorWrite::AppendPoints(row)).unwrap(), WriteOutcome::Unchanged);
    assert_eq!(store.points_history(&member()).unwrap().len(), 1);
    assert_eq!(store.balance(&member()).unwrap(), 10);
}

#[test]
fn test_append_conflict_detected() {
    let (_dir, store) = open();
    let row = PointsHistory::task_reward(member(), 10, "Sweep".into(), stamp(4, 0));
    let mut altered = row.clone();
    altered.points_change = 99;

    store.apply(&MirrorWrite::AppendPoints(row)).unwrap();
    let err = store.apply(&MirrorWrite::AppendPoints(altered)).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Conflict {
            kind: EntityKind::PointsHistory,
            ..
        }
    ));
    assert_eq!(store.balance(&member()).unwrap(), 10);
}

#[test]
fn test_exchange_sequence_follows_ledger_order() {
    let (_dir, store) = open();
    let other = Address::parse("0xbbb").unwrap();
    // Written out of order on purpose
    store
        .apply(&MirrorWrite::AppendExchange(ExchangeRecord::new(RewardId(2), other.clone(), 30, stamp(9, 0))))
        .unwrap();
    store
        .apply(&MirrorWrite::AppendExchange(ExchangeRecord::new(RewardId(2), member(), 30, stamp(7, 0))))
        .unwrap();

    let rows = store.exchanges_for_reward(RewardId(2)).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!((rows[0].sequence, &rows[0].record.user), (0, &member()));
    assert_eq!((rows[1].sequence, &rows[1].record.user), (1, &other));
    assert_eq!(store.exchange_count(RewardId(2)).unwrap(), 2);
    assert_eq!(store.exchange_count(RewardId(3)).unwrap(), 0);
}

// ============================================================================
// READS
// ============================================================================

#[test]
fn test_task_listing_filters_and_order() {
    let (_dir, store) = open();
    for id in 0..4 {
        store.apply(&MirrorWrite::PutTask(task(id, id + 1))).unwrap();
    }
    store.apply(&assign(2, 10)).unwrap();

    let all = store.list_tasks(&TaskQuery::new()).unwrap();
    assert_eq!(
        all.iter().map(|t| t.id.0).collect::<Vec<_>>(),
        vec![3, 2, 1, 0]
    );

    let assigned = store
        .list_tasks(&TaskQuery::new().with_status(TaskStatus::Assigned))
        .unwrap();
    assert_eq!(assigned.len(), 1);
    assert_eq!(assigned[0].id, TaskId(2));

    let mine = store
        .list_tasks(&TaskQuery::new().with_assignee(member()))
        .unwrap();
    assert_eq!(mine.len(), 1);

    let limited = store.list_tasks(&TaskQuery::new().with_limit(2)).unwrap();
    assert_eq!(limited.len(), 2);

    let by_admin = store.list_tasks(&TaskQuery::new().with_creator(admin())).unwrap();
    assert_eq!(by_admin.len(), 4);
    let by_member = store.list_tasks(&TaskQuery::new().with_creator(member())).unwrap();
    assert!(by_member.is_empty());
}

#[test]
fn test_points_history_newest_first() {
    let (_dir, store) = open();
    store
        .apply(&MirrorWrite::AppendPoints(PointsHistory::task_reward(member(), 10, "a".into(), stamp(3, 0))))
        .unwrap();
    store
        .apply(&MirrorWrite::AppendPoints(PointsHistory::task_reward(member(), 20, "b".into(), stamp(5, 0))))
        .unwrap();
    store
        .apply(&MirrorWrite::AppendPoints(PointsHistory::reward_exchange(member(), 25, "mug".into(), stamp(8, 0))))
        .unwrap();

    let history = store.points_history(&member()).unwrap();
    let sequences: Vec<u64> = history.iter().map(|h| h.sequence).collect();
    assert_eq!(sequences, vec![2, 1, 0]);
    assert_eq!(history[0].record.title, "mug");
    assert_eq!(store.balance(&member()).unwrap(), 5);
    assert_eq!(store.users().unwrap(), vec![member()]);
}

#[test]
fn test_appeal_listing_and_pending_count() {
    let (_dir, store) = open();
    for id in 0..3 {
        store
            .apply(&MirrorWrite::PutAppeal(Appeal::new(
                AppealId(id),
                member(),
                5,
                "reason".into(),
                stamp(id + 1, 0),
            )))
            .unwrap();
    }
    store
        .apply(&MirrorWrite::PatchAppeal {
            appeal_id: AppealId(1),
            approved: true,
            stamp: stamp(9, 0),
        })
        .unwrap();

    assert_eq!(store.pending_appeal_count().unwrap(), 2);
    let pending = store.list_appeals(&AppealQuery::pending()).unwrap();
    assert_eq!(
        pending.iter().map(|a| a.id.0).collect::<Vec<_>>(),
        vec![2, 0]
    );
    assert!(store
        .list_appeals(&AppealQuery::new().with_user(admin()))
        .unwrap()
        .is_empty());
}

#[test]
fn test_exchanged_rewards_join() {
    let (_dir, store) = open();
    store.apply(&MirrorWrite::PutReward(reward(0, 5, 1))).unwrap();
    store
        .apply(&MirrorWrite::AppendExchange(ExchangeRecord::new(RewardId(0), member(), 30, stamp(4, 0))))
        .unwrap();
    // Reward 1 is not mirrored yet
    store
        .apply(&MirrorWrite::AppendExchange(ExchangeRecord::new(RewardId(1), member(), 30, stamp(5, 0))))
        .unwrap();

    let rewards = store.exchanged_rewards(&member()).unwrap();
    assert_eq!(rewards.len(), 1);
    assert_eq!(rewards[0].name, "Reward 0");
    assert_eq!(rewards[0].timestamp, stamp(4, 0).timestamp);
}

// ============================================================================
// CHECKPOINTS AND REBUILD
// ============================================================================

#[test]
fn test_checkpoints_persist() {
    let dir = TempDir::new().unwrap();
    {
        let store = MirrorStore::open(dir.path()).unwrap();
        assert_eq!(store.checkpoint(EventStream::Tasks).unwrap(), None);
        store.set_checkpoint(EventStream::Tasks, 42).unwrap();
        store.flush().unwrap();
    }

    let store = MirrorStore::open(dir.path()).unwrap();
    assert_eq!(store.checkpoint(EventStream::Tasks).unwrap(), Some(42));
    assert_eq!(store.checkpoints().unwrap(), vec![(EventStream::Tasks, 42)]);
}

#[test]
fn test_clear_stream_keeps_other_streams() {
    let (_dir, store) = open();
    store.apply(&MirrorWrite::PutTask(task(0, 1))).unwrap();
    store.apply(&MirrorWrite::PutReward(reward(0, 5, 2))).unwrap();
    store
        .apply(&MirrorWrite::AppendPoints(PointsHistory::task_reward(member(), 10, "a".into(), stamp(3, 0))))
        .unwrap();
    store
        .apply(&MirrorWrite::AppendPoints(PointsHistory::reward_exchange(member(), 30, "r".into(), stamp(4, 0))))
        .unwrap();
    store.set_checkpoint(EventStream::Tasks, 3).unwrap();
    store.set_checkpoint(EventStream::Rewards, 4).unwrap();
    assert_eq!(store.stats().unwrap().checkpoints, 2);

    let removed = store.clear_stream(EventStream::Tasks).unwrap();
    assert_eq!(removed, 2);
    assert!(store.get_task(TaskId(0)).unwrap().is_none());
    assert!(store.get_reward(RewardId(0)).unwrap().is_some());
    assert_eq!(store.balance(&member()).unwrap(), -30);
    assert_eq!(store.checkpoint(EventStream::Tasks).unwrap(), None);

    let stats = store.stats().unwrap();
    assert_eq!(stats.tasks, 0);
    assert_eq!(stats.rewards, 1);
    assert_eq!(stats.points_rows, 1);
    assert_eq!(stats.checkpoints, 1);
}
