// Points Service Tests
// Tests for history ordering and mirror/ledger balance checks

use ledger_mirror::artifact::MemoryUploader;
use ledger_mirror::ledger::InMemoryLedger;
use ledger_mirror::model::{Address, PointsKind, PointsStatus};
use ledger_mirror::reconcile::Reconciler;
use ledger_mirror::service::{NewReward, NewTask, Services};
use ledger_mirror::storage::MirrorStore;
use std::sync::Arc;
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

fn setup() -> (TempDir, Services) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MirrorStore::open(dir.path()).unwrap());
    let ledger = Arc::new(InMemoryLedger::new(admin()));
    let services = Services::new(
        Reconciler::new(ledger, store),
        Arc::new(MemoryUploader::new()),
    );
    (dir, services)
}

async fn earn(services: &Services, who: &Address, title: &str, points: u64) {
    let task_id = services
        .tasks
        .create(&admin(), NewTask::new(title, "", points, 0))
        .await
        .unwrap()
        .created_task_id()
        .unwrap();
    services.tasks.assign(task_id, who).await.unwrap();
    services.tasks.submit(task_id, who, "done", vec![]).await.unwrap();
    services.tasks.approve(&admin(), task_id).await.unwrap();
}

// ============================================================================
// HISTORY
// ============================================================================

#[tokio::test]
async fn test_history_newest_first() {
    let (_dir, services) = setup();
    earn(&services, &member(), "Sweep", 10).await;
    earn(&services, &member(), "Mop", 20).await;
    let reward_id = services
        .rewards
        .create(&admin(), NewReward::new("Mug", "", 25, 1))
        .await
        .unwrap()
        .created_reward_id()
        .unwrap();
    services.rewards.exchange(&member(), reward_id).await.unwrap();

    let history = services.points.history(&member()).unwrap();
    let titles: Vec<&str> = history.iter().map(|h| h.record.title.as_str()).collect();
    assert_eq!(titles, vec!["Mug", "Mop", "Sweep"]);
    assert_eq!(
        history.iter().map(|h| h.sequence).collect::<Vec<_>>(),
        vec![2, 1, 0]
    );
    assert_eq!(
        (history[0].record.kind, history[0].record.status),
        (PointsKind::Reward, PointsStatus::Exchanged)
    );
    assert!(history
        .windows(2)
        .all(|w| w[0].record.timestamp() >= w[1].record.timestamp()));
    assert_eq!(services.points.balance(&member()).unwrap(), 5);
}

#[tokio::test]
async fn test_unknown_user_has_nothing() {
    let (_dir, services) = setup();
    let stranger = Address::parse("0x5555").unwrap();
    assert!(services.points.history(&stranger).unwrap().is_empty());
    assert_eq!(services.points.balance(&stranger).unwrap(), 0);
    assert_eq!(services.points.ledger_balance(&stranger).await.unwrap(), 0);
}

// ============================================================================
// BALANCE CHECKS
// ============================================================================

#[tokio::test]
async fn test_mirror_balance_matches_ledger() {
    let (_dir, services) = setup();
    earn(&services, &member(), "Sweep", 10).await;
    earn(&services, &member(), "Mop", 15).await;

    let check = services.points.check_balance(&member()).await.unwrap();
    assert!(check.is_consistent());
    assert_eq!(check.ledger, 25);
    assert_eq!(services.points.ledger_balance(&member()).await.unwrap(), 25);
}

#[tokio::test]
async fn test_lost_history_shows_as_inconsistent() {
    let (_dir, services) = setup();
    earn(&services, &member(), "Sweep", 10).await;
    services
        .reconciler()
        .store()
        .delete_with_prefix(b"points:")
        .unwrap();

    let check = services.points.check_balance(&member()).await.unwrap();
    assert!(!check.is_consistent());
    assert_eq!((check.mirror, check.ledger), (0, 10));

    services
        .reconciler()
        .resync()
        .repair()
        .await
        .unwrap();
    assert!(services.points.check_balance(&member()).await.unwrap().is_consistent());
}
