// Reward Service Tests
// Tests for the reward catalogue, optimistic pre-checks and racing exchanges

use ledger_mirror::artifact::MemoryUploader;
use ledger_mirror::ledger::InMemoryLedger;
use ledger_mirror::model::{Address, PointsKind, RewardId, RewardStatus, TaskId};
use ledger_mirror::reconcile::{ReconcileError, Reconciler};
use ledger_mirror::service::{ExchangeQuote, NewReward, NewTask, Services};
use ledger_mirror::storage::MirrorStore;
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn admin() -> Address {
    Address::parse("0xad").unwrap()
}

struct Env {
    _dir: TempDir,
    ledger: Arc<InMemoryLedger>,
    services: Services,
}

fn setup() -> Env {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MirrorStore::open(dir.path()).unwrap());
    let ledger = Arc::new(InMemoryLedger::new(admin()));
    let services = Services::new(
        Reconciler::new(ledger.clone(), store),
        Arc::new(MemoryUploader::new()),
    );
    Env {
        _dir: dir,
        ledger,
        services,
    }
}

/// Complete a task so `who` earns `points`
async fn earn(services: &Services, who: &Address, points: u64) -> TaskId {
    let task_id = services
        .tasks
        .create(&admin(), NewTask::new("Chore", "", points, 0))
        .await
        .unwrap()
        .created_task_id()
        .unwrap();
    services.tasks.assign(task_id, who).await.unwrap();
    services.tasks.submit(task_id, who, "done", vec![]).await.unwrap();
    services.tasks.approve(&admin(), task_id).await.unwrap();
    task_id
}

async fn create_reward(services: &Services, name: &str, cost: u64, stock: u64) -> RewardId {
    services
        .rewards
        .create(&admin(), NewReward::new(name, "", cost, stock))
        .await
        .unwrap()
        .created_reward_id()
        .unwrap()
}

/// Race one exchange per user and return how many the ledger accepted
async fn race(services: &Services, users: &[Address], reward_id: RewardId) -> usize {
    let handles: Vec<_> = users
        .iter()
        .cloned()
        .map(|user| {
            let services = services.clone();
            tokio::spawn(async move { services.rewards.exchange(&user, reward_id).await })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => {
                assert!(outcome.is_fully_mirrored());
                accepted += 1;
            }
            Err(ReconcileError::SoldOut(id)) => assert_eq!(id, reward_id),
            Err(ReconcileError::LedgerRejected { reason, .. }) => {
                assert_eq!(reason, "reward sold out")
            }
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
    accepted
}

// ============================================================================
// CATALOGUE
// ============================================================================

#[tokio::test]
async fn test_create_with_image() {
    let env = setup();
    let outcome = env
        .services
        .rewards
        .create(
            &admin(),
            NewReward::new("Mug", "Club mug", 30, 4).with_image(vec![7; 64]),
        )
        .await
        .unwrap();

    let reward = env
        .services
        .rewards
        .get(outcome.created_reward_id().unwrap())
        .unwrap()
        .unwrap();
    assert!(reward.image_url.starts_with("ipfs://"));
    assert_eq!(reward.status, RewardStatus::Available);
    assert_eq!(env.services.rewards.list().unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_stock() {
    let env = setup();
    let reward_id = create_reward(&env.services, "Sticker", 5, 0).await;
    assert!(env.services.rewards.get(reward_id).unwrap().unwrap().is_sold_out());

    env.services
        .rewards
        .update_stock(&admin(), reward_id, 5)
        .await
        .unwrap();
    let reward = env.services.rewards.get(reward_id).unwrap().unwrap();
    assert_eq!(reward.stock, 5);
    assert_eq!(reward.status, RewardStatus::Available);

    let member = Address::parse("0xaaa").unwrap();
    let err = env
        .services
        .rewards
        .update_stock(&member, reward_id, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Unauthorized(_)));
}

// ============================================================================
// EXCHANGE
// ============================================================================

#[tokio::test]
async fn test_exchange_debits_and_records() {
    let env = setup();
    let user = Address::parse("0xaaa").unwrap();
    earn(&env.services, &user, 50).await;
    let reward_id = create_reward(&env.services, "Mug", 30, 2).await;

    let quote = env.services.rewards.quote(reward_id, &user).await.unwrap();
    assert_eq!((quote.next_sequence, quote.balance), (0, 50));

    env.services.rewards.exchange(&user, reward_id).await.unwrap();

    let reward = env.services.rewards.get(reward_id).unwrap().unwrap();
    assert_eq!(reward.stock, 1);
    let exchanges = env.services.rewards.exchanges(reward_id).unwrap();
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].record.user, user);
    assert_eq!(exchanges[0].record.points_cost, 30);

    let history = env.services.points.history(&user).unwrap();
    assert_eq!(history[0].record.kind, PointsKind::Reward);
    assert_eq!(history[0].record.points_change, -30);
    assert_eq!(history[0].record.title, "Mug");
    assert_eq!(env.services.points.balance(&user).unwrap(), 20);

    let redeemed = env.services.rewards.exchanged_rewards(&user).unwrap();
    assert_eq!(redeemed.len(), 1);
    assert_eq!(redeemed[0].name, "Mug");
}

#[tokio::test]
async fn test_insufficient_balance_checked_locally() {
    let env = setup();
    let user = Address::parse("0xaaa").unwrap();
    let reward_id = create_reward(&env.services, "Mug", 30, 2).await;
    let calls_before = env.ledger.call_count();

    let err = env
        .services
        .rewards
        .exchange(&user, reward_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::InsufficientBalance {
            available: 0,
            required: 30
        }
    ));
    assert_eq!(env.ledger.call_count(), calls_before);
}

#[tokio::test]
async fn test_cost_beyond_signed_range_rejected() {
    let env = setup();
    let err = env
        .services
        .rewards
        .create(&admin(), NewReward::new("Yacht", "", u64::MAX, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidInput(ref m) if m == "points cost too large"));
    assert_eq!(env.ledger.call_count(), 0);

    // A cost that cannot be represented as a balance is never affordable
    let quote = ExchangeQuote {
        reward_id: RewardId(0),
        name: "Yacht".into(),
        points_cost: u64::MAX,
        stock: 1,
        next_sequence: 0,
        balance: i64::MAX,
    };
    assert!(matches!(
        quote.check(),
        Err(ReconcileError::InsufficientBalance {
            available: i64::MAX,
            required: u64::MAX
        })
    ));
}

#[tokio::test]
async fn test_sold_out_checked_locally() {
    let env = setup();
    let user = Address::parse("0xaaa").unwrap();
    earn(&env.services, &user, 100).await;
    let reward_id = create_reward(&env.services, "Sticker", 5, 1).await;
    env.services.rewards.exchange(&user, reward_id).await.unwrap();

    let err = env
        .services
        .rewards
        .exchange(&user, reward_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::SoldOut(id) if id == reward_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_unit_goes_to_exactly_one() {
    let env = setup();
    let users = [
        Address::parse("0xaaa").unwrap(),
        Address::parse("0xbbb").unwrap(),
    ];
    for user in &users {
        earn(&env.services, user, 50).await;
    }
    create_reward(&env.services, "Poster", 10, 5).await;
    create_reward(&env.services, "Pin", 10, 5).await;
    let reward_id = create_reward(&env.services, "Mug", 30, 1).await;
    assert_eq!(reward_id, RewardId(2));

    assert_eq!(race(&env.services, &users, reward_id).await, 1);

    let reward = env.services.rewards.get(reward_id).unwrap().unwrap();
    assert_eq!(reward.stock, 0);
    assert_eq!(reward.status, RewardStatus::SoldOut);
    assert_eq!(env.services.rewards.exchanges(reward_id).unwrap().len(), 1);

    let balances: Vec<i64> = users
        .iter()
        .map(|u| env.services.points.balance(u).unwrap())
        .collect();
    let mut sorted = balances.clone();
    sorted.sort();
    assert_eq!(sorted, vec![20, 50]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stock_never_oversold() {
    let env = setup();
    let users: Vec<Address> = (0..8).map(|_| Address::random()).collect();
    for user in &users {
        earn(&env.services, user, 40).await;
    }
    let reward_id = create_reward(&env.services, "Hoodie", 40, 3).await;

    assert_eq!(race(&env.services, &users, reward_id).await, 3);

    let exchanges = env.services.rewards.exchanges(reward_id).unwrap();
    assert_eq!(
        exchanges.iter().map(|e| e.sequence).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(env.services.rewards.get(reward_id).unwrap().unwrap().stock, 0);

    let debited = users
        .iter()
        .filter(|u| env.services.points.balance(u).unwrap() == 0)
        .count();
    assert_eq!(debited, 3);
    assert!(env.services.reconciler().resync().verify().await.unwrap().is_clean());
}
