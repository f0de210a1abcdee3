// MirrorStore - Persistent mirror of ledger state using sled
//
// Provides typed access for storing:
// - Task, reward and appeal projections, keyed by ledger id
// - Exchange records, keyed by reward and ledger position
// - Points history rows, keyed by user and ledger position
// - Resync checkpoints per event stream
//
// Keys are zero-padded so a prefix scan returns rows in ledger order.

use crate::ledger::EventStream;
use crate::model::{
    Address, Appeal, AppealId, BlockNumber, EntityKind, ExchangeRecord, ExchangedReward, LedgerStamp,
    PointsHistory, PointsKind, Reward, RewardId, Sequenced, Task, TaskId, TransitionError,
};
use crate::storage::query::{AppealQuery, TaskQuery};
use crate::storage::write::{MirrorWrite, MirrorWriter, WriteOutcome};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use thiserror::Error;

/// Key layout
mod keys {
    use crate::ledger::EventStream;
    use crate::model::{Address, AppealId, LedgerStamp, RewardId, TaskId};

    pub const TASK: &[u8] = b"task:";
    pub const REWARD: &[u8] = b"reward:";
    pub const APPEAL: &[u8] = b"appeal:";
    pub const EXCHANGE: &[u8] = b"exchange:";
    pub const POINTS: &[u8] = b"points:";
    pub const CHECKPOINT: &[u8] = b"checkpoint:";

    pub fn task(id: TaskId) -> Vec<u8> {
        format!("task:{:020}", id.0).into_bytes()
    }

    pub fn reward(id: RewardId) -> Vec<u8> {
        format!("reward:{:020}", id.0).into_bytes()
    }

    pub fn appeal(id: AppealId) -> Vec<u8> {
        format!("appeal:{:020}", id.0).into_bytes()
    }

    pub fn exchange_prefix(reward: RewardId) -> Vec<u8> {
        format!("exchange:{:020}:", reward.0).into_bytes()
    }

    pub fn exchange(reward: RewardId, stamp: &LedgerStamp) -> Vec<u8> {
        format!(
            "exchange:{:020}:{:020}:{:010}",
            reward.0, stamp.block_number, stamp.log_index
        )
        .into_bytes()
    }

    pub fn points_prefix(user: &Address) -> Vec<u8> {
        format!("points:{}:", user).into_bytes()
    }

    pub fn points(user: &Address, stamp: &LedgerStamp) -> Vec<u8> {
        format!(
            "points:{}:{:020}:{:010}",
            user, stamp.block_number, stamp.log_index
        )
        .into_bytes()
    }

    pub fn checkpoint(stream: EventStream) -> Vec<u8> {
        format!("checkpoint:{}", stream).into_bytes()
    }
}

/// Errors from storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    OpenFailed(String),

    #[error("Database operation failed: {0}")]
    DatabaseError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Flush failed: {0}")]
    FlushFailed(String),

    #[error("No mirrored {kind} #{id} to apply the change to")]
    MissingBase { kind: EntityKind, id: u64 },

    #[error("Change rejected by the mirrored record: {0}")]
    Transition(#[from] TransitionError),

    #[error("A different {kind} row already exists at {key}")]
    Conflict { kind: EntityKind, key: String },
}

impl StoreError {
    /// Whether retrying the same write can succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_) | Self::FlushFailed(_) | Self::MissingBase { .. }
        )
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

/// Statistics about the storage
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Number of keys in the database
    pub key_count: usize,
    /// Approximate disk size in bytes
    pub disk_size_bytes: u64,
    pub tasks: usize,
    pub rewards: usize,
    pub appeals: usize,
    pub exchanges: usize,
    pub points_rows: usize,
    /// Streams with a recorded resync checkpoint
    pub checkpoints: usize,
}

/// Result of a read-modify-write step on a replacement record
enum Step<T> {
    Write(T),
    Skip(WriteOutcome),
}

/// How an incoming stamp relates to the stored one.
/// `None` means the incoming event is newer and should be applied.
fn order(stored: &LedgerStamp, incoming: &LedgerStamp) -> Option<WriteOutcome> {
    if stored.position() == incoming.position() {
        Some(WriteOutcome::Unchanged)
    } else if stored.is_after(incoming) {
        Some(WriteOutcome::Stale)
    } else {
        None
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    postcard::to_allocvec(value).map_err(|e| StoreError::SerializationFailed(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    postcard::from_bytes(bytes).map_err(|e| StoreError::DeserializationFailed(e.to_string()))
}

/// Persistent store for mirrored ledger state
///
/// Uses sled for crash-safe, embedded storage. Every write is a
/// compare-and-swap, so concurrent writers for the same key never lose
/// an update and never regress a record to an older ledger position.
#[derive(Clone)]
pub struct MirrorStore {
    db: sled::Db,
}

impl MirrorStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Ok(Self { db })
    }

    /// Open a store that lives only as long as the process
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Ok(Self { db })
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.db.is_empty())
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))?;
        Ok(())
    }

    /// Get storage statistics
    pub fn stats(&self) -> Result<StorageStats, StoreError> {
        Ok(StorageStats {
            key_count: self.db.len(),
            disk_size_bytes: self.db.size_on_disk().unwrap_or(0),
            tasks: self.count_prefix(keys::TASK),
            rewards: self.count_prefix(keys::REWARD),
            appeals: self.count_prefix(keys::APPEAL),
            exchanges: self.count_prefix(keys::EXCHANGE),
            points_rows: self.count_prefix(keys::POINTS),
            checkpoints: self.count_prefix(keys::CHECKPOINT),
        })
    }

    fn count_prefix(&self, prefix: &[u8]) -> usize {
        self.db.scan_prefix(prefix).count()
    }

    // ========================================================================
    // RAW KEY-VALUE OPERATIONS
    // ========================================================================

    /// Put raw bytes
    pub fn put_raw(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db.insert(key, value)?;
        Ok(())
    }

    /// Get raw bytes
    pub fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    /// All key-value pairs under a prefix, in key order
    pub fn entries_with_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut entries = Vec::new();
        for result in self.db.scan_prefix(prefix) {
            let (key, value) = result?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    /// Delete all keys with a given prefix
    pub fn delete_with_prefix(&self, prefix: &[u8]) -> Result<usize, StoreError> {
        let mut deleted = 0;
        for result in self.db.scan_prefix(prefix) {
            let (key, _) = result?;
            self.db.remove(key)?;
            deleted += 1;
        }
        Ok(deleted)
    }

    fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StoreError> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>, StoreError> {
        let mut rows = Vec::new();
        for result in self.db.scan_prefix(prefix) {
            let (_, value) = result?;
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }

    // ========================================================================
    // UPSERT PRIMITIVES
    // ========================================================================

    /// Read-modify-write a replacement record until the swap lands
    fn upsert<T, F>(&self, key: &[u8], step: F) -> Result<WriteOutcome, StoreError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(Option<T>) -> Result<Step<T>, StoreError>,
    {
        loop {
            let current = self.db.get(key)?;
            let decoded = match current.as_deref() {
                Some(bytes) => Some(decode::<T>(bytes)?),
                None => None,
            };

            let next = match step(decoded)? {
                Step::Skip(outcome) => return Ok(outcome),
                Step::Write(next) => encode(&next)?,
            };

            if current.as_deref() == Some(next.as_slice()) {
                return Ok(WriteOutcome::Unchanged);
            }

            match self.db.compare_and_swap(key, current.as_ref(), Some(next))? {
                Ok(()) => return Ok(WriteOutcome::Applied),
                // Lost the race; re-read and re-decide
                Err(_) => continue,
            }
        }
    }

    /// Insert an append-only row; an identical row already present is a no-op
    fn append<T: Serialize>(&self, key: Vec<u8>, kind: EntityKind, row: &T) -> Result<WriteOutcome, StoreError> {
        let bytes = encode(row)?;
        match self
            .db
            .compare_and_swap(&key, None::<&[u8]>, Some(bytes.clone()))?
        {
            Ok(()) => Ok(WriteOutcome::Applied),
            Err(cas) if cas.current.as_deref() == Some(bytes.as_slice()) => {
                Ok(WriteOutcome::Unchanged)
            }
            Err(_) => Err(StoreError::Conflict {
                kind,
                key: String::from_utf8_lossy(&key).into_owned(),
            }),
        }
    }

    fn put_replacement<T, S>(&self, key: &[u8], record: &T, stamp_of: S) -> Result<WriteOutcome, StoreError>
    where
        T: Serialize + DeserializeOwned + Clone,
        S: Fn(&T) -> LedgerStamp,
    {
        let incoming = stamp_of(record);
        self.upsert(key, |current: Option<T>| match current {
            Some(stored) => match order(&stamp_of(&stored), &incoming) {
                Some(outcome) => Ok(Step::Skip(outcome)),
                None => Ok(Step::Write(record.clone())),
            },
            None => Ok(Step::Write(record.clone())),
        })
    }

    // ========================================================================
    // TASKS
    // ========================================================================

    pub fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.get(&keys::task(id))
    }

    /// Tasks matching the query, newest first
    pub fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self.scan(keys::TASK)?;
        tasks.retain(|t| query.matches(t));
        tasks.reverse();
        if let Some(limit) = query.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    // ========================================================================
    // REWARDS AND EXCHANGES
    // ========================================================================

    pub fn get_reward(&self, id: RewardId) -> Result<Option<Reward>, StoreError> {
        self.get(&keys::reward(id))
    }

    /// All rewards, newest first
    pub fn list_rewards(&self) -> Result<Vec<Reward>, StoreError> {
        let mut rewards: Vec<Reward> = self.scan(keys::REWARD)?;
        rewards.reverse();
        Ok(rewards)
    }

    /// Exchange records of one reward in ledger order, numbered from zero
    pub fn exchanges_for_reward(&self, reward: RewardId) -> Result<Vec<Sequenced<ExchangeRecord>>, StoreError> {
        let rows: Vec<ExchangeRecord> = self.scan(&keys::exchange_prefix(reward))?;
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, record)| Sequenced {
                sequence: i as u64,
                record,
            })
            .collect())
    }

    pub fn exchange_count(&self, reward: RewardId) -> Result<u64, StoreError> {
        Ok(self.count_prefix(&keys::exchange_prefix(reward)) as u64)
    }

    /// Exchange records of one user across all rewards, newest first
    pub fn exchanges_for_user(&self, user: &Address) -> Result<Vec<ExchangeRecord>, StoreError> {
        let mut rows: Vec<ExchangeRecord> = self.scan(keys::EXCHANGE)?;
        rows.retain(|r| &r.user == user);
        rows.sort_by(|a, b| b.stamp.position().cmp(&a.stamp.position()));
        Ok(rows)
    }

    /// A user's exchange records joined with reward details, newest first.
    /// Records whose reward is not mirrored yet are skipped.
    pub fn exchanged_rewards(&self, user: &Address) -> Result<Vec<ExchangedReward>, StoreError> {
        let mut rewards: HashMap<RewardId, Option<Reward>> = HashMap::new();
        let mut out = Vec::new();

        for record in self.exchanges_for_user(user)? {
            let reward = match rewards.get(&record.reward_id) {
                Some(cached) => cached.clone(),
                None => {
                    let loaded = self.get_reward(record.reward_id)?;
                    rewards.insert(record.reward_id, loaded.clone());
                    loaded
                }
            };
            if let Some(reward) = reward {
                out.push(ExchangedReward {
                    reward_id: reward.id,
                    name: reward.name,
                    description: reward.description,
                    points_cost: record.points_cost,
                    image_url: reward.image_url,
                    timestamp: record.stamp.timestamp,
                });
            }
        }
        Ok(out)
    }

    // ========================================================================
    // POINTS
    // ========================================================================

    /// A user's points history, newest first.
    ///
    /// Sequence numbers count from the user's oldest row.
    pub fn points_history(&self, user: &Address) -> Result<Vec<Sequenced<PointsHistory>>, StoreError> {
        let rows: Vec<PointsHistory> = self.scan(&keys::points_prefix(user))?;
        let mut sequenced: Vec<_> = rows
            .into_iter()
            .enumerate()
            .map(|(i, record)| Sequenced {
                sequence: i as u64,
                record,
            })
            .collect();
        sequenced.reverse();
        Ok(sequenced)
    }

    /// Signed sum of the user's history rows
    pub fn balance(&self, user: &Address) -> Result<i64, StoreError> {
        let rows: Vec<PointsHistory> = self.scan(&keys::points_prefix(user))?;
        Ok(crate::model::balance(&rows))
    }

    /// Every user with at least one history row
    pub fn users(&self) -> Result<Vec<Address>, StoreError> {
        let rows: Vec<PointsHistory> = self.scan(keys::POINTS)?;
        let users: BTreeSet<Address> = rows.into_iter().map(|r| r.user).collect();
        Ok(users.into_iter().collect())
    }

    // ========================================================================
    // APPEALS
    // ========================================================================

    pub fn get_appeal(&self, id: AppealId) -> Result<Option<Appeal>, StoreError> {
        self.get(&keys::appeal(id))
    }

    /// Appeals matching the query, newest first
    pub fn list_appeals(&self, query: &AppealQuery) -> Result<Vec<Appeal>, StoreError> {
        let mut appeals: Vec<Appeal> = self.scan(keys::APPEAL)?;
        appeals.retain(|a| query.matches(a));
        appeals.reverse();
        if let Some(limit) = query.limit {
            appeals.truncate(limit);
        }
        Ok(appeals)
    }

    pub fn pending_appeal_count(&self) -> Result<usize, StoreError> {
        Ok(self.list_appeals(&AppealQuery::pending())?.len())
    }

    // ========================================================================
    // CHECKPOINTS
    // ========================================================================

    /// Last block fully mirrored for a stream
    pub fn checkpoint(&self, stream: EventStream) -> Result<Option<BlockNumber>, StoreError> {
        self.get(&keys::checkpoint(stream))
    }

    pub fn set_checkpoint(&self, stream: EventStream, block: BlockNumber) -> Result<(), StoreError> {
        self.db.insert(keys::checkpoint(stream), encode(&block)?)?;
        Ok(())
    }

    pub fn clear_checkpoint(&self, stream: EventStream) -> Result<(), StoreError> {
        self.db.remove(keys::checkpoint(stream))?;
        Ok(())
    }

    /// All recorded checkpoints
    pub fn checkpoints(&self) -> Result<Vec<(EventStream, BlockNumber)>, StoreError> {
        let mut out = Vec::new();
        for stream in EventStream::ALL {
            if let Some(block) = self.checkpoint(stream)? {
                out.push((stream, block));
            }
        }
        Ok(out)
    }

    // ========================================================================
    // REBUILD SUPPORT
    // ========================================================================

    /// Drop every record a stream produces so it can be replayed from genesis
    pub fn clear_stream(&self, stream: EventStream) -> Result<usize, StoreError> {
        let removed = match stream {
            EventStream::Tasks => {
                self.delete_with_prefix(keys::TASK)? + self.clear_points(PointsKind::Task)?
            }
            EventStream::Rewards => {
                self.delete_with_prefix(keys::REWARD)?
                    + self.delete_with_prefix(keys::EXCHANGE)?
                    + self.clear_points(PointsKind::Reward)?
            }
            EventStream::Appeals => self.delete_with_prefix(keys::APPEAL)?,
        };
        self.clear_checkpoint(stream)?;
        Ok(removed)
    }

    fn clear_points(&self, kind: PointsKind) -> Result<usize, StoreError> {
        let mut removed = 0;
        for result in self.db.scan_prefix(keys::POINTS) {
            let (key, value) = result?;
            let row: PointsHistory = decode(&value)?;
            if row.kind == kind {
                self.db.remove(key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl MirrorWriter for MirrorStore {
    fn apply(&self, write: &MirrorWrite) -> Result<WriteOutcome, StoreError> {
        match write {
            MirrorWrite::PutTask(task) => {
                self.put_replacement(&keys::task(task.id), task, |t: &Task| t.stamp)
            }
            MirrorWrite::PatchTask { task_id, change, stamp } => {
                self.upsert(&keys::task(*task_id), |current: Option<Task>| {
                    let mut task = current.ok_or(StoreError::MissingBase {
                        kind: EntityKind::Task,
                        id: task_id.0,
                    })?;
                    if let Some(outcome) = order(&task.stamp, stamp) {
                        return Ok(Step::Skip(outcome));
                    }
                    task.apply(change, *stamp)?;
                    Ok(Step::Write(task))
                })
            }
            MirrorWrite::PutReward(reward) => {
                self.put_replacement(&keys::reward(reward.id), reward, |r: &Reward| r.stamp)
            }
            MirrorWrite::PatchReward { reward_id, stock, stamp } => {
                self.upsert(&keys::reward(*reward_id), |current: Option<Reward>| {
                    let mut reward = current.ok_or(StoreError::MissingBase {
                        kind: EntityKind::Reward,
                        id: reward_id.0,
                    })?;
                    if let Some(outcome) = order(&reward.stamp, stamp) {
                        return Ok(Step::Skip(outcome));
                    }
                    reward.set_stock(*stock, *stamp);
                    Ok(Step::Write(reward))
                })
            }
            MirrorWrite::AppendExchange(record) => self.append(
                keys::exchange(record.reward_id, &record.stamp),
                EntityKind::Exchange,
                record,
            ),
            MirrorWrite::AppendPoints(row) => self.append(
                keys::points(&row.user, &row.stamp),
                EntityKind::PointsHistory,
                row,
            ),
            MirrorWrite::PutAppeal(appeal) => {
                self.put_replacement(&keys::appeal(appeal.id), appeal, |a: &Appeal| *a.last_stamp())
            }
            MirrorWrite::PatchAppeal { appeal_id, approved, stamp } => {
                self.upsert(&keys::appeal(*appeal_id), |current: Option<Appeal>| {
                    let mut appeal = current.ok_or(StoreError::MissingBase {
                        kind: EntityKind::Appeal,
                        id: appeal_id.0,
                    })?;
                    if let Some(outcome) = order(appeal.last_stamp(), stamp) {
                        return Ok(Step::Skip(outcome));
                    }
                    appeal.resolve(*approved, *stamp)?;
                    Ok(Step::Write(appeal))
                })
            }
        }
    }
}
