// Mirror Writes - Receipt-derived upserts and the writer seam
//
// Replacement writes carry the whole record or a change to it and are keyed
// by (kind, ledger id). Append writes are keyed by (kind, natural id) and
// never overwrite an existing row.

use crate::model::{
    Appeal, AppealId, EntityKind, ExchangeRecord, LedgerStamp, PointsHistory, Reward, RewardId,
    Task, TaskChange, TaskId,
};
use crate::storage::store::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One idempotent mirror upsert
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MirrorWrite {
    PutTask(Task),
    PatchTask {
        task_id: TaskId,
        change: TaskChange,
        stamp: LedgerStamp,
    },
    PutReward(Reward),
    /// Absolute stock as reported by the ledger after the event
    PatchReward {
        reward_id: RewardId,
        stock: u64,
        stamp: LedgerStamp,
    },
    AppendExchange(ExchangeRecord),
    AppendPoints(PointsHistory),
    PutAppeal(Appeal),
    PatchAppeal {
        appeal_id: AppealId,
        approved: bool,
        stamp: LedgerStamp,
    },
}

impl MirrorWrite {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::PutTask(_) | Self::PatchTask { .. } => EntityKind::Task,
            Self::PutReward(_) | Self::PatchReward { .. } => EntityKind::Reward,
            Self::AppendExchange(_) => EntityKind::Exchange,
            Self::AppendPoints(_) => EntityKind::PointsHistory,
            Self::PutAppeal(_) | Self::PatchAppeal { .. } => EntityKind::Appeal,
        }
    }

    /// Stamp of the ledger event the write was derived from
    pub fn stamp(&self) -> &LedgerStamp {
        match self {
            Self::PutTask(task) => &task.stamp,
            Self::PatchTask { stamp, .. } => stamp,
            Self::PutReward(reward) => &reward.stamp,
            Self::PatchReward { stamp, .. } => stamp,
            Self::AppendExchange(record) => &record.stamp,
            Self::AppendPoints(row) => &row.stamp,
            Self::PutAppeal(appeal) => &appeal.created,
            Self::PatchAppeal { stamp, .. } => stamp,
        }
    }
}

impl fmt::Display for MirrorWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PutTask(task) => write!(f, "put {}", task.id),
            Self::PatchTask { task_id, change, .. } => {
                write!(f, "patch {} -> {}", task_id, change.target_status())
            }
            Self::PutReward(reward) => write!(f, "put {}", reward.id),
            Self::PatchReward { reward_id, stock, .. } => {
                write!(f, "patch {} stock={}", reward_id, stock)
            }
            Self::AppendExchange(record) => {
                write!(f, "append exchange {} on {}", record.record_id, record.reward_id)
            }
            Self::AppendPoints(row) => {
                write!(f, "append points {} for {} ({:+})", row.record_id, row.user, row.points_change)
            }
            Self::PutAppeal(appeal) => write!(f, "put {}", appeal.id),
            Self::PatchAppeal { appeal_id, approved, .. } => {
                write!(f, "resolve {} approved={}", appeal_id, approved)
            }
        }
    }
}

/// What an upsert did to the stored record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The record changed
    Applied,
    /// The record already reflected this event
    Unchanged,
    /// The record reflects a later event; this one was dropped
    Stale,
}

impl WriteOutcome {
    pub fn changed(self) -> bool {
        self == Self::Applied
    }
}

/// Anything that can apply mirror writes.
///
/// `MirrorStore` is the production implementation; the seam exists so a
/// reconciler can be pointed at a writer that fails on purpose.
pub trait MirrorWriter: Send + Sync {
    fn apply(&self, write: &MirrorWrite) -> Result<WriteOutcome, StoreError>;
}
