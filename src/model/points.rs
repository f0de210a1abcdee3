// Points History - Append-only record of every balance change

use crate::model::ids::{Address, EntityKind, LedgerStamp, RecordId, Sequenced};
use serde::{Deserialize, Serialize};

/// What produced a points change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointsKind {
    Task,
    Reward,
}

/// Outcome recorded alongside a points change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointsStatus {
    Finished,
    Exchanged,
}

/// Largest points amount a task or reward may carry; history rows are signed
pub const MAX_POINTS: u64 = i64::MAX as u64;

/// Signed magnitude of a points amount, clamped to `MAX_POINTS`
fn signed(points: u64) -> i64 {
    i64::try_from(points).unwrap_or(i64::MAX)
}

/// One signed change to a user's balance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsHistory {
    pub record_id: RecordId,
    pub user: Address,
    pub points_change: i64,
    pub title: String,
    pub kind: PointsKind,
    pub status: PointsStatus,
    pub stamp: LedgerStamp,
}

impl PointsHistory {
    /// Credit for an approved task
    pub fn task_reward(user: Address, points: u64, title: String, stamp: LedgerStamp) -> Self {
        Self {
            record_id: RecordId::derive(EntityKind::PointsHistory, &stamp),
            user,
            points_change: signed(points),
            title,
            kind: PointsKind::Task,
            status: PointsStatus::Finished,
            stamp,
        }
    }

    /// Debit for a redeemed reward. Always negative.
    pub fn reward_exchange(user: Address, points_cost: u64, title: String, stamp: LedgerStamp) -> Self {
        Self {
            record_id: RecordId::derive(EntityKind::PointsHistory, &stamp),
            user,
            points_change: -signed(points_cost),
            title,
            kind: PointsKind::Reward,
            status: PointsStatus::Exchanged,
            stamp,
        }
    }

    pub fn timestamp(&self) -> u64 {
        self.stamp.timestamp
    }
}

/// Balance as the signed sum of history rows
pub fn balance<'a, I>(rows: I) -> i64
where
    I: IntoIterator<Item = &'a PointsHistory>,
{
    rows.into_iter().fold(0i64, |acc, r| acc.saturating_add(r.points_change))
}

/// Balance over sequenced rows as returned by the store
pub fn sequenced_balance(rows: &[Sequenced<PointsHistory>]) -> i64 {
    balance(rows.iter().map(|s| &s.record))
}
