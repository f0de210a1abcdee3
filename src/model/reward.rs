// Reward - Mirror projection of rewards and their redemption records

use crate::model::ids::{Address, EntityKind, LedgerStamp, RecordId, RewardId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Availability of a reward, derived from its stock
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RewardStatus {
    Available = 0,
    SoldOut = 1,
}

impl RewardStatus {
    pub fn from_stock(stock: u64) -> Self {
        if stock == 0 {
            Self::SoldOut
        } else {
            Self::Available
        }
    }
}

impl fmt::Display for RewardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => f.pad("available"),
            Self::SoldOut => f.pad("sold-out"),
        }
    }
}

/// Mirror record of a ledger reward.
///
/// `status` is never set directly; it follows `stock` through [`Reward::set_stock`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub id: RewardId,
    pub name: String,
    pub description: String,
    pub points_cost: u64,
    pub stock: u64,
    pub image_url: String,
    pub status: RewardStatus,
    pub stamp: LedgerStamp,
}

impl Reward {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: RewardId,
        name: String,
        description: String,
        points_cost: u64,
        stock: u64,
        image_url: String,
        stamp: LedgerStamp,
    ) -> Self {
        Self {
            id,
            name,
            description,
            points_cost,
            stock,
            image_url,
            status: RewardStatus::from_stock(stock),
            stamp,
        }
    }

    /// Set the absolute stock reported by the ledger
    pub fn set_stock(&mut self, stock: u64, stamp: LedgerStamp) {
        self.stock = stock;
        self.status = RewardStatus::from_stock(stock);
        self.stamp = stamp;
    }

    pub fn is_sold_out(&self) -> bool {
        self.status == RewardStatus::SoldOut
    }
}

/// One redemption of a reward
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub record_id: RecordId,
    pub reward_id: RewardId,
    pub user: Address,
    pub points_cost: u64,
    pub stamp: LedgerStamp,
}

impl ExchangeRecord {
    pub fn new(reward_id: RewardId, user: Address, points_cost: u64, stamp: LedgerStamp) -> Self {
        Self {
            record_id: RecordId::derive(EntityKind::Exchange, &stamp),
            reward_id,
            user,
            points_cost,
            stamp,
        }
    }
}

/// A reward a user has redeemed, joined with the reward's details
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangedReward {
    pub reward_id: RewardId,
    pub name: String,
    pub description: String,
    pub points_cost: u64,
    pub image_url: String,
    /// Block timestamp of the redemption
    pub timestamp: u64,
}
