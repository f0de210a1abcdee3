// Ledger Events - The contract's event log, the input to every mirror write

use crate::model::{Address, AppealId, BlockNumber, LedgerStamp, RewardId, TaskId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event streams a reader can follow independently
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStream {
    Tasks,
    Rewards,
    Appeals,
}

impl EventStream {
    pub const ALL: [EventStream; 3] = [Self::Tasks, Self::Rewards, Self::Appeals];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Rewards => "rewards",
            Self::Appeals => "appeals",
        }
    }
}

impl fmt::Display for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for EventStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tasks" => Ok(Self::Tasks),
            "rewards" => Ok(Self::Rewards),
            "appeals" => Ok(Self::Appeals),
            other => Err(format!("unknown event stream: {}", other)),
        }
    }
}

/// Payload of a ledger event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventData {
    TaskCreated {
        task_id: TaskId,
        creator: Address,
        title: String,
        description: String,
        points: u64,
        deadline: u64,
    },
    TaskAssigned {
        task_id: TaskId,
        assignee: Address,
    },
    TaskSubmitted {
        task_id: TaskId,
        proof: String,
    },
    TaskApproved {
        task_id: TaskId,
        assignee: Address,
        points: u64,
        title: String,
    },
    TaskRejected {
        task_id: TaskId,
    },
    RewardCreated {
        reward_id: RewardId,
        name: String,
        description: String,
        points_cost: u64,
        stock: u64,
        image_url: String,
    },
    RewardStockUpdated {
        reward_id: RewardId,
        stock: u64,
    },
    RewardExchanged {
        reward_id: RewardId,
        user: Address,
        name: String,
        points_cost: u64,
        remaining_stock: u64,
    },
    AppealCreated {
        appeal_id: AppealId,
        user: Address,
        points_change: u64,
        reason: String,
    },
    AppealResolved {
        appeal_id: AppealId,
        approved: bool,
    },
}

impl EventData {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "TaskCreated",
            Self::TaskAssigned { .. } => "TaskAssigned",
            Self::TaskSubmitted { .. } => "TaskSubmitted",
            Self::TaskApproved { .. } => "TaskApproved",
            Self::TaskRejected { .. } => "TaskRejected",
            Self::RewardCreated { .. } => "RewardCreated",
            Self::RewardStockUpdated { .. } => "RewardStockUpdated",
            Self::RewardExchanged { .. } => "RewardExchanged",
            Self::AppealCreated { .. } => "AppealCreated",
            Self::AppealResolved { .. } => "AppealResolved",
        }
    }

    pub fn stream(&self) -> EventStream {
        match self {
            Self::TaskCreated { .. }
            | Self::TaskAssigned { .. }
            | Self::TaskSubmitted { .. }
            | Self::TaskApproved { .. }
            | Self::TaskRejected { .. } => EventStream::Tasks,
            Self::RewardCreated { .. }
            | Self::RewardStockUpdated { .. }
            | Self::RewardExchanged { .. } => EventStream::Rewards,
            Self::AppealCreated { .. } | Self::AppealResolved { .. } => EventStream::Appeals,
        }
    }

    /// Ledger id of the entity this event touches
    pub fn entity_id(&self) -> u64 {
        match self {
            Self::TaskCreated { task_id, .. }
            | Self::TaskAssigned { task_id, .. }
            | Self::TaskSubmitted { task_id, .. }
            | Self::TaskApproved { task_id, .. }
            | Self::TaskRejected { task_id } => task_id.0,
            Self::RewardCreated { reward_id, .. }
            | Self::RewardStockUpdated { reward_id, .. }
            | Self::RewardExchanged { reward_id, .. } => reward_id.0,
            Self::AppealCreated { appeal_id, .. } | Self::AppealResolved { appeal_id, .. } => {
                appeal_id.0
            }
        }
    }
}

/// An event as it sits in the ledger's log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub data: EventData,
    pub stamp: LedgerStamp,
}

impl LedgerEvent {
    pub fn new(data: EventData, stamp: LedgerStamp) -> Self {
        Self { data, stamp }
    }

    pub fn block_number(&self) -> BlockNumber {
        self.stamp.block_number
    }

    pub fn stream(&self) -> EventStream {
        self.data.stream()
    }
}
