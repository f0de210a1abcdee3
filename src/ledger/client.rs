// Ledger Client - The signed-call, query and event surface of the ledger
//
// Every state change in the system is one `LedgerCall` signed by an address.
// A returned `Receipt` is final: the ledger never reorgs it away.

use crate::ledger::event::{EventStream, LedgerEvent};
use crate::model::{
    Address, AppealId, BlockNumber, RewardId, TaskId, TaskStatus, TxHash,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// CALLS
// ============================================================================

/// A state-changing contract method with its arguments
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCall {
    CreateTask {
        title: String,
        description: String,
        points: u64,
        deadline: u64,
    },
    AssignTask {
        task_id: TaskId,
    },
    SubmitTask {
        task_id: TaskId,
        proof: String,
    },
    ApproveTask {
        task_id: TaskId,
    },
    RejectTask {
        task_id: TaskId,
    },
    CreateReward {
        name: String,
        description: String,
        points_cost: u64,
        stock: u64,
        image_url: String,
    },
    UpdateRewardStock {
        reward_id: RewardId,
        stock: u64,
    },
    ExchangeReward {
        reward_id: RewardId,
    },
    CreateAppeal {
        points_change: u64,
        reason: String,
    },
    ResolveAppeal {
        appeal_id: AppealId,
        approve: bool,
    },
}

impl LedgerCall {
    /// Contract method name
    pub fn method(&self) -> &'static str {
        match self {
            Self::CreateTask { .. } => "createTask",
            Self::AssignTask { .. } => "assignTask",
            Self::SubmitTask { .. } => "submitTask",
            Self::ApproveTask { .. } => "approveTask",
            Self::RejectTask { .. } => "rejectTask",
            Self::CreateReward { .. } => "createReward",
            Self::UpdateRewardStock { .. } => "updateRewardStock",
            Self::ExchangeReward { .. } => "exchangeReward",
            Self::CreateAppeal { .. } => "createAppeal",
            Self::ResolveAppeal { .. } => "resolveAppeal",
        }
    }

    /// Event stream the call's effects are published on
    pub fn stream(&self) -> EventStream {
        match self {
            Self::CreateTask { .. }
            | Self::AssignTask { .. }
            | Self::SubmitTask { .. }
            | Self::ApproveTask { .. }
            | Self::RejectTask { .. } => EventStream::Tasks,
            Self::CreateReward { .. }
            | Self::UpdateRewardStock { .. }
            | Self::ExchangeReward { .. } => EventStream::Rewards,
            Self::CreateAppeal { .. } | Self::ResolveAppeal { .. } => EventStream::Appeals,
        }
    }

    /// Existing entity the call targets, `None` for creations
    pub fn target_id(&self) -> Option<u64> {
        match self {
            Self::AssignTask { task_id }
            | Self::SubmitTask { task_id, .. }
            | Self::ApproveTask { task_id }
            | Self::RejectTask { task_id } => Some(task_id.0),
            Self::UpdateRewardStock { reward_id, .. } | Self::ExchangeReward { reward_id } => {
                Some(reward_id.0)
            }
            Self::ResolveAppeal { appeal_id, .. } => Some(appeal_id.0),
            Self::CreateTask { .. } | Self::CreateReward { .. } | Self::CreateAppeal { .. } => None,
        }
    }

    /// Whether the contract restricts the method to admins
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Self::CreateTask { .. }
                | Self::ApproveTask { .. }
                | Self::RejectTask { .. }
                | Self::CreateReward { .. }
                | Self::UpdateRewardStock { .. }
                | Self::ResolveAppeal { .. }
        )
    }
}

// ============================================================================
// RECEIPT
// ============================================================================

/// Final outcome of a mined call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: BlockNumber,
    /// Block timestamp in seconds
    pub timestamp: u64,
    pub success: bool,
    pub revert_reason: Option<String>,
    /// Events emitted by the call, in log order
    pub events: Vec<LedgerEvent>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.success
    }
}

// ============================================================================
// QUERIES
// ============================================================================

/// Read-only contract queries
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerQuery {
    IsAdmin(Address),
    UserPoints(Address),
    Task(TaskId),
    Reward(RewardId),
    Appeal(AppealId),
    TaskCount,
    RewardCount,
    AppealCount,
    ExchangeCount(RewardId),
    BlockNumber,
}

/// Ledger-side view of a task, as returned by a query
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: TaskId,
    pub status: TaskStatus,
    pub assignee: Option<Address>,
    pub points: u64,
}

/// Ledger-side view of a reward
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardView {
    pub id: RewardId,
    pub points_cost: u64,
    pub stock: u64,
}

/// Ledger-side view of an appeal
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppealView {
    pub id: AppealId,
    pub resolved: bool,
    pub approved: bool,
}

/// Value returned by a query
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerValue {
    Bool(bool),
    Points(i64),
    Count(u64),
    Task(Option<TaskView>),
    Reward(Option<RewardView>),
    Appeal(Option<AppealView>),
}

impl LedgerValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Points(_) => "points",
            Self::Count(_) => "count",
            Self::Task(_) => "task",
            Self::Reward(_) => "reward",
            Self::Appeal(_) => "appeal",
        }
    }

    fn unexpected(&self, expected: &'static str) -> LedgerError {
        LedgerError::UnexpectedValue {
            expected,
            found: self.kind(),
        }
    }

    pub fn into_bool(self) -> Result<bool, LedgerError> {
        match self {
            Self::Bool(b) => Ok(b),
            other => Err(other.unexpected("bool")),
        }
    }

    pub fn into_points(self) -> Result<i64, LedgerError> {
        match self {
            Self::Points(p) => Ok(p),
            other => Err(other.unexpected("points")),
        }
    }

    pub fn into_count(self) -> Result<u64, LedgerError> {
        match self {
            Self::Count(c) => Ok(c),
            other => Err(other.unexpected("count")),
        }
    }

    pub fn into_task(self) -> Result<Option<TaskView>, LedgerError> {
        match self {
            Self::Task(t) => Ok(t),
            other => Err(other.unexpected("task")),
        }
    }

    pub fn into_reward(self) -> Result<Option<RewardView>, LedgerError> {
        match self {
            Self::Reward(r) => Ok(r),
            other => Err(other.unexpected("reward")),
        }
    }

    pub fn into_appeal(self) -> Result<Option<AppealView>, LedgerError> {
        match self {
            Self::Appeal(a) => Ok(a),
            other => Err(other.unexpected("appeal")),
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors reaching or reading the ledger.
///
/// A reverted call is not an error at this level: it comes back as a
/// `Receipt` with `success == false`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Signer rejected the transaction: {0}")]
    SigningRejected(String),

    #[error("Ledger transport failed: {0}")]
    Transport(String),

    #[error("Ledger returned {found}, expected {expected}")]
    UnexpectedValue {
        expected: &'static str,
        found: &'static str,
    },
}

// ============================================================================
// CLIENT TRAIT
// ============================================================================

/// Access to the authoritative ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Sign and submit a call, returning once the receipt is final
    async fn call(&self, call: &LedgerCall, signer: &Address) -> Result<Receipt, LedgerError>;

    /// Run a read-only query
    async fn query(&self, query: &LedgerQuery) -> Result<LedgerValue, LedgerError>;

    /// Events on `stream` at or after `from_block`, in log order.
    ///
    /// Returns at most one page; callers resume from the last block seen,
    /// so a page should not end partway through a block. A block with more
    /// events than fit in a page cannot be read past.
    async fn events(&self, stream: EventStream, from_block: BlockNumber)
        -> Result<Vec<LedgerEvent>, LedgerError>;

    /// Current head block
    async fn head_block(&self) -> Result<BlockNumber, LedgerError> {
        self.query(&LedgerQuery::BlockNumber).await?.into_count()
    }

    /// Whether `address` is an admin of the contract
    async fn is_admin(&self, address: &Address) -> Result<bool, LedgerError> {
        self.query(&LedgerQuery::IsAdmin(address.clone())).await?.into_bool()
    }
}
