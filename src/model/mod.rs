// Model module - THE MIRRORED RECORDS
// Entity projections kept in the mirror, keyed by ledger-assigned ids

mod appeal;
mod ids;
mod points;
mod reward;
mod task;

pub use appeal::Appeal;
pub use ids::{
    Address, AppealId, BlockNumber, EntityKind, IdError, LedgerStamp, RecordId, RewardId,
    Sequenced, TaskId, TxHash,
};
pub use points::{balance, sequenced_balance, PointsHistory, PointsKind, PointsStatus, MAX_POINTS};
pub use reward::{ExchangeRecord, ExchangedReward, Reward, RewardStatus};
pub use task::{Task, TaskChange, TaskStatus, TransitionError};
