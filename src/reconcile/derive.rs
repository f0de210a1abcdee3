// Receipt Derivation - Turns a committed call's receipt into mirror writes

use crate::ledger::{EventData, LedgerCall, Receipt};
use crate::reconcile::record::records_for_event;
use crate::storage::MirrorWrite;
use thiserror::Error;

/// Errors deriving mirror writes from a receipt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeriveError {
    #[error("Receipt for {method} carries no {expected} event")]
    MissingEvent {
        method: &'static str,
        expected: &'static str,
    },

    #[error("Receipt for {method} targets #{found}, call targeted #{expected}")]
    TargetMismatch {
        method: &'static str,
        expected: u64,
        found: u64,
    },
}

/// Event a successful call must emit
pub fn expected_event(call: &LedgerCall) -> &'static str {
    match call {
        LedgerCall::CreateTask { .. } => "TaskCreated",
        LedgerCall::AssignTask { .. } => "TaskAssigned",
        LedgerCall::SubmitTask { .. } => "TaskSubmitted",
        LedgerCall::ApproveTask { .. } => "TaskApproved",
        LedgerCall::RejectTask { .. } => "TaskRejected",
        LedgerCall::CreateReward { .. } => "RewardCreated",
        LedgerCall::UpdateRewardStock { .. } => "RewardStockUpdated",
        LedgerCall::ExchangeReward { .. } => "RewardExchanged",
        LedgerCall::CreateAppeal { .. } => "AppealCreated",
        LedgerCall::ResolveAppeal { .. } => "AppealResolved",
    }
}

/// Default derivation: every event in the receipt, in log order
pub fn derive_writes(call: &LedgerCall, receipt: &Receipt) -> Result<Vec<MirrorWrite>, DeriveError> {
    let expected = expected_event(call);
    let primary = receipt
        .events
        .iter()
        .find(|e| e.data.name() == expected)
        .ok_or(DeriveError::MissingEvent {
            method: call.method(),
            expected,
        })?;

    if let Some(target) = call.target_id() {
        let found = primary.data.entity_id();
        if found != target {
            return Err(DeriveError::TargetMismatch {
                method: call.method(),
                expected: target,
                found,
            });
        }
    }

    Ok(receipt.events.iter().flat_map(records_for_event).collect())
}

/// Id of the entity a creation call produced
pub fn created_id(receipt: &Receipt) -> Option<u64> {
    receipt.events.iter().find_map(|e| match &e.data {
        EventData::TaskCreated { task_id, .. } => Some(task_id.0),
        EventData::RewardCreated { reward_id, .. } => Some(reward_id.0),
        EventData::AppealCreated { appeal_id, .. } => Some(appeal_id.0),
        _ => None,
    })
}
