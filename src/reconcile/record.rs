// Canonical Records - Mirror writes derived from a single ledger event
//
// Both the live path and resync go through `records_for_event`, so a record
// written after a receipt is byte-identical to one rebuilt from history.

use crate::ledger::{EventData, LedgerEvent};
use crate::model::{Appeal, ExchangeRecord, PointsHistory, Reward, Task, TaskChange, TaskStatus};
use crate::storage::MirrorWrite;

/// Mirror writes that bring the mirror up to date with one event
pub fn records_for_event(event: &LedgerEvent) -> Vec<MirrorWrite> {
    let stamp = event.stamp;
    match &event.data {
        EventData::TaskCreated {
            task_id,
            creator,
            title,
            description,
            points,
            deadline,
        } => vec![MirrorWrite::PutTask(Task {
            id: *task_id,
            creator: creator.clone(),
            title: title.clone(),
            description: description.clone(),
            points: *points,
            assignee: None,
            status: TaskStatus::Created,
            deadline: *deadline,
            proof: None,
            stamp,
        })],
        EventData::TaskAssigned { task_id, assignee } => vec![MirrorWrite::PatchTask {
            task_id: *task_id,
            change: TaskChange::Assigned {
                assignee: assignee.clone(),
            },
            stamp,
        }],
        EventData::TaskSubmitted { task_id, proof } => vec![MirrorWrite::PatchTask {
            task_id: *task_id,
            change: TaskChange::Submitted {
                proof: proof.clone(),
            },
            stamp,
        }],
        EventData::TaskApproved {
            task_id,
            assignee,
            points,
            title,
        } => vec![
            MirrorWrite::PatchTask {
                task_id: *task_id,
                change: TaskChange::Completed,
                stamp,
            },
            MirrorWrite::AppendPoints(PointsHistory::task_reward(
                assignee.clone(),
                *points,
                title.clone(),
                stamp,
            )),
        ],
        EventData::TaskRejected { task_id } => vec![MirrorWrite::PatchTask {
            task_id: *task_id,
            change: TaskChange::Rejected,
            stamp,
        }],
        EventData::RewardCreated {
            reward_id,
            name,
            description,
            points_cost,
            stock,
            image_url,
        } => vec![MirrorWrite::PutReward(Reward::new(
            *reward_id,
            name.clone(),
            description.clone(),
            *points_cost,
            *stock,
            image_url.clone(),
            stamp,
        ))],
        EventData::RewardStockUpdated { reward_id, stock } => vec![MirrorWrite::PatchReward {
            reward_id: *reward_id,
            stock: *stock,
            stamp,
        }],
        EventData::RewardExchanged {
            reward_id,
            user,
            name,
            points_cost,
            remaining_stock,
        } => vec![
            MirrorWrite::PatchReward {
                reward_id: *reward_id,
                stock: *remaining_stock,
                stamp,
            },
            MirrorWrite::AppendExchange(ExchangeRecord::new(
                *reward_id,
                user.clone(),
                *points_cost,
                stamp,
            )),
            MirrorWrite::AppendPoints(PointsHistory::reward_exchange(
                user.clone(),
                *points_cost,
                name.clone(),
                stamp,
            )),
        ],
        EventData::AppealCreated {
            appeal_id,
            user,
            points_change,
            reason,
        } => vec![MirrorWrite::PutAppeal(Appeal::new(
            *appeal_id,
            user.clone(),
            *points_change,
            reason.clone(),
            stamp,
        ))],
        EventData::AppealResolved { appeal_id, approved } => vec![MirrorWrite::PatchAppeal {
            appeal_id: *appeal_id,
            approved: *approved,
            stamp,
        }],
    }
}
