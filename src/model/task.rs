// Task - Mirror projection of a ledger task and its status machine

use crate::model::ids::{Address, AppealId, LedgerStamp, TaskId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Status of a task on the ledger.
///
/// The discriminants match the ledger's own encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TaskStatus {
    Created = 0,
    Assigned = 1,
    Submitted = 2,
    Completed = 3,
    Rejected = 4,
}

impl TaskStatus {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Created),
            1 => Some(Self::Assigned),
            2 => Some(Self::Submitted),
            3 => Some(Self::Completed),
            4 => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Position in the lifecycle. Both terminal states share the last rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Assigned => 1,
            Self::Submitted => 2,
            Self::Completed | Self::Rejected => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }

    /// Whether `next` is the legal successor of this status
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Assigned)
                | (Self::Assigned, Self::Submitted)
                | (Self::Submitted, Self::Completed)
                | (Self::Submitted, Self::Rejected)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Assigned => "assigned",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "assigned" => Ok(Self::Assigned),
            "submitted" => Ok(Self::Submitted),
            "completed" => Ok(Self::Completed),
            "rejected" => Ok(Self::Rejected),
            other => other
                .parse::<u8>()
                .ok()
                .and_then(Self::from_code)
                .ok_or_else(|| format!("unknown task status: {}", other)),
        }
    }
}

/// A status change on an existing task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskChange {
    Assigned { assignee: Address },
    Submitted { proof: String },
    Completed,
    Rejected,
}

impl TaskChange {
    /// Status the task ends in after this change
    pub fn target_status(&self) -> TaskStatus {
        match self {
            Self::Assigned { .. } => TaskStatus::Assigned,
            Self::Submitted { .. } => TaskStatus::Submitted,
            Self::Completed => TaskStatus::Completed,
            Self::Rejected => TaskStatus::Rejected,
        }
    }
}

/// Errors from applying a change to a task
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Illegal task transition {from} -> {to} on {task}")]
    IllegalTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Appeal {0} is already resolved")]
    AppealAlreadyResolved(AppealId),
}

/// Mirror record of a ledger task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub creator: Address,
    pub title: String,
    pub description: String,
    pub points: u64,
    pub assignee: Option<Address>,
    pub status: TaskStatus,
    /// Deadline as unix seconds
    pub deadline: u64,
    pub proof: Option<String>,
    /// Stamp of the ledger event that produced the current state
    pub stamp: LedgerStamp,
}

impl Task {
    /// Apply a status change carried by a later ledger event
    pub fn apply(&mut self, change: &TaskChange, stamp: LedgerStamp) -> Result<(), TransitionError> {
        let next = change.target_status();
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::IllegalTransition {
                task: self.id,
                from: self.status,
                to: next,
            });
        }

        match change {
            TaskChange::Assigned { assignee } => self.assignee = Some(assignee.clone()),
            TaskChange::Submitted { proof } => self.proof = Some(proof.clone()),
            TaskChange::Completed | TaskChange::Rejected => {}
        }

        self.status = next;
        self.stamp = stamp;
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}
