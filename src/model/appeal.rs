// Appeal - Mirror projection of a points appeal

use crate::model::ids::{Address, AppealId, LedgerStamp, TxHash};
use crate::model::task::TransitionError;
use serde::{Deserialize, Serialize};

/// Mirror record of a ledger appeal
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appeal {
    pub id: AppealId,
    pub user: Address,
    /// Magnitude of the disputed points change
    pub points_change: u64,
    pub reason: String,
    pub resolved: bool,
    pub approved: bool,
    pub created: LedgerStamp,
    pub resolution: Option<LedgerStamp>,
}

impl Appeal {
    pub fn new(id: AppealId, user: Address, points_change: u64, reason: String, created: LedgerStamp) -> Self {
        Self {
            id,
            user,
            points_change,
            reason,
            resolved: false,
            approved: false,
            created,
            resolution: None,
        }
    }

    /// Record the ledger's outcome. Points are not moved here.
    pub fn resolve(&mut self, approved: bool, stamp: LedgerStamp) -> Result<(), TransitionError> {
        if self.resolved {
            return Err(TransitionError::AppealAlreadyResolved(self.id));
        }
        self.resolved = true;
        self.approved = approved;
        self.resolution = Some(stamp);
        Ok(())
    }

    /// Stamp of the latest event applied to this appeal
    pub fn last_stamp(&self) -> &LedgerStamp {
        self.resolution.as_ref().unwrap_or(&self.created)
    }

    pub fn creation_tx_hash(&self) -> TxHash {
        self.created.tx_hash
    }

    pub fn resolution_tx_hash(&self) -> Option<TxHash> {
        self.resolution.map(|s| s.tx_hash)
    }

    /// Creation time as a block timestamp
    pub fn timestamp(&self) -> u64 {
        self.created.timestamp
    }
}
