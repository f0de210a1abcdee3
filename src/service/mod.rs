// Service module - CALLER-FACING WORKFLOWS
// Thin sequencing of reconciled operations; no state of their own

mod appeal;
mod points;
mod reward;
mod task;

pub use appeal::AppealService;
pub use points::{BalanceCheck, PointsService};
pub use reward::{ExchangeQuote, NewReward, RewardService};
pub use task::{NewTask, TaskService};

use crate::artifact::ArtifactUploader;
use crate::model::{Address, BlockNumber};
use crate::reconcile::{ReconcileError, Reconciler};
use std::sync::Arc;

/// All workflows over one reconciler
#[derive(Clone)]
pub struct Services {
    pub tasks: TaskService,
    pub rewards: RewardService,
    pub appeals: AppealService,
    pub points: PointsService,
    reconciler: Reconciler,
}

impl Services {
    pub fn new(reconciler: Reconciler, uploader: Arc<dyn ArtifactUploader>) -> Self {
        Self {
            tasks: TaskService::new(reconciler.clone(), uploader.clone()),
            rewards: RewardService::new(reconciler.clone(), uploader),
            appeals: AppealService::new(reconciler.clone()),
            points: PointsService::new(reconciler.clone()),
            reconciler,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Current head block of the ledger
    pub async fn head_block(&self) -> Result<BlockNumber, ReconcileError> {
        Ok(self.reconciler.ledger().head_block().await?)
    }

    pub async fn is_admin(&self, address: &Address) -> Result<bool, ReconcileError> {
        Ok(self.reconciler.ledger().is_admin(address).await?)
    }
}
