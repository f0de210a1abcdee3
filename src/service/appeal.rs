// Appeal Service - Dispute a points change and record the ruling

use crate::ledger::LedgerCall;
use crate::model::{Address, Appeal, AppealId};
use crate::reconcile::{OperationOutcome, ReconcileError, Reconciler};
use crate::storage::AppealQuery;

#[derive(Clone)]
pub struct AppealService {
    reconciler: Reconciler,
}

impl AppealService {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }

    pub async fn create(
        &self,
        user: &Address,
        points_change: u64,
        reason: &str,
    ) -> Result<OperationOutcome, ReconcileError> {
        if reason.trim().is_empty() {
            return Err(ReconcileError::InvalidInput("reason is required".to_string()));
        }
        if points_change == 0 {
            return Err(ReconcileError::InvalidInput(
                "points change must be positive".to_string(),
            ));
        }

        let call = LedgerCall::CreateAppeal {
            points_change,
            reason: reason.trim().to_string(),
        };
        self.reconciler.execute(call, user).await
    }

    /// Record the ledger's ruling. Balances are not adjusted here.
    pub async fn resolve(
        &self,
        admin: &Address,
        appeal_id: AppealId,
        approve: bool,
    ) -> Result<OperationOutcome, ReconcileError> {
        self.reconciler.require_admin(admin).await?;
        self.reconciler.appeal(appeal_id).await?;
        self.reconciler
            .execute(LedgerCall::ResolveAppeal { appeal_id, approve }, admin)
            .await
    }

    pub fn get(&self, appeal_id: AppealId) -> Result<Option<Appeal>, ReconcileError> {
        Ok(self.reconciler.store().get_appeal(appeal_id)?)
    }

    pub fn list(&self, query: &AppealQuery) -> Result<Vec<Appeal>, ReconcileError> {
        Ok(self.reconciler.store().list_appeals(query)?)
    }

    pub fn pending_count(&self) -> Result<usize, ReconcileError> {
        Ok(self.reconciler.store().pending_appeal_count()?)
    }
}
