// Points Service - Balances and history, read from the mirror

use crate::ledger::LedgerQuery;
use crate::model::{Address, PointsHistory, Sequenced};
use crate::reconcile::{ReconcileError, Reconciler};
use serde::Serialize;

/// Mirror and ledger balance side by side
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BalanceCheck {
    pub user: Address,
    pub mirror: i64,
    pub ledger: i64,
}

impl BalanceCheck {
    pub fn is_consistent(&self) -> bool {
        self.mirror == self.ledger
    }
}

#[derive(Clone)]
pub struct PointsService {
    reconciler: Reconciler,
}

impl PointsService {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }

    /// History rows, newest first
    pub fn history(&self, user: &Address) -> Result<Vec<Sequenced<PointsHistory>>, ReconcileError> {
        Ok(self.reconciler.store().points_history(user)?)
    }

    /// Balance as the sum of mirrored history
    pub fn balance(&self, user: &Address) -> Result<i64, ReconcileError> {
        Ok(self.reconciler.store().balance(user)?)
    }

    pub async fn ledger_balance(&self, user: &Address) -> Result<i64, ReconcileError> {
        Ok(self
            .reconciler
            .ledger()
            .query(&LedgerQuery::UserPoints(user.clone()))
            .await?
            .into_points()?)
    }

    pub async fn check_balance(&self, user: &Address) -> Result<BalanceCheck, ReconcileError> {
        Ok(BalanceCheck {
            user: user.clone(),
            mirror: self.balance(user)?,
            ledger: self.ledger_balance(user).await?,
        })
    }
}
