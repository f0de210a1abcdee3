// Reward Service - Catalogue management and point redemption

use crate::artifact::ArtifactUploader;
use crate::ledger::LedgerCall;
use crate::model::{Address, ExchangeRecord, ExchangedReward, Reward, RewardId, Sequenced, MAX_POINTS};
use crate::reconcile::{OperationOutcome, ReconcileError, Reconciler};
use std::sync::Arc;
use tracing::{debug, info};

/// Arguments for a new reward
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewReward {
    pub name: String,
    pub description: String,
    pub points_cost: u64,
    pub stock: u64,
    /// Image bytes to upload before creating the reward
    pub image: Option<Vec<u8>>,
}

impl NewReward {
    pub fn new(name: &str, description: &str, points_cost: u64, stock: u64) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            points_cost,
            stock,
            image: None,
        }
    }

    pub fn with_image(mut self, bytes: Vec<u8>) -> Self {
        self.image = Some(bytes);
        self
    }
}

/// What the mirror says an exchange will look like.
///
/// Read before submission; the ledger may still disagree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeQuote {
    pub reward_id: RewardId,
    pub name: String,
    pub points_cost: u64,
    pub stock: u64,
    /// Display sequence the new exchange record will get
    pub next_sequence: u64,
    pub balance: i64,
}

impl ExchangeQuote {
    /// Optimistic local check. Passing it does not guarantee the ledger accepts.
    pub fn check(&self) -> Result<(), ReconcileError> {
        if self.stock == 0 {
            return Err(ReconcileError::SoldOut(self.reward_id));
        }
        let affordable = i64::try_from(self.points_cost).map_or(false, |cost| self.balance >= cost);
        if !affordable {
            return Err(ReconcileError::InsufficientBalance {
                available: self.balance,
                required: self.points_cost,
            });
        }
        Ok(())
    }
}

/// Reward workflow
#[derive(Clone)]
pub struct RewardService {
    reconciler: Reconciler,
    uploader: Arc<dyn ArtifactUploader>,
}

impl RewardService {
    pub fn new(reconciler: Reconciler, uploader: Arc<dyn ArtifactUploader>) -> Self {
        Self {
            reconciler,
            uploader,
        }
    }

    pub async fn create(&self, admin: &Address, reward: NewReward) -> Result<OperationOutcome, ReconcileError> {
        if reward.name.trim().is_empty() {
            return Err(ReconcileError::InvalidInput("name is required".to_string()));
        }
        if reward.points_cost > MAX_POINTS {
            return Err(ReconcileError::InvalidInput("points cost too large".to_string()));
        }
        self.reconciler.require_admin(admin).await?;

        let image_url = match &reward.image {
            Some(bytes) => {
                let url = self.uploader.upload(bytes).await?;
                info!(name = %reward.name, %url, "reward image uploaded");
                url
            }
            None => String::new(),
        };

        let call = LedgerCall::CreateReward {
            name: reward.name.trim().to_string(),
            description: reward.description,
            points_cost: reward.points_cost,
            stock: reward.stock,
            image_url,
        };
        self.reconciler.execute(call, admin).await
    }

    /// Set the absolute stock of a reward
    pub async fn update_stock(
        &self,
        admin: &Address,
        reward_id: RewardId,
        stock: u64,
    ) -> Result<OperationOutcome, ReconcileError> {
        self.reconciler.require_admin(admin).await?;
        self.reconciler.reward(reward_id).await?;
        self.reconciler
            .execute(LedgerCall::UpdateRewardStock { reward_id, stock }, admin)
            .await
    }

    /// Read what an exchange by `user` would cost and which sequence it gets
    pub async fn quote(&self, reward_id: RewardId, user: &Address) -> Result<ExchangeQuote, ReconcileError> {
        let reward = self.reconciler.reward(reward_id).await?;
        let store = self.reconciler.store();
        Ok(ExchangeQuote {
            reward_id,
            name: reward.name,
            points_cost: reward.points_cost,
            stock: reward.stock,
            next_sequence: store.exchange_count(reward_id)?,
            balance: store.balance(user)?,
        })
    }

    /// Redeem one unit of a reward
    pub async fn exchange(&self, user: &Address, reward_id: RewardId) -> Result<OperationOutcome, ReconcileError> {
        let quote = self.quote(reward_id, user).await?;
        quote.check()?;
        debug!(reward = %reward_id, %user, sequence = quote.next_sequence, "exchange pre-check passed");

        self.reconciler
            .execute(LedgerCall::ExchangeReward { reward_id }, user)
            .await
    }

    pub fn get(&self, reward_id: RewardId) -> Result<Option<Reward>, ReconcileError> {
        Ok(self.reconciler.store().get_reward(reward_id)?)
    }

    pub fn list(&self) -> Result<Vec<Reward>, ReconcileError> {
        Ok(self.reconciler.store().list_rewards()?)
    }

    pub fn exchanges(&self, reward_id: RewardId) -> Result<Vec<Sequenced<ExchangeRecord>>, ReconcileError> {
        Ok(self.reconciler.store().exchanges_for_reward(reward_id)?)
    }

    /// Rewards a user has redeemed, newest first
    pub fn exchanged_rewards(&self, user: &Address) -> Result<Vec<ExchangedReward>, ReconcileError> {
        Ok(self.reconciler.store().exchanged_rewards(user)?)
    }
}
