// Task Service - Create, claim, prove and review tasks

use crate::artifact::{ArtifactUploader, Attachment, ProofBundle, ProofFile};
use crate::ledger::LedgerCall;
use crate::model::{Address, Task, TaskId, MAX_POINTS};
use crate::reconcile::{OperationOutcome, ReconcileError, Reconciler};
use crate::storage::TaskQuery;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// Arguments for a new task
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub points: u64,
    /// Unix seconds
    pub deadline: u64,
}

impl NewTask {
    pub fn new(title: &str, description: &str, points: u64, deadline: u64) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            points,
            deadline,
        }
    }

    fn validate(&self) -> Result<(), ReconcileError> {
        if self.title.trim().is_empty() {
            return Err(ReconcileError::InvalidInput("title is required".to_string()));
        }
        if self.points == 0 {
            return Err(ReconcileError::InvalidInput("points must be positive".to_string()));
        }
        if self.points > MAX_POINTS {
            return Err(ReconcileError::InvalidInput("points too large".to_string()));
        }
        Ok(())
    }
}

/// Task workflow
#[derive(Clone)]
pub struct TaskService {
    reconciler: Reconciler,
    uploader: Arc<dyn ArtifactUploader>,
}

impl TaskService {
    pub fn new(reconciler: Reconciler, uploader: Arc<dyn ArtifactUploader>) -> Self {
        Self {
            reconciler,
            uploader,
        }
    }

    pub async fn create(&self, admin: &Address, task: NewTask) -> Result<OperationOutcome, ReconcileError> {
        task.validate()?;
        self.reconciler.require_admin(admin).await?;

        let call = LedgerCall::CreateTask {
            title: task.title.trim().to_string(),
            description: task.description,
            points: task.points,
            deadline: task.deadline,
        };
        self.reconciler.execute(call, admin).await
    }

    /// Claim a task for `member`
    pub async fn assign(&self, task_id: TaskId, member: &Address) -> Result<OperationOutcome, ReconcileError> {
        self.reconciler.task(task_id).await?;
        self.reconciler
            .execute(LedgerCall::AssignTask { task_id }, member)
            .await
    }

    /// Upload attachments, then submit the proof bundle.
    ///
    /// A failed upload aborts before anything reaches the ledger.
    pub async fn submit(
        &self,
        task_id: TaskId,
        member: &Address,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<OperationOutcome, ReconcileError> {
        if text.trim().is_empty() && attachments.is_empty() {
            return Err(ReconcileError::InvalidInput(
                "proof needs text or at least one file".to_string(),
            ));
        }
        self.reconciler.task(task_id).await?;

        let mut files = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let url = self.uploader.upload(&attachment.bytes).await?;
            info!(task = %task_id, file = %attachment.name, %url, "proof file uploaded");
            files.push(ProofFile {
                size: attachment.bytes.len() as u64,
                name: attachment.name,
                content_type: attachment.content_type,
                url,
            });
        }

        let proof = ProofBundle::new(text, files, Utc::now())
            .to_json()
            .map_err(|e| ReconcileError::InvalidInput(e.to_string()))?;

        self.reconciler
            .execute(LedgerCall::SubmitTask { task_id, proof }, member)
            .await
    }

    pub async fn approve(&self, admin: &Address, task_id: TaskId) -> Result<OperationOutcome, ReconcileError> {
        self.reconciler.require_admin(admin).await?;
        self.reconciler.task(task_id).await?;
        self.reconciler
            .execute(LedgerCall::ApproveTask { task_id }, admin)
            .await
    }

    pub async fn reject(&self, admin: &Address, task_id: TaskId) -> Result<OperationOutcome, ReconcileError> {
        self.reconciler.require_admin(admin).await?;
        self.reconciler.task(task_id).await?;
        self.reconciler
            .execute(LedgerCall::RejectTask { task_id }, admin)
            .await
    }

    pub fn get(&self, task_id: TaskId) -> Result<Option<Task>, ReconcileError> {
        Ok(self.reconciler.store().get_task(task_id)?)
    }

    pub fn list(&self, query: &TaskQuery) -> Result<Vec<Task>, ReconcileError> {
        Ok(self.reconciler.store().list_tasks(query)?)
    }
}
