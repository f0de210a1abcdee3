// In-Memory Ledger - Reference implementation of the points contract
//
// Enforces the same rules as the deployed contract: admin set, task state
// machine, stock and balance guards. Every call mines exactly one block.
// Used by tests and by the `simulate` command.

use crate::ledger::client::{
    AppealView, LedgerCall, LedgerClient, LedgerError, LedgerQuery, LedgerValue, Receipt,
    RewardView, TaskView,
};
use crate::ledger::event::{EventData, EventStream, LedgerEvent};
use crate::model::{
    Address, AppealId, BlockNumber, LedgerStamp, RewardId, TaskId, TaskStatus, TxHash, MAX_POINTS,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// CONFIG
// ============================================================================

/// Configuration for the in-memory ledger
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// Events returned by one `events` call, stretched to finish the last block
    pub page_size: usize,
    /// Delay before each call is mined, in milliseconds
    pub latency_ms: u64,
    /// Seconds between blocks
    pub block_time_secs: u64,
    /// Timestamp of block 0
    pub genesis_timestamp: u64,
}

impl LedgerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn with_block_time_secs(mut self, secs: u64) -> Self {
        self.block_time_secs = secs;
        self
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.page_size == 0 {
            return Err(LedgerError::Transport("page_size must be > 0".to_string()));
        }
        Ok(())
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            page_size: 256,
            latency_ms: 0,
            block_time_secs: 12,
            genesis_timestamp: 1_700_000_000,
        }
    }
}

// ============================================================================
// CONTRACT STATE
// ============================================================================

#[derive(Clone, Debug)]
struct TaskEntry {
    title: String,
    points: u64,
    assignee: Option<Address>,
    status: TaskStatus,
}

#[derive(Clone, Debug)]
struct RewardEntry {
    name: String,
    points_cost: u64,
    stock: u64,
}

#[derive(Clone, Debug)]
struct AppealEntry {
    resolved: bool,
    approved: bool,
}

#[derive(Debug, Default)]
struct ContractState {
    admins: HashSet<Address>,
    tasks: Vec<TaskEntry>,
    rewards: Vec<RewardEntry>,
    appeals: Vec<AppealEntry>,
    exchanges: HashMap<RewardId, u64>,
    points: HashMap<Address, i64>,
    log: Vec<LedgerEvent>,
    block: BlockNumber,
}

/// Collects the events of the call being mined
struct Emitter {
    tx_hash: TxHash,
    block: BlockNumber,
    timestamp: u64,
    events: Vec<LedgerEvent>,
}

impl Emitter {
    fn emit(&mut self, data: EventData) {
        let stamp = LedgerStamp {
            tx_hash: self.tx_hash,
            block_number: self.block,
            log_index: self.events.len() as u32,
            timestamp: self.timestamp,
        };
        self.events.push(LedgerEvent::new(data, stamp));
    }
}

impl ContractState {
    fn require_admin(&self, signer: &Address) -> Result<(), String> {
        if self.admins.contains(signer) {
            Ok(())
        } else {
            Err("caller is not an admin".to_string())
        }
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut TaskEntry, String> {
        self.tasks
            .get_mut(id.0 as usize)
            .ok_or_else(|| "task does not exist".to_string())
    }

    /// Run a call. All checks happen before any state is touched, so a
    /// revert leaves the contract unchanged.
    fn execute(&mut self, call: &LedgerCall, signer: &Address, out: &mut Emitter) -> Result<(), String> {
        if call.requires_admin() {
            self.require_admin(signer)?;
        }
        match call {
            LedgerCall::CreateTask { title, description, points, deadline } => {
                if title.trim().is_empty() {
                    return Err("title is required".to_string());
                }
                if *points == 0 {
                    return Err("points must be positive".to_string());
                }
                if *points > MAX_POINTS {
                    return Err("points too large".to_string());
                }
                let task_id = TaskId(self.tasks.len() as u64);
                self.tasks.push(TaskEntry {
                    title: title.clone(),
                    points: *points,
                    assignee: None,
                    status: TaskStatus::Created,
                });
                out.emit(EventData::TaskCreated {
                    task_id,
                    creator: signer.clone(),
                    title: title.clone(),
                    description: description.clone(),
                    points: *points,
                    deadline: *deadline,
                });
            }
            LedgerCall::AssignTask { task_id } => {
                let task = self.task_mut(*task_id)?;
                if task.status != TaskStatus::Created {
                    return Err("task is not open for assignment".to_string());
                }
                task.assignee = Some(signer.clone());
                task.status = TaskStatus::Assigned;
                out.emit(EventData::TaskAssigned {
                    task_id: *task_id,
                    assignee: signer.clone(),
                });
            }
            LedgerCall::SubmitTask { task_id, proof } => {
                let task = self.task_mut(*task_id)?;
                if task.status != TaskStatus::Assigned {
                    return Err("task is not assigned".to_string());
                }
                if task.assignee.as_ref() != Some(signer) {
                    return Err("caller is not the assignee".to_string());
                }
                task.status = TaskStatus::Submitted;
                out.emit(EventData::TaskSubmitted {
                    task_id: *task_id,
                    proof: proof.clone(),
                });
            }
            LedgerCall::ApproveTask { task_id } => {
                let task = self.task_mut(*task_id)?;
                if task.status != TaskStatus::Submitted {
                    return Err("task is not submitted".to_string());
                }
                let assignee = task
                    .assignee
                    .clone()
                    .ok_or_else(|| "task has no assignee".to_string())?;
                let (points, title) = (task.points, task.title.clone());
                let credited = i64::try_from(points)
                    .ok()
                    .and_then(|p| self.points.get(&assignee).copied().unwrap_or(0).checked_add(p))
                    .ok_or_else(|| "points overflow".to_string())?;
                self.task_mut(*task_id)?.status = TaskStatus::Completed;
                self.points.insert(assignee.clone(), credited);
                out.emit(EventData::TaskApproved {
                    task_id: *task_id,
                    assignee,
                    points,
                    title,
                });
            }
            LedgerCall::RejectTask { task_id } => {
                let task = self.task_mut(*task_id)?;
                if task.status != TaskStatus::Submitted {
                    return Err("task is not submitted".to_string());
                }
                task.status = TaskStatus::Rejected;
                out.emit(EventData::TaskRejected { task_id: *task_id });
            }
            LedgerCall::CreateReward { name, description, points_cost, stock, image_url } => {
                if name.trim().is_empty() {
                    return Err("name is required".to_string());
                }
                if *points_cost > MAX_POINTS {
                    return Err("points cost too large".to_string());
                }
                let reward_id = RewardId(self.rewards.len() as u64);
                self.rewards.push(RewardEntry {
                    name: name.clone(),
                    points_cost: *points_cost,
                    stock: *stock,
                });
                out.emit(EventData::RewardCreated {
                    reward_id,
                    name: name.clone(),
                    description: description.clone(),
                    points_cost: *points_cost,
                    stock: *stock,
                    image_url: image_url.clone(),
                });
            }
            LedgerCall::UpdateRewardStock { reward_id, stock } => {
                let reward = self
                    .rewards
                    .get_mut(reward_id.0 as usize)
                    .ok_or_else(|| "reward does not exist".to_string())?;
                reward.stock = *stock;
                out.emit(EventData::RewardStockUpdated {
                    reward_id: *reward_id,
                    stock: *stock,
                });
            }
            LedgerCall::ExchangeReward { reward_id } => {
                let balance = self.points.get(signer).copied().unwrap_or(0);
                let reward = self
                    .rewards
                    .get_mut(reward_id.0 as usize)
                    .ok_or_else(|| "reward does not exist".to_string())?;
                if reward.stock == 0 {
                    return Err("reward sold out".to_string());
                }
                let remaining_balance = i64::try_from(reward.points_cost)
                    .ok()
                    .filter(|cost| balance >= *cost)
                    .map(|cost| balance - cost)
                    .ok_or_else(|| "insufficient points".to_string())?;
                reward.stock -= 1;
                let (name, cost, remaining) = (reward.name.clone(), reward.points_cost, reward.stock);
                self.points.insert(signer.clone(), remaining_balance);
                *self.exchanges.entry(*reward_id).or_insert(0) += 1;
                out.emit(EventData::RewardExchanged {
                    reward_id: *reward_id,
                    user: signer.clone(),
                    name,
                    points_cost: cost,
                    remaining_stock: remaining,
                });
            }
            LedgerCall::CreateAppeal { points_change, reason } => {
                if reason.trim().is_empty() {
                    return Err("reason is required".to_string());
                }
                let appeal_id = AppealId(self.appeals.len() as u64);
                self.appeals.push(AppealEntry {
                    resolved: false,
                    approved: false,
                });
                out.emit(EventData::AppealCreated {
                    appeal_id,
                    user: signer.clone(),
                    points_change: *points_change,
                    reason: reason.clone(),
                });
            }
            LedgerCall::ResolveAppeal { appeal_id, approve } => {
                let appeal = self
                    .appeals
                    .get_mut(appeal_id.0 as usize)
                    .ok_or_else(|| "appeal does not exist".to_string())?;
                if appeal.resolved {
                    return Err("appeal already resolved".to_string());
                }
                appeal.resolved = true;
                appeal.approved = *approve;
                out.emit(EventData::AppealResolved {
                    appeal_id: *appeal_id,
                    approved: *approve,
                });
            }
        }
        Ok(())
    }

    fn answer(&self, query: &LedgerQuery) -> LedgerValue {
        match query {
            LedgerQuery::IsAdmin(addr) => LedgerValue::Bool(self.admins.contains(addr)),
            LedgerQuery::UserPoints(addr) => {
                LedgerValue::Points(self.points.get(addr).copied().unwrap_or(0))
            }
            LedgerQuery::Task(id) => LedgerValue::Task(self.tasks.get(id.0 as usize).map(|t| {
                TaskView {
                    id: *id,
                    status: t.status,
                    assignee: t.assignee.clone(),
                    points: t.points,
                }
            })),
            LedgerQuery::Reward(id) => {
                LedgerValue::Reward(self.rewards.get(id.0 as usize).map(|r| RewardView {
                    id: *id,
                    points_cost: r.points_cost,
                    stock: r.stock,
                }))
            }
            LedgerQuery::Appeal(id) => {
                LedgerValue::Appeal(self.appeals.get(id.0 as usize).map(|a| AppealView {
                    id: *id,
                    resolved: a.resolved,
                    approved: a.approved,
                }))
            }
            LedgerQuery::TaskCount => LedgerValue::Count(self.tasks.len() as u64),
            LedgerQuery::RewardCount => LedgerValue::Count(self.rewards.len() as u64),
            LedgerQuery::AppealCount => LedgerValue::Count(self.appeals.len() as u64),
            LedgerQuery::ExchangeCount(id) => {
                LedgerValue::Count(self.exchanges.get(id).copied().unwrap_or(0))
            }
            LedgerQuery::BlockNumber => LedgerValue::Count(self.block),
        }
    }
}

fn tx_hash_for(block: BlockNumber, signer: &Address, method: &str) -> TxHash {
    let mut hasher = Sha256::new();
    hasher.update(b"tx:");
    hasher.update(block.to_be_bytes());
    hasher.update(signer.as_str().as_bytes());
    hasher.update(method.as_bytes());
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    TxHash::from_bytes(bytes)
}

// ============================================================================
// IN-MEMORY LEDGER
// ============================================================================

/// A single-process ledger with contract semantics.
///
/// Calls are serialized by one lock, so two racing calls on the same entity
/// get distinct blocks and only the first can succeed.
pub struct InMemoryLedger {
    config: LedgerConfig,
    state: Mutex<ContractState>,
    pending_rejection: Mutex<Option<String>>,
    call_count: AtomicUsize,
}

impl InMemoryLedger {
    /// Create a ledger whose deployer is the first admin
    pub fn new(owner: Address) -> Self {
        Self::with_config(owner, LedgerConfig::default())
    }

    pub fn with_config(owner: Address, config: LedgerConfig) -> Self {
        let mut state = ContractState::default();
        state.admins.insert(owner);
        Self {
            config,
            state: Mutex::new(state),
            pending_rejection: Mutex::new(None),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Add an admin directly, as the contract owner would
    pub fn grant_admin(&self, address: Address) {
        if let Ok(mut state) = self.state.lock() {
            state.admins.insert(address);
        }
    }

    /// Make the signer refuse the next call
    pub fn reject_next_call(&self, reason: &str) {
        if let Ok(mut pending) = self.pending_rejection.lock() {
            *pending = Some(reason.to_string());
        }
    }

    /// Number of calls received, including rejected ones
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Total events in the log
    pub fn event_count(&self) -> usize {
        self.state.lock().map(|s| s.log.len()).unwrap_or(0)
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, ContractState>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Transport("ledger state lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn call(&self, call: &LedgerCall, signer: &Address) -> Result<Receipt, LedgerError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        let rejection = self
            .pending_rejection
            .lock()
            .map_err(|_| LedgerError::Transport("signer lock poisoned".to_string()))?
            .take();
        if let Some(reason) = rejection {
            return Err(LedgerError::SigningRejected(reason));
        }

        let mut state = self.lock_state()?;
        state.block += 1;
        let block = state.block;
        let timestamp = self.config.genesis_timestamp + block * self.config.block_time_secs;
        let tx_hash = tx_hash_for(block, signer, call.method());
        let mut emitter = Emitter {
            tx_hash,
            block,
            timestamp,
            events: Vec::new(),
        };

        let receipt = match state.execute(call, signer, &mut emitter) {
            Ok(()) => {
                state.log.extend(emitter.events.iter().cloned());
                Receipt {
                    tx_hash,
                    block_number: block,
                    timestamp,
                    success: true,
                    revert_reason: None,
                    events: emitter.events,
                }
            }
            Err(reason) => Receipt {
                tx_hash,
                block_number: block,
                timestamp,
                success: false,
                revert_reason: Some(reason),
                events: Vec::new(),
            },
        };

        Ok(receipt)
    }

    async fn query(&self, query: &LedgerQuery) -> Result<LedgerValue, LedgerError> {
        let state = self.lock_state()?;
        Ok(state.answer(query))
    }

    async fn events(
        &self,
        stream: EventStream,
        from_block: BlockNumber,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        let state = self.lock_state()?;
        let mut page: Vec<LedgerEvent> = Vec::new();
        for event in state
            .log
            .iter()
            .filter(|e| e.stream() == stream && e.block_number() >= from_block)
        {
            // Pages close on a block boundary
            let full = page.len() >= self.config.page_size;
            if full && page.last().map_or(true, |last| last.block_number() != event.block_number()) {
                break;
            }
            page.push(event.clone());
        }
        Ok(page)
    }
}
