// Resync - Rebuilds and verifies the mirror from the ledger's event log
//
// The only writer allowed to touch the mirror out of line with a live
// operation. Every write it makes is an idempotent upsert, so it can run
// concurrently with live operations and with itself.

use crate::ledger::{EventStream, LedgerClient, LedgerError, LedgerEvent, LedgerQuery};
use crate::model::{Address, AppealId, BlockNumber, RewardId, TaskId};
use crate::reconcile::desync::{replay_points, DesyncQueue};
use crate::reconcile::record::records_for_event;
use crate::storage::{MirrorStore, MirrorWriter, StoreError, WriteOutcome};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Errors from a resync pass
#[derive(Error, Debug)]
pub enum ResyncError {
    #[error("Ledger read failed during resync: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Mirror access failed during resync: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid resync config: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// CONFIG
// ============================================================================

/// Configuration for resync passes and the background worker
#[derive(Clone, Debug)]
pub struct ResyncConfig {
    /// Seconds between periodic passes
    pub interval_secs: u64,
    /// Event pages read per stream per pass
    pub max_pages: usize,
}

impl ResyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages;
        self
    }

    pub fn validate(&self) -> Result<(), ResyncError> {
        if self.interval_secs == 0 {
            return Err(ResyncError::InvalidConfig("interval_secs must be > 0".to_string()));
        }
        if self.max_pages == 0 {
            return Err(ResyncError::InvalidConfig("max_pages must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            max_pages: 64,
        }
    }
}

// ============================================================================
// REPORTS
// ============================================================================

/// Outcome of one pass over one stream
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub stream: Option<EventStream>,
    pub from_block: BlockNumber,
    pub head_block: BlockNumber,
    pub events: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub stale: usize,
    pub failed: usize,
    /// Stopped at the page limit before reaching the head
    pub truncated: bool,
    pub errors: Vec<String>,
}

impl ResyncReport {
    fn new(stream: EventStream, from_block: BlockNumber, head_block: BlockNumber) -> Self {
        Self {
            stream: Some(stream),
            from_block,
            head_block,
            ..Self::default()
        }
    }

    fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Applied => self.applied += 1,
            WriteOutcome::Unchanged => self.unchanged += 1,
            WriteOutcome::Stale => self.stale += 1,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0 && !self.truncated
    }
}

/// What disagrees between the ledger and the mirror
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum DriftSubject {
    Task(TaskId),
    Reward(RewardId),
    Exchanges(RewardId),
    Appeal(AppealId),
    Balance(Address),
}

impl DriftSubject {
    /// Streams whose replay can fix this drift
    pub fn streams(&self) -> &'static [EventStream] {
        match self {
            Self::Task(_) => &[EventStream::Tasks],
            Self::Reward(_) | Self::Exchanges(_) => &[EventStream::Rewards],
            Self::Appeal(_) => &[EventStream::Appeals],
            Self::Balance(_) => &[EventStream::Tasks, EventStream::Rewards],
        }
    }
}

impl fmt::Display for DriftSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(id) => write!(f, "{}", id),
            Self::Reward(id) => write!(f, "{}", id),
            Self::Exchanges(id) => write!(f, "exchanges of {}", id),
            Self::Appeal(id) => write!(f, "{}", id),
            Self::Balance(user) => write!(f, "balance of {}", user),
        }
    }
}

/// One disagreement
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Drift {
    pub subject: DriftSubject,
    pub ledger: String,
    pub mirror: String,
}

/// Result of comparing the mirror with ledger queries
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub checked: usize,
    pub drifts: Vec<Drift>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.drifts.is_empty()
    }

    /// Streams that need replay, in canonical order
    pub fn streams(&self) -> Vec<EventStream> {
        EventStream::ALL
            .into_iter()
            .filter(|s| self.drifts.iter().any(|d| d.subject.streams().contains(s)))
            .collect()
    }

    fn check<T: PartialEq + fmt::Debug>(&mut self, subject: DriftSubject, ledger: T, mirror: T) {
        self.checked += 1;
        if ledger != mirror {
            self.drifts.push(Drift {
                subject,
                ledger: format!("{:?}", ledger),
                mirror: format!("{:?}", mirror),
            });
        }
    }
}

/// Outcome of a repair
#[derive(Clone, Debug, Default, Serialize)]
pub struct RepairReport {
    pub initial: DriftReport,
    pub resynced: Vec<EventStream>,
    pub rebuilt: Vec<EventStream>,
    pub remaining: DriftReport,
}

// ============================================================================
// RESYNC
// ============================================================================

/// Replays ledger events into the mirror
pub struct Resync {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<MirrorStore>,
    config: ResyncConfig,
}

impl Resync {
    pub fn new(ledger: Arc<dyn LedgerClient>, store: Arc<MirrorStore>, config: ResyncConfig) -> Self {
        Self {
            ledger,
            store,
            config,
        }
    }

    pub fn config(&self) -> &ResyncConfig {
        &self.config
    }

    /// Replay a stream from just after its checkpoint
    pub async fn run(&self, stream: EventStream) -> Result<ResyncReport, ResyncError> {
        let start = match self.store.checkpoint(stream)? {
            Some(block) => block + 1,
            None => 0,
        };
        self.replay(stream, start).await
    }

    /// Replay a stream from `block` or its checkpoint, whichever is earlier
    pub async fn run_from(&self, stream: EventStream, block: BlockNumber) -> Result<ResyncReport, ResyncError> {
        let start = match self.store.checkpoint(stream)? {
            Some(checkpoint) => block.min(checkpoint + 1),
            None => 0,
        };
        self.replay(stream, start).await
    }

    /// One pass over every stream
    pub async fn run_all(&self) -> Result<Vec<ResyncReport>, ResyncError> {
        let mut reports = Vec::with_capacity(EventStream::ALL.len());
        for stream in EventStream::ALL {
            reports.push(self.run(stream).await?);
        }
        Ok(reports)
    }

    /// Drop a stream's records and replay it from genesis
    pub async fn rebuild(&self, stream: EventStream) -> Result<ResyncReport, ResyncError> {
        let removed = self.store.clear_stream(stream)?;
        warn!(%stream, removed, "rebuilding stream from genesis");
        self.replay(stream, 0).await
    }

    /// Replay the streams named by queued desyncs
    pub async fn drain_desyncs(&self, queue: &DesyncQueue) -> Result<Vec<ResyncReport>, ResyncError> {
        let desyncs = queue.drain();
        if desyncs.is_empty() {
            return Ok(Vec::new());
        }
        info!(count = desyncs.len(), "replaying desynced streams");

        let mut reports = Vec::new();
        for (stream, block) in replay_points(&desyncs) {
            reports.push(self.run_from(stream, block).await?);
        }
        Ok(reports)
    }

    async fn replay(&self, stream: EventStream, start: BlockNumber) -> Result<ResyncReport, ResyncError> {
        let head = self.ledger.head_block().await?;
        let mut report = ResyncReport::new(stream, start, head);
        if start > head {
            return Ok(report);
        }

        let mut from = start;
        let mut last_seen: Option<(BlockNumber, u32)> = None;
        let mut pages = 0;

        loop {
            let page = self.ledger.events(stream, from).await?;
            pages += 1;

            let fresh: Vec<_> = page
                .iter()
                .filter(|e| e.block_number() <= head)
                .filter(|e| last_seen.map_or(true, |seen| e.stamp.position() > seen))
                .collect();
            if fresh.is_empty() {
                // Pages close on block boundaries, so a page of block `from` alone holds all of it
                let whole_block = !page.is_empty() && page.iter().all(|e| e.block_number() == from);
                if !(whole_block && from < head) {
                    break;
                }
                from += 1;
            } else {
                for event in fresh {
                    report.events += 1;
                    for write in records_for_event(event) {
                        match self.store.apply(&write) {
                            Ok(outcome) => {
                                debug!(%stream, block = event.block_number(), %write, ?outcome, "resync write");
                                report.record(outcome);
                            }
                            Err(e) => {
                                warn!(%stream, block = event.block_number(), %write, error = %e, "resync write failed");
                                report.failed += 1;
                                report.errors.push(format!("{}: {}", write, e));
                            }
                        }
                    }
                    last_seen = Some(event.stamp.position());
                }
                from = last_seen.map_or(from, |(block, _)| block);
            }

            if pages >= self.config.max_pages {
                // Head may belong to another stream; only unread events count
                report.truncated = from <= head && self.has_unread(stream, from, last_seen, head).await?;
                break;
            }
        }

        if report.is_complete() {
            self.store.set_checkpoint(stream, head)?;
        } else if report.truncated && report.failed == 0 {
            // Every block up to the last event seen was read whole
            if let Some((block, _)) = last_seen {
                self.store.set_checkpoint(stream, block)?;
            }
        }

        info!(
            %stream,
            from = start,
            head,
            events = report.events,
            applied = report.applied,
            failed = report.failed,
            "resync pass finished"
        );
        Ok(report)
    }

    /// Whether events past `last_seen` remain at or after `from`
    async fn has_unread(
        &self,
        stream: EventStream,
        from: BlockNumber,
        last_seen: Option<(BlockNumber, u32)>,
        head: BlockNumber,
    ) -> Result<bool, ResyncError> {
        let unread = |e: &LedgerEvent| {
            e.block_number() <= head && last_seen.map_or(true, |seen| e.stamp.position() > seen)
        };
        let page = self.ledger.events(stream, from).await?;
        if page.iter().any(|e| unread(e)) {
            return Ok(true);
        }
        // A page of block `from` alone says nothing about later blocks
        if from < head && !page.is_empty() && page.iter().all(|e| e.block_number() == from) {
            let later = self.ledger.events(stream, from + 1).await?;
            return Ok(later.iter().any(|e| unread(e)));
        }
        Ok(false)
    }

    // ========================================================================
    // VERIFICATION
    // ========================================================================

    /// Compare mirror records with direct ledger queries
    pub async fn verify(&self) -> Result<DriftReport, ResyncError> {
        let mut report = DriftReport::default();

        let tasks = self.ledger.query(&LedgerQuery::TaskCount).await?.into_count()?;
        for id in (0..tasks).map(TaskId) {
            let ledger = self.ledger.query(&LedgerQuery::Task(id)).await?.into_task()?;
            let mirror = self.store.get_task(id)?;
            report.check(
                DriftSubject::Task(id),
                ledger.map(|t| (t.status, t.assignee)),
                mirror.map(|t| (t.status, t.assignee)),
            );
        }

        let rewards = self.ledger.query(&LedgerQuery::RewardCount).await?.into_count()?;
        for id in (0..rewards).map(RewardId) {
            let ledger = self.ledger.query(&LedgerQuery::Reward(id)).await?.into_reward()?;
            let mirror = self.store.get_reward(id)?;
            report.check(
                DriftSubject::Reward(id),
                ledger.map(|r| r.stock),
                mirror.map(|r| r.stock),
            );

            let ledger_count = self
                .ledger
                .query(&LedgerQuery::ExchangeCount(id))
                .await?
                .into_count()?;
            report.check(DriftSubject::Exchanges(id), ledger_count, self.store.exchange_count(id)?);
        }

        let appeals = self.ledger.query(&LedgerQuery::AppealCount).await?.into_count()?;
        for id in (0..appeals).map(AppealId) {
            let ledger = self.ledger.query(&LedgerQuery::Appeal(id)).await?.into_appeal()?;
            let mirror = self.store.get_appeal(id)?;
            report.check(
                DriftSubject::Appeal(id),
                ledger.map(|a| (a.resolved, a.approved)),
                mirror.map(|a| (a.resolved, a.approved)),
            );
        }

        let mut users: BTreeSet<Address> = self.store.users()?.into_iter().collect();
        for task in self.store.list_tasks(&Default::default())? {
            if let Some(assignee) = task.assignee {
                users.insert(assignee);
            }
        }
        for user in users {
            let ledger = self
                .ledger
                .query(&LedgerQuery::UserPoints(user.clone()))
                .await?
                .into_points()?;
            let mirror = self.store.balance(&user)?;
            report.check(DriftSubject::Balance(user), ledger, mirror);
        }

        if report.is_clean() {
            debug!(checked = report.checked, "mirror matches ledger");
        } else {
            warn!(checked = report.checked, drifts = report.drifts.len(), "mirror drift detected");
        }
        Ok(report)
    }

    /// Resync drifted streams, then rebuild any that still drift
    pub async fn repair(&self) -> Result<RepairReport, ResyncError> {
        let initial = self.verify().await?;
        if initial.is_clean() {
            return Ok(RepairReport {
                remaining: initial.clone(),
                initial,
                ..RepairReport::default()
            });
        }

        let resynced = initial.streams();
        for stream in &resynced {
            self.run(*stream).await?;
        }

        let mut rebuilt = Vec::new();
        let after_resync = self.verify().await?;
        for stream in after_resync.streams() {
            self.rebuild(stream).await?;
            rebuilt.push(stream);
        }

        let remaining = if rebuilt.is_empty() {
            after_resync
        } else {
            self.verify().await?
        };
        if !remaining.is_clean() {
            error!(drifts = remaining.drifts.len(), "drift remains after rebuild");
        }

        Ok(RepairReport {
            initial,
            resynced,
            rebuilt,
            remaining,
        })
    }
}

// ============================================================================
// BACKGROUND WORKER
// ============================================================================

/// Runs resync when desyncs are queued and on a fixed interval
pub struct ResyncWorker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ResyncWorker {
    pub fn spawn(resync: Arc<Resync>, queue: DesyncQueue) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let interval = resync.config().interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = queue.notified() => {
                        if let Err(e) = resync.drain_desyncs(&queue).await {
                            error!(error = %e, "desync replay failed");
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = resync.run_all().await {
                            error!(error = %e, "periodic resync failed");
                        }
                    }
                }
            }
            debug!("resync worker stopped");
        });

        Self { shutdown, handle }
    }

    /// Stop the worker and wait for its current pass to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
