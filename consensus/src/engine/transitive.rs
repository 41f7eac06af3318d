//! # Transitive Engine
//!
//! The concurrent lifecycle around the voting core. The engine owns the
//! channels, background tasks, and bookkeeping that connect three
//! worlds: the VM (which builds and applies blocks), the network layer
//! (which delivers gossiped blocks and votes), and the voting core
//! (which decides).
//!
//! ## Task model
//!
//! `start` spawns two background tasks, both watching one shutdown
//! channel:
//!
//! - the **vote handler** drains the bounded vote channel and turns each
//!   accept vote into a mini-poll against the core;
//! - the **sweep loop** wakes every ~50 ms and clears pending records
//!   whose blocks were decided outside a poll (dead-on-arrival
//!   admissions, state syncs), delivering their VM callbacks.
//!
//! `stop` flips the shutdown channel once and waits for both tasks. The
//! lifecycle is one-shot: a stopped engine stays stopped.
//!
//! ## Coordination
//!
//! There is exactly one consensus lock: the async mutex around the
//! voting core. VM accept/reject callbacks run inside `record_poll` via
//! [`DecisionHooks`], so decision order is causal and a failed accept
//! halts the cascade with the failing block still undecided. Everything
//! else the engine tracks lives in lock-free structures — a `DashMap`
//! for pending blocks and atomics for counters — so no second lock
//! exists to deadlock against the first.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex as StateMutex;
use tokio::sync::{mpsc, watch, Mutex as CoreMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::consensus::{Bag, ChainConsensus, ConsensusError, DecisionHooks};
use crate::engine::syncer::{self, SyncError};
use crate::storage::StateStore;
use crate::types::{
    BlockInfo, BlockProposal, EngineStats, Id, Notification, Status, Vote, VoteKind, VoteRequest,
};
use crate::vm::{Block, BlockProposer, ChainVm};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the engine's public surface.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// `start` was called on an engine that is running or already spent.
    #[error("engine already started")]
    AlreadyStarted,
    /// The operation requires a started engine.
    #[error("engine not started")]
    NotStarted,
    /// The configuration failed validation at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] crate::config::ParameterError),
    /// The voting core refused an operation.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    /// A VM call failed where the failure is not locally recoverable.
    #[error("vm {op} failed")]
    Vm {
        /// The VM operation that failed.
        op: &'static str,
        /// The VM's error.
        #[source]
        source: anyhow::Error,
    },
}

// ---------------------------------------------------------------------------
// Options & Lifecycle
// ---------------------------------------------------------------------------

/// The collaborator handles an engine is constructed over.
pub struct EngineOptions {
    /// The block-building state machine.
    pub vm: Arc<dyn ChainVm>,
    /// Outbound network surface for proposals and vote requests.
    pub proposer: Arc<dyn BlockProposer>,
    /// Metadata store for crash recovery. Optional: an engine without a
    /// store runs fine but loses its head pointer on restart.
    pub store: Option<Arc<dyn StateStore>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Started,
    Stopped,
}

// ---------------------------------------------------------------------------
// Pending Blocks
// ---------------------------------------------------------------------------

/// Engine-side record of a block admitted but not yet finalized.
struct PendingBlock {
    info: BlockInfo,
    /// VM handle for the accept/reject callback. Absent only for blocks
    /// the engine learned about without a VM object.
    vm_block: Option<Arc<dyn Block>>,
    /// When the record was created. Kept for debugging slow decisions.
    #[allow(dead_code)]
    proposed_at: Instant,
    accept_votes: u64,
    reject_votes: u64,
}

// ---------------------------------------------------------------------------
// Shared engine state
// ---------------------------------------------------------------------------

struct Inner {
    config: EngineConfig,
    core: CoreMutex<ChainConsensus>,
    vm: Arc<dyn ChainVm>,
    proposer: Arc<dyn BlockProposer>,
    store: Option<Arc<dyn StateStore>>,
    pending: DashMap<Id, PendingBlock>,
    pending_builds: AtomicU64,
    /// Serializes build drains so concurrent notifies coalesce.
    build_gate: CoreMutex<()>,
    votes_received: AtomicU64,
    blocks_accepted: AtomicU64,
    blocks_rejected: AtomicU64,
    bootstrapped: AtomicBool,
    lifecycle: StateMutex<Lifecycle>,
    vote_tx: mpsc::Sender<Vote>,
}

/// The VM-callback side of the voting core's decisions.
///
/// Runs while the core mutex is held, which is exactly the
/// single-coordination-primitive shape: decisions and their callbacks
/// are one serialized sequence, and nothing here takes another lock.
#[async_trait]
impl DecisionHooks for Inner {
    async fn accepted(&self, id: Id, height: u64) -> anyhow::Result<()> {
        let vm_block = self.pending.get(&id).and_then(|rec| rec.vm_block.clone());
        match vm_block {
            Some(block) => block.accept().await?,
            None => debug!(block = %id.short(), "no vm handle for accepted block"),
        }
        if let Err(e) = self.vm.set_preference(id).await {
            warn!(block = %id.short(), error = %e, "set_preference failed after accept");
        }
        self.pending.remove(&id);
        self.blocks_accepted.fetch_add(1, Ordering::Relaxed);
        info!(block = %id.short(), height, "finalized block delivered to vm");
        Ok(())
    }

    async fn rejected(&self, id: Id, height: u64) -> anyhow::Result<()> {
        let vm_block = self.pending.get(&id).and_then(|rec| rec.vm_block.clone());
        if let Some(block) = vm_block {
            block.reject().await?;
        }
        self.pending.remove(&id);
        self.blocks_rejected.fetch_add(1, Ordering::Relaxed);
        debug!(block = %id.short(), height, "rejected block delivered to vm");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The consensus engine's public surface.
///
/// Safe to share behind an `Arc` and call concurrently from the network
/// layer, the VM, and operator tooling.
pub struct Engine {
    inner: Arc<Inner>,
    vote_rx: StateMutex<Option<mpsc::Receiver<Vote>>>,
    shutdown_tx: StateMutex<Option<watch::Sender<bool>>>,
    tasks: StateMutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Creates an engine with the default configuration.
    pub fn new(options: EngineOptions) -> Result<Self, EngineError> {
        Self::with_config(EngineConfig::default(), options)
    }

    /// Creates an engine with an explicit configuration. Parameters are
    /// validated here; a misconfigured engine never constructs.
    pub fn with_config(config: EngineConfig, options: EngineOptions) -> Result<Self, EngineError> {
        config.validate()?;

        let (vote_tx, vote_rx) = mpsc::channel(config.vote_buffer);
        let core = ChainConsensus::new(config.params, Id::EMPTY);

        let inner = Arc::new(Inner {
            config,
            core: CoreMutex::new(core),
            vm: options.vm,
            proposer: options.proposer,
            store: options.store,
            pending: DashMap::new(),
            pending_builds: AtomicU64::new(0),
            build_gate: CoreMutex::new(()),
            votes_received: AtomicU64::new(0),
            blocks_accepted: AtomicU64::new(0),
            blocks_rejected: AtomicU64::new(0),
            bootstrapped: AtomicBool::new(false),
            lifecycle: StateMutex::new(Lifecycle::Created),
            vote_tx,
        });

        Ok(Self {
            inner,
            vote_rx: StateMutex::new(Some(vote_rx)),
            shutdown_tx: StateMutex::new(None),
            tasks: StateMutex::new(Vec::new()),
        })
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Starts the engine: seeds the core from the VM's accepted head and
    /// spawns the background tasks. One-shot — restarting a stopped
    /// engine is refused.
    pub async fn start(&self) -> Result<(), EngineError> {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if *lifecycle != Lifecycle::Created {
                return Err(EngineError::AlreadyStarted);
            }
            *lifecycle = Lifecycle::Started;
        }

        if let Err(e) = self.bootstrap().await {
            // Give the caller a chance to fix the VM and retry.
            *self.inner.lifecycle.lock() = Lifecycle::Created;
            return Err(e);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let vote_rx = self
            .vote_rx
            .lock()
            .take()
            .expect("vote receiver is present until the first successful start");

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(vote_loop(
            Arc::clone(&self.inner),
            vote_rx,
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(sweep_loop(
            Arc::clone(&self.inner),
            shutdown_rx,
        )));
        drop(tasks);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        self.inner.bootstrapped.store(true, Ordering::Relaxed);
        info!(k = self.inner.config.params.k, "consensus engine started");
        Ok(())
    }

    /// Seeds the voting core from the VM's accepted head, cross-checking
    /// any persisted pointer from a previous run.
    async fn bootstrap(&self) -> Result<(), EngineError> {
        let head = self
            .inner
            .vm
            .last_accepted()
            .await
            .map_err(|source| EngineError::Vm {
                op: "last_accepted",
                source,
            })?;
        if head.is_empty() {
            debug!("vm reports no accepted head, starting from genesis");
            return Ok(());
        }

        let block = self
            .inner
            .vm
            .get_block(head)
            .await
            .map_err(|source| EngineError::Vm {
                op: "get_block",
                source,
            })?;
        let height = block.height();

        if let Some(store) = &self.inner.store {
            match syncer::load_persisted_state(store.as_ref()) {
                Ok(state) if !state.last_accepted.is_empty() && state.last_accepted != head => {
                    warn!(
                        persisted = %state.last_accepted.short(),
                        vm = %head.short(),
                        "persisted head disagrees with vm, trusting the vm"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "could not read persisted state"),
            }
        }

        self.inner.core.lock().await.sync_state(head, height);
        info!(head = %head.short(), height, "bootstrapped from vm head");
        Ok(())
    }

    /// Stops the engine and waits for its background tasks to exit.
    /// Idempotent; stopping a never-started engine is a no-op.
    pub async fn stop(&self) -> Result<(), EngineError> {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Created => return Ok(()),
                Lifecycle::Stopped => return Ok(()),
                Lifecycle::Started => *lifecycle = Lifecycle::Stopped,
            }
        }

        if let Some(shutdown) = self.shutdown_tx.lock().take() {
            let _ = shutdown.send(true);
        }
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        self.inner.bootstrapped.store(false, Ordering::Relaxed);
        info!("consensus engine stopped");
        Ok(())
    }

    fn is_started(&self) -> bool {
        *self.inner.lifecycle.lock() == Lifecycle::Started
    }

    // -- Block build coordination -------------------------------------------

    /// Handles a notification from the VM.
    ///
    /// `PendingTransactions` queues a build request and immediately
    /// drains the build queue. Build failures are non-fatal (the queue
    /// is cleared; the VM re-notifies when it has work again), but a
    /// failing accept callback during the self-vote poll propagates.
    pub async fn notify(&self, notification: Notification) -> Result<(), EngineError> {
        match notification {
            Notification::PendingTransactions => {
                if !self.is_started() {
                    debug!("build notification ignored, engine not started");
                    return Ok(());
                }
                self.inner.pending_builds.fetch_add(1, Ordering::Relaxed);
                self.drain_builds().await
            }
            Notification::StateSyncDone => {
                debug!("state sync done notification");
                Ok(())
            }
        }
    }

    /// Builds blocks until the outstanding-request counter drains or the
    /// VM errors. Serialized by the build gate so concurrent notifies
    /// coalesce into one drain.
    async fn drain_builds(&self) -> Result<(), EngineError> {
        let inner = &self.inner;
        let _gate = inner.build_gate.lock().await;

        while inner.pending_builds.load(Ordering::Relaxed) > 0 {
            let block = match inner.vm.build_block().await {
                Ok(block) => block,
                Err(e) => {
                    // The VM has nothing (or is unwell). Clear the queue
                    // rather than hammering it; it will notify again.
                    warn!(error = %e, "block build failed, clearing build queue");
                    inner.pending_builds.store(0, Ordering::Relaxed);
                    break;
                }
            };
            inner.pending_builds.fetch_sub(1, Ordering::Relaxed);
            self.admit_built_block(block).await?;
        }
        Ok(())
    }

    /// Admits a locally built block, gossips it, and records the
    /// proposer's self-vote.
    async fn admit_built_block(&self, block: Arc<dyn Block>) -> Result<(), EngineError> {
        let inner = &self.inner;
        let info = block_info(block.as_ref());
        let id = info.id;

        if inner.pending.len() >= inner.config.max_pending_blocks && !inner.pending.contains_key(&id)
        {
            warn!(block = %id.short(), "pending map full, refusing built block");
            return Ok(());
        }

        {
            let mut core = inner.core.lock().await;
            match core.add_block(info.clone()) {
                Ok(_) => {}
                Err(ConsensusError::DuplicateBlock(_)) => {
                    // Another path admitted it first; keep going so the
                    // self-vote still lands.
                    debug!(block = %id.short(), "built block already admitted");
                }
                Err(e) => {
                    warn!(block = %id.short(), error = %e, "built block refused by core");
                    return Ok(());
                }
            }
        }

        inner
            .pending
            .entry(id)
            .or_insert_with(|| PendingBlock {
                info: info.clone(),
                vm_block: Some(Arc::clone(&block)),
                proposed_at: Instant::now(),
                accept_votes: 0,
                reject_votes: 0,
            })
            .accept_votes += 1;

        let proposal = BlockProposal {
            block_id: id,
            bytes: info.bytes.clone(),
            height: info.height,
            parent_id: info.parent_id,
        };
        let request = VoteRequest {
            block_id: id,
            bytes: info.bytes.clone(),
            validators: Vec::new(),
        };
        let (proposed, requested) = tokio::join!(
            inner.proposer.propose(proposal),
            inner.proposer.request_votes(request)
        );
        if let Err(e) = proposed {
            warn!(block = %id.short(), error = %e, "propose failed");
        }
        if let Err(e) = requested {
            warn!(block = %id.short(), error = %e, "vote request failed");
        }

        info!(block = %id.short(), height = info.height, "built block proposed");
        self.mini_poll(id).await
    }

    /// Number of outstanding build-block notifications.
    pub fn pending_build_blocks(&self) -> u64 {
        self.inner.pending_builds.load(Ordering::Relaxed)
    }

    // -- Incoming blocks ----------------------------------------------------

    /// Handles a gossiped block from a peer.
    ///
    /// Parse and verification failures are logged and dropped — a peer
    /// sending garbage must not hurt the replica. An unknown parent is
    /// returned to the caller so the network layer can fetch ancestors.
    pub async fn handle_incoming_block(&self, bytes: bytes::Bytes, from: &str) -> Result<(), EngineError> {
        if !self.is_started() {
            debug!(%from, "incoming block ignored, engine not started");
            return Ok(());
        }
        let inner = &self.inner;

        let block = match inner.vm.parse_block(bytes).await {
            Ok(block) => block,
            Err(e) => {
                warn!(%from, error = %e, "failed to parse gossiped block");
                return Ok(());
            }
        };
        if let Err(e) = block.verify().await {
            warn!(block = %block.id().short(), %from, error = %e, "gossiped block failed verification");
            return Ok(());
        }

        let info = block_info(block.as_ref());
        let id = info.id;

        if inner.pending.len() >= inner.config.max_pending_blocks && !inner.pending.contains_key(&id)
        {
            warn!(block = %id.short(), %from, "pending map full, dropping gossiped block");
            return Ok(());
        }

        let known = inner.pending.contains_key(&id);
        inner
            .pending
            .entry(id)
            .or_insert_with(|| PendingBlock {
                info: info.clone(),
                vm_block: Some(Arc::clone(&block)),
                proposed_at: Instant::now(),
                accept_votes: 0,
                reject_votes: 0,
            })
            .accept_votes += 1;

        {
            let mut core = inner.core.lock().await;
            match core.add_block(info.clone()) {
                Ok(_) => {}
                Err(ConsensusError::DuplicateBlock(_)) => {
                    debug!(block = %id.short(), %from, "gossiped block already admitted");
                }
                Err(e @ ConsensusError::UnknownParent { .. }) => {
                    if !known {
                        inner.pending.remove(&id);
                    }
                    return Err(EngineError::Consensus(e));
                }
                Err(e) => return Err(EngineError::Consensus(e)),
            }
        }

        debug!(block = %id.short(), height = info.height, %from, "gossiped block admitted");
        self.mini_poll(id).await
    }

    /// Feeds the accumulated accept votes for one block through the core
    /// as a single-entry poll.
    async fn mini_poll(&self, id: Id) -> Result<(), EngineError> {
        let inner = &self.inner;
        let votes = match inner.pending.get(&id) {
            Some(rec) => rec.accept_votes,
            None => return Ok(()),
        };
        if votes == 0 {
            return Ok(());
        }

        let mut bag = Bag::new();
        bag.add_count(id, votes.min(u64::from(inner.config.params.k)));

        let mut core = inner.core.lock().await;
        core.record_poll(&bag, inner.as_ref() as &dyn DecisionHooks)
            .await
            .map_err(EngineError::Consensus)?;
        Ok(())
    }

    // -- Votes --------------------------------------------------------------

    /// Enqueues a vote for the background handler.
    ///
    /// Returns whether the vote was queued: `false` when the engine is
    /// not started or the channel is full. Never blocks.
    pub fn receive_vote(&self, vote: Vote) -> bool {
        if !self.is_started() {
            return false;
        }
        self.inner.vote_tx.try_send(vote).is_ok()
    }

    // -- Queries ------------------------------------------------------------

    /// True if the block is known and accepted.
    pub async fn is_accepted(&self, id: Id) -> bool {
        self.inner.core.lock().await.is_accepted(&id)
    }

    /// The replica's current preference.
    pub async fn preference(&self) -> Id {
        self.inner.core.lock().await.preference()
    }

    /// The deepest accepted block and its height.
    pub async fn last_accepted(&self) -> (Id, u64) {
        self.inner.core.lock().await.last_accepted()
    }

    /// A snapshot of the engine's counters and consensus pointers.
    pub async fn stats(&self) -> EngineStats {
        let inner = &self.inner;
        let (processing, (last_accepted, last_accepted_height), preference) = {
            let core = inner.core.lock().await;
            (core.num_processing(), core.last_accepted(), core.preference())
        };
        EngineStats {
            bootstrapped: inner.bootstrapped.load(Ordering::Relaxed),
            processing: processing as u64,
            pending_blocks: inner.pending.len() as u64,
            blocks_accepted: inner.blocks_accepted.load(Ordering::Relaxed),
            blocks_rejected: inner.blocks_rejected.load(Ordering::Relaxed),
            votes_received: inner.votes_received.load(Ordering::Relaxed),
            pending_build_blocks: inner.pending_builds.load(Ordering::Relaxed),
            last_accepted,
            last_accepted_height,
            preference,
        }
    }

    /// Stats for operators, or `NotStarted` when the engine is down.
    pub async fn health_check(&self) -> Result<EngineStats, EngineError> {
        if !self.is_started() {
            return Err(EngineError::NotStarted);
        }
        Ok(self.stats().await)
    }

    // -- Administration -----------------------------------------------------

    /// Re-points consensus at an externally decided head: purges stale
    /// in-memory state, persists the head when a store is attached, and
    /// marks the replica bootstrapped.
    pub async fn sync_state(&self, head: Id, height: u64) {
        let dropped = {
            let mut core = self.inner.core.lock().await;
            core.sync_state(head, height)
        };
        for id in &dropped {
            self.inner.pending.remove(id);
        }

        let stale: Vec<Id> = self
            .inner
            .pending
            .iter()
            .filter(|rec| rec.info.height <= height)
            .map(|rec| *rec.key())
            .collect();
        for id in stale {
            self.inner.pending.remove(&id);
        }

        if let Some(store) = &self.inner.store {
            if let Err(e) = syncer::persist_head(store.as_ref(), head, height) {
                warn!(error = %e, "failed to persist synced head, continuing in memory");
            }
        }
        self.inner.bootstrapped.store(true, Ordering::Relaxed);
    }

    /// Runs the full imported-head reconciliation against this engine's
    /// own store and VM.
    pub async fn apply_imported_head(&self, head: Id) -> Result<u64, SyncError> {
        let store = self.inner.store.clone().ok_or(SyncError::StoreMissing)?;
        let vm = Arc::clone(&self.inner.vm);
        syncer::apply_imported_head(store.as_ref(), vm.as_ref(), Some(self), head).await
    }
}

/// Projects a VM block handle into the engine's lightweight record.
fn block_info(block: &dyn Block) -> BlockInfo {
    BlockInfo {
        id: block.id(),
        parent_id: block.parent_id(),
        height: block.height(),
        timestamp_ms: block.timestamp_ms(),
        bytes: block.bytes(),
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Drains the vote channel, one mini-poll per accept vote.
async fn vote_loop(
    inner: Arc<Inner>,
    mut votes: mpsc::Receiver<Vote>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("vote handler started");
    loop {
        let vote = tokio::select! {
            _ = shutdown.changed() => break,
            received = votes.recv() => match received {
                Some(vote) => vote,
                None => break,
            },
        };
        inner.votes_received.fetch_add(1, Ordering::Relaxed);

        let accept_votes = {
            let Some(mut rec) = inner.pending.get_mut(&vote.block_id) else {
                debug!(block = %vote.block_id.short(), voter = %vote.voter, "vote for unknown block dropped");
                continue;
            };
            match vote.kind {
                VoteKind::Accept => rec.accept_votes += 1,
                VoteKind::Reject => rec.reject_votes += 1,
            }
            rec.accept_votes
        };

        // Every dequeued vote triggers a mini-poll carrying the block's
        // accumulated accept count. Reject votes are tallied but never
        // drive acceptance; their poll round still re-evaluates every
        // undecided block's confidence streak.
        let mut bag = Bag::new();
        bag.add_count(vote.block_id, accept_votes.min(u64::from(inner.config.params.k)));
        let mut core = inner.core.lock().await;
        if let Err(e) = core
            .record_poll(&bag, inner.as_ref() as &dyn DecisionHooks)
            .await
        {
            error!(block = %vote.block_id.short(), error = %e, "poll failed while handling vote");
        }
    }
    debug!("vote handler exited");
}

/// Periodic sweep over the pending map.
///
/// Delivers VM callbacks for blocks that were decided outside a poll
/// (dead-on-arrival admissions) and drops records whose blocks were
/// purged by a state sync. All VM calls happen with no lock held.
async fn sweep_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.config.poll_interval);
    debug!("decision sweep started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        sweep_once(&inner).await;
    }
    debug!("decision sweep exited");
}

async fn sweep_once(inner: &Arc<Inner>) {
    let ids: Vec<Id> = inner.pending.iter().map(|rec| *rec.key()).collect();
    for id in ids {
        let status = { inner.core.lock().await.status(&id) };
        match status {
            Status::Processing => {}
            Status::Unknown => {
                // Purged by a state sync while the record lingered.
                inner.pending.remove(&id);
            }
            Status::Accepted => {
                let Some(vm_block) = inner.pending.get(&id).map(|rec| rec.vm_block.clone()) else {
                    continue;
                };
                if let Some(block) = vm_block {
                    if let Err(e) = block.accept().await {
                        error!(block = %id.short(), error = %e, "accept callback failed in sweep");
                        inner.pending.remove(&id);
                        continue;
                    }
                }
                let (last, _) = { inner.core.lock().await.last_accepted() };
                if let Err(e) = inner.vm.set_preference(last).await {
                    warn!(block = %id.short(), error = %e, "set_preference failed in sweep");
                }
                if inner.pending.remove(&id).is_some() {
                    inner.blocks_accepted.fetch_add(1, Ordering::Relaxed);
                }
            }
            Status::Rejected => {
                let Some(vm_block) = inner.pending.get(&id).map(|rec| rec.vm_block.clone()) else {
                    continue;
                };
                if let Some(block) = vm_block {
                    if let Err(e) = block.reject().await {
                        error!(block = %id.short(), error = %e, "reject callback failed in sweep");
                        inner.pending.remove(&id);
                        continue;
                    }
                }
                if inner.pending.remove(&id).is_some() {
                    inner.blocks_rejected.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
