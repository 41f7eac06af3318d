//! End-to-end integration tests for the firn consensus engine.
//!
//! These tests exercise the crate through its public surface only: the
//! voting core driven with batched polls, the engine driven through
//! notifications, gossip, and votes, and the imported-head
//! reconciliation path against a real (temporary) metadata store.
//!
//! Each test stands alone with its own harness. No shared state, no
//! test ordering dependencies.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use firn_consensus::{
    apply_imported_head, load_persisted_state, Bag, Block, BlockInfo, BlockProposal,
    BlockProposer, ChainConsensus, ChainVm, Engine, EngineConfig, EngineOptions, Id, MetaStore,
    NoopHooks, Notification, Parameters, PollOutcome, StateStore, Status, Vote, VoteRequest,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn id(byte: u8) -> Id {
    Id::new([byte; 32])
}

fn info(block: Id, parent: Id, height: u64) -> BlockInfo {
    BlockInfo {
        id: block,
        parent_id: parent,
        height,
        timestamp_ms: 0,
        bytes: Bytes::new(),
    }
}

fn params(k: u32, alpha: u32, beta: u32) -> Parameters {
    Parameters {
        k,
        alpha_preference: alpha,
        alpha_confidence: alpha,
        beta,
    }
}

async fn poll(core: &mut ChainConsensus, votes: &[(Id, u64)]) -> PollOutcome {
    let bag: Bag<Id> = votes.iter().copied().collect();
    core.record_poll(&bag, &NoopHooks).await.expect("poll")
}

/// A block the fake VM can hand to the engine. Tracks callback counts
/// so tests can assert the at-most-once contract.
struct FakeBlock {
    id: Id,
    parent_id: Id,
    height: u64,
    bytes: Bytes,
    accepts: AtomicU64,
    rejects: AtomicU64,
}

impl FakeBlock {
    fn new(seed: &[u8], parent_id: Id, height: u64) -> Arc<Self> {
        let bytes = Bytes::from(seed.to_vec());
        Arc::new(Self {
            id: Id::digest(&bytes),
            parent_id,
            height,
            bytes,
            accepts: AtomicU64::new(0),
            rejects: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl Block for FakeBlock {
    fn id(&self) -> Id {
        self.id
    }
    fn parent_id(&self) -> Id {
        self.parent_id
    }
    fn height(&self) -> u64 {
        self.height
    }
    fn timestamp_ms(&self) -> u64 {
        0
    }
    fn status(&self) -> Status {
        Status::Processing
    }
    fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }
    async fn verify(&self) -> anyhow::Result<()> {
        Ok(())
    }
    async fn accept(&self) -> anyhow::Result<()> {
        self.accepts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
    async fn reject(&self) -> anyhow::Result<()> {
        self.rejects.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// In-memory VM: a map of known blocks, a build queue, and the pointers
/// the engine updates.
#[derive(Default)]
struct FakeVm {
    known: Mutex<HashMap<Id, Arc<FakeBlock>>>,
    build_queue: Mutex<VecDeque<Arc<FakeBlock>>>,
    preference: Mutex<Id>,
    head: Mutex<Id>,
}

impl FakeVm {
    fn learn(&self, block: &Arc<FakeBlock>) {
        self.known.lock().insert(block.id, Arc::clone(block));
    }

    fn stage_build(&self, block: &Arc<FakeBlock>) {
        self.learn(block);
        self.build_queue.lock().push_back(Arc::clone(block));
    }
}

#[async_trait]
impl ChainVm for FakeVm {
    async fn build_block(&self) -> anyhow::Result<Arc<dyn Block>> {
        self.build_queue
            .lock()
            .pop_front()
            .map(|b| b as Arc<dyn Block>)
            .ok_or_else(|| anyhow::anyhow!("no transactions"))
    }

    async fn get_block(&self, id: Id) -> anyhow::Result<Arc<dyn Block>> {
        self.known
            .lock()
            .get(&id)
            .cloned()
            .map(|b| b as Arc<dyn Block>)
            .ok_or_else(|| anyhow::anyhow!("unknown block {id}"))
    }

    async fn parse_block(&self, bytes: Bytes) -> anyhow::Result<Arc<dyn Block>> {
        self.known
            .lock()
            .values()
            .find(|b| b.bytes == bytes)
            .cloned()
            .map(|b| b as Arc<dyn Block>)
            .ok_or_else(|| anyhow::anyhow!("unparseable bytes"))
    }

    async fn last_accepted(&self) -> anyhow::Result<Id> {
        Ok(*self.head.lock())
    }

    async fn set_preference(&self, id: Id) -> anyhow::Result<()> {
        *self.preference.lock() = id;
        Ok(())
    }
}

#[derive(Default)]
struct FakeProposer {
    proposals: Mutex<Vec<BlockProposal>>,
    requests: Mutex<Vec<VoteRequest>>,
}

#[async_trait]
impl BlockProposer for FakeProposer {
    async fn propose(&self, proposal: BlockProposal) -> anyhow::Result<()> {
        self.proposals.lock().push(proposal);
        Ok(())
    }

    async fn request_votes(&self, request: VoteRequest) -> anyhow::Result<()> {
        self.requests.lock().push(request);
        Ok(())
    }
}

fn engine_with(
    params: Parameters,
    vm: &Arc<FakeVm>,
    proposer: &Arc<FakeProposer>,
    store: Option<Arc<dyn StateStore>>,
) -> Engine {
    let config = EngineConfig {
        params,
        poll_interval: Duration::from_millis(10),
        ..EngineConfig::default()
    };
    Engine::with_config(
        config,
        EngineOptions {
            vm: Arc::clone(vm) as Arc<dyn ChainVm>,
            proposer: Arc::clone(proposer) as Arc<dyn BlockProposer>,
            store,
        },
    )
    .expect("engine construction")
}

// ---------------------------------------------------------------------------
// 1. A lone chain finalizes after beta confident rounds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_chain_finalizes_after_beta_rounds() {
    let mut core = ChainConsensus::new(params(3, 2, 2), id(1));
    core.add_block(info(id(2), id(1), 1)).unwrap();

    assert!(poll(&mut core, &[(id(2), 3)]).await.is_quiet());
    let outcome = poll(&mut core, &[(id(2), 3)]).await;

    assert_eq!(outcome.accepted, vec![id(2)]);
    assert_eq!(core.last_accepted(), (id(2), 1));
    assert_eq!(core.preference(), id(2));
    assert_eq!(core.num_processing(), 0);
}

// ---------------------------------------------------------------------------
// 2. A winning rival rejects a whole descendant branch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn winning_rival_rejects_descendant_branch() {
    let mut core = ChainConsensus::new(params(3, 2, 2), id(1));
    core.add_block(info(id(2), id(1), 1)).unwrap();
    core.add_block(info(id(3), id(2), 2)).unwrap();
    core.add_block(info(id(4), id(3), 3)).unwrap();
    core.add_block(info(id(5), id(1), 1)).unwrap();

    poll(&mut core, &[(id(5), 2)]).await;
    let outcome = poll(&mut core, &[(id(5), 3)]).await;

    assert_eq!(outcome.accepted, vec![id(5)]);
    assert_eq!(outcome.rejected, vec![id(2), id(3), id(4)]);
    assert!(core.is_accepted(&id(5)));
    for rejected in [id(2), id(3), id(4)] {
        assert!(core.is_rejected(&rejected));
    }
    assert_eq!(core.num_processing(), 0);
}

// ---------------------------------------------------------------------------
// 3. A split electorate never finalizes anything
// ---------------------------------------------------------------------------

#[tokio::test]
async fn split_vote_stays_undecided() {
    let mut core = ChainConsensus::new(params(5, 3, 1), id(1));
    core.add_block(info(id(2), id(1), 1)).unwrap();
    core.add_block(info(id(3), id(1), 1)).unwrap();

    for _ in 0..5 {
        let outcome = poll(&mut core, &[(id(2), 2), (id(3), 2)]).await;
        assert!(outcome.is_quiet());
        assert_eq!(core.confidence_of(&id(2)), 0);
        assert_eq!(core.confidence_of(&id(3)), 0);
    }
    assert_eq!(core.status(&id(2)), Status::Processing);
    assert_eq!(core.status(&id(3)), Status::Processing);
}

// ---------------------------------------------------------------------------
// 4. Quorum boundaries are exact
// ---------------------------------------------------------------------------

#[tokio::test]
async fn quorum_boundary_is_exact() {
    // alpha = 3: two votes do nothing, three advance confidence.
    let mut core = ChainConsensus::new(params(5, 3, 2), id(1));
    core.add_block(info(id(2), id(1), 1)).unwrap();

    poll(&mut core, &[(id(2), 2)]).await;
    assert_eq!(core.confidence_of(&id(2)), 0, "alpha - 1 votes are noise");

    poll(&mut core, &[(id(2), 3)]).await;
    assert_eq!(core.confidence_of(&id(2)), 1, "alpha votes advance");
    assert_eq!(core.preference(), id(2));
}

// ---------------------------------------------------------------------------
// 5. The full engine path: gossip in, votes in, callbacks out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn engine_finalizes_gossiped_block() {
    let vm = Arc::new(FakeVm::default());
    let proposer = Arc::new(FakeProposer::default());
    let engine = engine_with(params(3, 2, 1), &vm, &proposer, None);
    engine.start().await.unwrap();

    let block = FakeBlock::new(b"payload-1", Id::EMPTY, 1);
    vm.learn(&block);

    engine
        .handle_incoming_block(block.bytes.clone(), "peer-1")
        .await
        .expect("admission");
    assert!(!engine.is_accepted(block.id).await, "one self-vote is not quorum");

    // A second peer's vote reaches alpha.
    assert!(engine.receive_vote(Vote::accept(block.id, "peer-2")));
    for _ in 0..200 {
        if block.accepts.load(Ordering::Relaxed) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(block.accepts.load(Ordering::Relaxed), 1, "accept fires exactly once");
    assert_eq!(block.rejects.load(Ordering::Relaxed), 0);
    assert!(engine.is_accepted(block.id).await);
    assert_eq!(engine.preference().await, block.id);
    assert_eq!(*vm.preference.lock(), block.id);

    let stats = engine.stats().await;
    assert_eq!(stats.blocks_accepted, 1);
    assert_eq!(stats.pending_blocks, 0);
    assert_eq!(stats.last_accepted, block.id);

    engine.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// 6. Built blocks are proposed to the network
// ---------------------------------------------------------------------------

#[tokio::test]
async fn built_block_is_proposed_and_requested() {
    let vm = Arc::new(FakeVm::default());
    let proposer = Arc::new(FakeProposer::default());
    let engine = engine_with(params(3, 2, 1), &vm, &proposer, None);
    engine.start().await.unwrap();

    let block = FakeBlock::new(b"built-1", Id::EMPTY, 1);
    vm.stage_build(&block);
    engine
        .notify(Notification::PendingTransactions)
        .await
        .unwrap();

    {
        let proposals = proposer.proposals.lock();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].block_id, block.id);
        assert_eq!(proposals[0].height, 1);
        assert_eq!(proposals[0].bytes, block.bytes);
    }
    assert_eq!(proposer.requests.lock().len(), 1);
    assert_eq!(engine.pending_build_blocks(), 0);

    // Below quorum, the block is still processing.
    assert!(!engine.is_accepted(block.id).await);

    engine.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// 7. Imported-head reconciliation persists and re-points everything
// ---------------------------------------------------------------------------

#[tokio::test]
async fn imported_head_reconciliation() {
    let vm = Arc::new(FakeVm::default());
    let proposer = Arc::new(FakeProposer::default());
    let store = Arc::new(MetaStore::open_temporary().unwrap());

    let head = FakeBlock::new(b"imported-head", Id::EMPTY, 1_000);
    vm.learn(&head);
    *vm.head.lock() = head.id;

    // The engine exists but was never started.
    let engine = engine_with(
        params(3, 2, 2),
        &vm,
        &proposer,
        Some(Arc::clone(&store) as Arc<dyn StateStore>),
    );

    let height = apply_imported_head(store.as_ref(), vm.as_ref(), Some(&engine), head.id)
        .await
        .expect("reconciliation");
    assert_eq!(height, 1_000);

    // Persisted layout: 32 raw bytes, 8 big-endian bytes, one flag byte.
    assert_eq!(
        store.get(b"lastAccepted").unwrap(),
        Some(head.id.as_bytes().to_vec())
    );
    assert_eq!(
        store.get(b"lastAcceptedHeight").unwrap(),
        Some(1_000u64.to_be_bytes().to_vec())
    );
    assert_eq!(store.get(b"bootstrapped").unwrap(), Some(vec![0x01]));

    // The VM and the engine both point at the imported head.
    assert_eq!(*vm.preference.lock(), head.id);
    let stats = engine.stats().await;
    assert!(stats.bootstrapped);
    assert_eq!(stats.last_accepted, head.id);
    assert_eq!(stats.last_accepted_height, 1_000);

    // The companion read path sees what was written.
    let state = load_persisted_state(store.as_ref()).unwrap();
    assert_eq!(state.last_accepted, head.id);
    assert_eq!(state.height, 1_000);
    assert!(state.bootstrapped);
}

// ---------------------------------------------------------------------------
// 8. Reconciliation is idempotent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn imported_head_reconciliation_is_idempotent() {
    let vm = Arc::new(FakeVm::default());
    let store = MetaStore::open_temporary().unwrap();

    let head = FakeBlock::new(b"same-head", Id::EMPTY, 77);
    vm.learn(&head);

    for _ in 0..3 {
        apply_imported_head(&store, vm.as_ref(), None, head.id)
            .await
            .expect("repeated reconciliation");
    }

    let state = load_persisted_state(&store).unwrap();
    assert_eq!(state.last_accepted, head.id);
    assert_eq!(state.height, 77);
    assert!(state.bootstrapped);
}

// ---------------------------------------------------------------------------
// 9. A fresh store loads as empty state, not an error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fresh_store_loads_empty_state() {
    let store = MetaStore::open_temporary().unwrap();
    let state = load_persisted_state(&store).unwrap();
    assert!(state.last_accepted.is_empty());
    assert_eq!(state.height, 0);
    assert!(!state.bootstrapped);
}

// ---------------------------------------------------------------------------
// 10. A restarted replica resumes from the reconciled head
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restart_resumes_from_reconciled_head() {
    let vm = Arc::new(FakeVm::default());
    let proposer = Arc::new(FakeProposer::default());
    let store = Arc::new(MetaStore::open_temporary().unwrap());

    let head = FakeBlock::new(b"durable-head", Id::EMPTY, 500);
    vm.learn(&head);
    *vm.head.lock() = head.id;

    apply_imported_head(store.as_ref(), vm.as_ref(), None, head.id)
        .await
        .unwrap();

    // A brand-new engine (the "restarted" replica) starts against the
    // same VM and store, and picks up where the import left off.
    let engine = engine_with(
        params(3, 2, 1),
        &vm,
        &proposer,
        Some(Arc::clone(&store) as Arc<dyn StateStore>),
    );
    engine.start().await.unwrap();

    let (last, height) = engine.last_accepted().await;
    assert_eq!(last, head.id);
    assert_eq!(height, 500);

    // Building continues on top of the imported head.
    let next = FakeBlock::new(b"next-block", head.id, 501);
    vm.stage_build(&next);
    engine
        .notify(Notification::PendingTransactions)
        .await
        .unwrap();
    assert!(!engine.is_accepted(next.id).await, "needs quorum first");
    assert!(engine.receive_vote(Vote::accept(next.id, "peer-2")));
    for _ in 0..200 {
        if next.accepts.load(Ordering::Relaxed) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(engine.is_accepted(next.id).await);
    assert_eq!(engine.last_accepted().await, (next.id, 501));

    engine.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// 11. Lifecycle laws
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lifecycle_laws() {
    let vm = Arc::new(FakeVm::default());
    let proposer = Arc::new(FakeProposer::default());
    let engine = engine_with(params(3, 2, 1), &vm, &proposer, None);

    // Stopping a never-started engine is a no-op.
    engine.stop().await.unwrap();

    // Votes before start are refused.
    assert!(!engine.receive_vote(Vote::accept(id(9), "peer")));

    engine.start().await.unwrap();
    assert!(engine.receive_vote(Vote::accept(id(9), "peer")));
    assert!(engine.start().await.is_err(), "double start refused");

    engine.stop().await.unwrap();
    engine.stop().await.unwrap();
    assert!(engine.start().await.is_err(), "lifecycle is one-shot");
    assert!(!engine.receive_vote(Vote::accept(id(9), "peer")));
}

// ---------------------------------------------------------------------------
// 12. Unknown-parent gossip surfaces to the caller
// ---------------------------------------------------------------------------

#[tokio::test]
async fn orphan_gossip_surfaces_unknown_parent() {
    let vm = Arc::new(FakeVm::default());
    let proposer = Arc::new(FakeProposer::default());
    let engine = engine_with(params(3, 2, 1), &vm, &proposer, None);
    engine.start().await.unwrap();

    // A block whose parent the replica has never seen.
    let orphan = FakeBlock::new(b"orphan", id(123), 7);
    vm.learn(&orphan);

    let result = engine
        .handle_incoming_block(orphan.bytes.clone(), "peer-1")
        .await;
    assert!(result.is_err(), "caller is told to fetch ancestors");
    assert_eq!(engine.stats().await.pending_blocks, 0);

    engine.stop().await.unwrap();
}
