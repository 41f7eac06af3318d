//! Minimal end-to-end demo: an in-memory VM, a logging proposer, and an
//! engine finalizing blocks from peer votes.
//!
//! Run with:
//!
//! ```text
//! cargo run --example demo -p firn-consensus
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use firn_consensus::{
    Block, BlockProposal, BlockProposer, ChainVm, Engine, EngineConfig, EngineOptions, Id,
    Notification, Parameters, Status, Vote, VoteRequest,
};

/// Wire form of a demo block: enough to rebuild identity and linkage.
#[derive(Serialize, Deserialize)]
struct Payload {
    parent: [u8; 32],
    height: u64,
    body: String,
}

struct DemoBlock {
    id: Id,
    parent_id: Id,
    height: u64,
    bytes: Bytes,
    body: String,
}

impl DemoBlock {
    fn new(parent_id: Id, height: u64, body: &str) -> Arc<Self> {
        let payload = Payload {
            parent: *parent_id.as_bytes(),
            height,
            body: body.to_string(),
        };
        let bytes = Bytes::from(bincode::serialize(&payload).expect("encode"));
        Arc::new(Self {
            id: Id::digest(&bytes),
            parent_id,
            height,
            bytes,
            body: body.to_string(),
        })
    }
}

#[async_trait]
impl Block for DemoBlock {
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
        println!("vm: accepted block {} ({:?})", self.id.short(), self.body);
        Ok(())
    }
    async fn reject(&self) -> anyhow::Result<()> {
        println!("vm: rejected block {}", self.id.short());
        Ok(())
    }
}

#[derive(Default)]
struct DemoVm {
    known: Mutex<HashMap<Id, Arc<DemoBlock>>>,
    build_queue: Mutex<VecDeque<Arc<DemoBlock>>>,
}

impl DemoVm {
    fn stage(&self, block: Arc<DemoBlock>) {
        self.known.lock().insert(block.id, Arc::clone(&block));
        self.build_queue.lock().push_back(block);
    }
}

#[async_trait]
impl ChainVm for DemoVm {
    async fn build_block(&self) -> anyhow::Result<Arc<dyn Block>> {
        self.build_queue
            .lock()
            .pop_front()
            .map(|b| b as Arc<dyn Block>)
            .ok_or_else(|| anyhow::anyhow!("no transactions waiting"))
    }

    async fn get_block(&self, id: Id) -> anyhow::Result<Arc<dyn Block>> {
        self.known
            .lock()
            .get(&id)
            .cloned()
            .map(|b| b as Arc<dyn Block>)
            .ok_or_else(|| anyhow::anyhow!("unknown block"))
    }

    async fn parse_block(&self, bytes: Bytes) -> anyhow::Result<Arc<dyn Block>> {
        let payload: Payload = bincode::deserialize(&bytes)?;
        let block = DemoBlock::new(Id::new(payload.parent), payload.height, &payload.body);
        self.known.lock().insert(block.id, Arc::clone(&block));
        Ok(block as Arc<dyn Block>)
    }

    async fn last_accepted(&self) -> anyhow::Result<Id> {
        Ok(Id::EMPTY)
    }

    async fn set_preference(&self, id: Id) -> anyhow::Result<()> {
        println!("vm: preference -> {}", id.short());
        Ok(())
    }
}

struct DemoProposer;

#[async_trait]
impl BlockProposer for DemoProposer {
    async fn propose(&self, proposal: BlockProposal) -> anyhow::Result<()> {
        println!(
            "net: proposing block {} at height {}",
            proposal.block_id.short(),
            proposal.height
        );
        Ok(())
    }

    async fn request_votes(&self, request: VoteRequest) -> anyhow::Result<()> {
        println!("net: requesting votes for {}", request.block_id.short());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let vm = Arc::new(DemoVm::default());
    let config = EngineConfig {
        params: Parameters {
            k: 3,
            alpha_preference: 2,
            alpha_confidence: 2,
            beta: 1,
        },
        ..EngineConfig::default()
    };
    let engine = Engine::with_config(
        config,
        EngineOptions {
            vm: Arc::clone(&vm) as Arc<dyn ChainVm>,
            proposer: Arc::new(DemoProposer),
            store: None,
        },
    )?;

    engine.start().await?;
    println!("engine started");

    // Build three blocks; each needs one peer vote beyond the proposer's
    // own to finalize (k=3, alpha=2, beta=1).
    let mut parent = Id::EMPTY;
    for height in 1..=3u64 {
        let block = DemoBlock::new(parent, height, &format!("block #{height}"));
        parent = block.id;

        vm.stage(Arc::clone(&block));
        engine.notify(Notification::PendingTransactions).await?;

        engine.receive_vote(Vote::accept(block.id, "peer-1"));
        while !engine.is_accepted(block.id).await {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    let stats = engine.stats().await;
    println!(
        "finalized {} blocks, head {} at height {}",
        stats.blocks_accepted,
        stats.last_accepted.short(),
        stats.last_accepted_height
    );

    engine.stop().await?;
    println!("engine stopped");
    Ok(())
}
