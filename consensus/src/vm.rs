//! # External Contracts
//!
//! The engine sits between two pluggable collaborators: the VM, which
//! builds and applies blocks, and the network layer, which moves bytes
//! and votes between peers. Both are consumed through the async traits
//! in this module; the engine never sees a concrete implementation.
//!
//! Errors at this boundary are opaque `anyhow::Error`s. The engine does
//! not inspect them — it wraps them into its own typed errors at the
//! call sites where the failure policy is decided (drop-and-log for
//! network-path failures, surface for accept/persist failures).
//!
//! Cancellation follows the runtime's model: every method is a future,
//! and dropping the future (as the engine's shutdown path does with its
//! background tasks) is the cancellation signal. No separate token is
//! threaded through.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::types::{BlockProposal, Id, Status, VoteRequest};

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A candidate block as the VM sees it.
///
/// The engine keeps a handle to every undecided block so it can deliver
/// exactly one `accept` or `reject` call when consensus resolves.
/// Implementations must tolerate `verify` being called before the block's
/// ancestry is fully decided, and must treat `accept`/`reject` as
/// at-most-once operations.
#[async_trait]
pub trait Block: Send + Sync {
    /// Unique identifier of this block.
    fn id(&self) -> Id;

    /// Identifier of the parent block.
    fn parent_id(&self) -> Id;

    /// Height of this block; parent height plus one.
    fn height(&self) -> u64;

    /// Wall-clock timestamp in Unix milliseconds.
    fn timestamp_ms(&self) -> u64;

    /// The VM's view of this block's status.
    fn status(&self) -> Status;

    /// Serialized block bytes, suitable for `ChainVm::parse_block`.
    fn bytes(&self) -> Bytes;

    /// Checks the block's internal validity. Called once, before the
    /// block is admitted to consensus.
    async fn verify(&self) -> anyhow::Result<()>;

    /// Commits the block to the VM's canonical chain.
    async fn accept(&self) -> anyhow::Result<()>;

    /// Permanently discards the block.
    async fn reject(&self) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Chain VM
// ---------------------------------------------------------------------------

/// The external state machine that produces and interprets blocks.
#[async_trait]
pub trait ChainVm: Send + Sync {
    /// Builds a new block on the VM's current preference. Errors are
    /// non-fatal: the engine drops its remaining build requests and
    /// waits for the VM to notify again.
    async fn build_block(&self) -> anyhow::Result<Arc<dyn Block>>;

    /// Fetches a block the VM already knows by id.
    async fn get_block(&self, id: Id) -> anyhow::Result<Arc<dyn Block>>;

    /// Deserializes a block received from the network.
    async fn parse_block(&self, bytes: Bytes) -> anyhow::Result<Arc<dyn Block>>;

    /// Id of the VM's deepest accepted block; [`Id::EMPTY`] if the VM
    /// has none beyond its built-in genesis.
    async fn last_accepted(&self) -> anyhow::Result<Id>;

    /// Tells the VM which block new blocks should be built on.
    async fn set_preference(&self, id: Id) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Block Proposer
// ---------------------------------------------------------------------------

/// The network layer's outbound surface.
///
/// Both methods are fire-and-forget from the engine's point of view:
/// failures are logged and never fatal, and concurrent calls are
/// expected.
#[async_trait]
pub trait BlockProposer: Send + Sync {
    /// Enqueues a freshly built block for broadcast to peers.
    async fn propose(&self, proposal: BlockProposal) -> anyhow::Result<()>;

    /// Asks validators to vote on a block.
    async fn request_votes(&self, request: VoteRequest) -> anyhow::Result<()>;
}
