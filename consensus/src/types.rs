//! # Core Types
//!
//! Identifiers, statuses, votes, and the small wire-adjacent structs the
//! engine exchanges with its collaborators. Everything here is cheap to
//! clone — the engine moves these values across channels and into
//! background tasks freely.
//!
//! Block payloads are opaque `bytes::Bytes`. The engine never interprets
//! them; they exist so that a block admitted from one peer can be
//! re-proposed to others without a round trip through the VM.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Block Identifier
// ---------------------------------------------------------------------------

/// Length of a block identifier in bytes.
pub const ID_LEN: usize = 32;

/// An opaque 32-byte block identifier.
///
/// Ids are produced by the VM (typically a content hash of the block
/// bytes); the engine only ever compares, stores, and forwards them. The
/// all-zero id is the sentinel parent of genesis and never identifies a
/// real block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Id([u8; ID_LEN]);

impl Id {
    /// The empty (all-zero) sentinel id.
    pub const EMPTY: Id = Id([0u8; ID_LEN]);

    /// Wraps raw bytes as an id.
    pub const fn new(bytes: [u8; ID_LEN]) -> Self {
        Id(bytes)
    }

    /// Derives an id from arbitrary content via BLAKE3. Used by VMs and
    /// test doubles that identify blocks by their serialized bytes.
    pub fn digest(data: &[u8]) -> Self {
        Id(*blake3::hash(data).as_bytes())
    }

    /// Builds an id from a slice. Returns `None` unless the slice is
    /// exactly [`ID_LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; ID_LEN] = slice.try_into().ok()?;
        Some(Id(bytes))
    }

    /// True for the all-zero sentinel.
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// Raw byte view.
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Short hex prefix for log lines. Eight hex chars is enough to
    /// eyeball, full ids are available via `Display` when it matters.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.short())
    }
}

impl From<[u8; ID_LEN]> for Id {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        Id(bytes)
    }
}

// ---------------------------------------------------------------------------
// Block Status
// ---------------------------------------------------------------------------

/// Consensus status of a block.
///
/// `Accepted` and `Rejected` are terminal — once a block leaves
/// `Processing` its status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Not known to the local block tree.
    Unknown,
    /// Admitted to consensus, not yet decided.
    Processing,
    /// Finalized into the canonical chain.
    Accepted,
    /// Permanently excluded from the canonical chain.
    Rejected,
}

impl Status {
    /// True once the status is terminal.
    pub fn is_decided(&self) -> bool {
        matches!(self, Status::Accepted | Status::Rejected)
    }
}

// ---------------------------------------------------------------------------
// Block Info
// ---------------------------------------------------------------------------

/// The engine-visible attributes of a candidate block.
///
/// This is what survives of a block inside the consensus core: identity,
/// chain position, and the opaque payload for gossip. Body storage and
/// interpretation stay with the VM.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    /// Unique block identifier.
    pub id: Id,
    /// Identifier of the parent block; [`Id::EMPTY`] for genesis.
    pub parent_id: Id,
    /// Distance from genesis; parent height plus one.
    pub height: u64,
    /// Wall-clock timestamp in Unix milliseconds. Informational only.
    pub timestamp_ms: u64,
    /// Opaque serialized block, re-gossiped verbatim.
    pub bytes: Bytes,
}

// ---------------------------------------------------------------------------
// Votes
// ---------------------------------------------------------------------------

/// Direction of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteKind {
    /// The voter prefers this block.
    Accept,
    /// The voter wants this block excluded. Counted, but rejection is
    /// driven by the accept-side finality cascade, not by reject quorums.
    Reject,
}

/// A single peer's vote on a block, as delivered by the network layer.
///
/// Signature verification happens before a vote reaches the engine; by
/// the time it is here, `voter` is a trusted label used only for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    /// The block being voted on.
    pub block_id: Id,
    /// Accept or reject.
    pub kind: VoteKind,
    /// Identifier of the voting peer.
    pub voter: String,
}

impl Vote {
    /// Creates an accept vote.
    pub fn accept(block_id: Id, voter: impl Into<String>) -> Self {
        Self {
            block_id,
            kind: VoteKind::Accept,
            voter: voter.into(),
        }
    }

    /// Creates a reject vote.
    pub fn reject(block_id: Id, voter: impl Into<String>) -> Self {
        Self {
            block_id,
            kind: VoteKind::Reject,
            voter: voter.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Messages the VM sends to nudge the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Notification {
    /// The VM has transactions waiting; the engine should drain its
    /// build queue by calling `build_block` until the VM runs dry.
    PendingTransactions,
    /// A state sync completed. Recognized, currently a no-op.
    StateSyncDone,
}

// ---------------------------------------------------------------------------
// Proposer Payloads
// ---------------------------------------------------------------------------

/// A freshly built block handed to the network layer for broadcast.
#[derive(Debug, Clone)]
pub struct BlockProposal {
    /// Identifier of the proposed block.
    pub block_id: Id,
    /// Serialized block for gossip.
    pub bytes: Bytes,
    /// Height of the proposed block.
    pub height: u64,
    /// Parent the block extends.
    pub parent_id: Id,
}

/// A request for specific validators to vote on a block.
#[derive(Debug, Clone)]
pub struct VoteRequest {
    /// Identifier of the block to vote on.
    pub block_id: Id,
    /// Serialized block, in case the validator has not seen it yet.
    pub bytes: Bytes,
    /// Validators being asked. Empty means "sample for me".
    pub validators: Vec<String>,
}

// ---------------------------------------------------------------------------
// Engine Stats
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of the engine's observable state.
///
/// Returned by `stats()` and `health_check()`. A host process exports
/// these through whatever metrics system it runs; the engine itself
/// registers nothing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    /// Whether the engine has completed bootstrap (running, or synced to
    /// an imported head).
    pub bootstrapped: bool,
    /// Number of blocks admitted but not yet decided.
    pub processing: u64,
    /// Number of entries in the pending-block map.
    pub pending_blocks: u64,
    /// Total blocks accepted since construction.
    pub blocks_accepted: u64,
    /// Total blocks rejected since construction.
    pub blocks_rejected: u64,
    /// Total votes received, including votes for unknown blocks.
    pub votes_received: u64,
    /// Outstanding build-block notifications.
    pub pending_build_blocks: u64,
    /// Deepest accepted block.
    pub last_accepted: Id,
    /// Height of the deepest accepted block.
    pub last_accepted_height: u64,
    /// The replica's current preference.
    pub preference: Id,
}
