//! # Sampling Consensus Primitives
//!
//! The synchronous core of the protocol, bottom-up:
//!
//! ```text
//! bag.rs        — insertion-ordered vote multiset with threshold detection
//! confidence.rs — per-block consecutive-success counter
//! tree.rs       — the in-memory block tree: links, tips, statuses
//! chain.rs      — the voting core: admission, polls, finality cascade
//! ```
//!
//! Nothing in this module spawns tasks or talks to the VM directly; the
//! lifecycle wrapper in [`crate::engine`] owns all of that. The split
//! keeps the protocol testable with plain value types and a no-op hook.

pub mod bag;
pub mod chain;
pub mod confidence;
pub mod tree;

pub use bag::Bag;
pub use chain::{ChainConsensus, ConsensusError, DecisionHooks, NoopHooks, PollOutcome};
pub use confidence::Confidence;
pub use tree::{BlockTree, TreeError, TreeNode};
