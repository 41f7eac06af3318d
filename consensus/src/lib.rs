// Copyright (c) 2026 Firn Contributors. MIT License.
// See LICENSE for details.

//! # firn-consensus — Repeated-Sampling Consensus for Linear Chains
//!
//! A single replica's consensus engine: it takes candidate blocks from a
//! pluggable VM and gossiped bytes from a pluggable network, runs a
//! repeated-sampling voting protocol over them, and delivers accept and
//! reject callbacks in causal order once confidence hardens into
//! finality.
//!
//! This crate is deliberately not a node. There is no wire codec, no
//! peer discovery, no signature verification, and no block storage —
//! those live behind the [`vm::ChainVm`], [`vm::BlockProposer`], and
//! [`storage::StateStore`] seams. What the crate does own:
//!
//! - **consensus** — the voting core: vote bags, confidence counters,
//!   the block tree, and the poll protocol with its finality cascade.
//! - **engine** — the concurrent lifecycle: bounded vote channel,
//!   background sweep, build coordination, and the reconciliation path
//!   for chain heads advanced by outside tooling.
//! - **storage** — the three-key metadata store that makes restarts
//!   safe.
//!
//! ## Quick tour
//!
//! ```no_run
//! use std::sync::Arc;
//! use firn_consensus::{Engine, EngineOptions, Notification};
//! # async fn demo(vm: Arc<dyn firn_consensus::ChainVm>,
//! #               proposer: Arc<dyn firn_consensus::BlockProposer>)
//! #               -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new(EngineOptions { vm, proposer, store: None })?;
//! engine.start().await?;
//! engine.notify(Notification::PendingTransactions).await?;
//! engine.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consensus;
pub mod engine;
pub mod storage;
pub mod types;
pub mod vm;

pub use config::{EngineConfig, ParameterError, Parameters};
pub use consensus::{Bag, ChainConsensus, ConsensusError, DecisionHooks, NoopHooks, PollOutcome};
pub use engine::{
    apply_imported_head, load_persisted_state, Engine, EngineError, EngineOptions, PersistedState,
    SyncError,
};
pub use storage::{MetaStore, StateStore, StoreError};
pub use types::{
    BlockInfo, BlockProposal, EngineStats, Id, Notification, Status, Vote, VoteKind, VoteRequest,
};
pub use vm::{Block, BlockProposer, ChainVm};
