//! Persistence for crash recovery.
//!
//! The engine persists exactly three small metadata keys (the last
//! accepted block id, its height, and the bootstrap flag); block bodies
//! are the VM's problem. The [`StateStore`] trait keeps the engine
//! backend-agnostic, and [`MetaStore`] is the sled-backed implementation
//! a node would normally use.

pub mod store;

pub use store::{MetaStore, StateStore, StoreError};
