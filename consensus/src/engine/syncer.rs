//! # Imported-Head Reconciliation
//!
//! Out-of-band tooling (bulk chain import, disaster recovery) can advance
//! the VM's accepted head while the consensus engine is not looking. If
//! the replica restarts without reconciling, it reloads a stale
//! last-accepted pointer and starts building on a dead tip.
//!
//! [`apply_imported_head`] is the reconciliation step operators run after
//! such an advance. The order of operations is deliberate:
//!
//! 1. Ask the VM for the head block, to learn its height.
//! 2. Persist the head id, height, and bootstrap flag. This is the
//!    crash-safety step — once these bytes land, a restart recovers.
//! 3. Point the VM's preference at the head.
//! 4. Re-point the live engine, if one is attached.
//!
//! The whole sequence is idempotent: replaying it with the same head
//! rewrites the same bytes and re-applies the same pointers.
//!
//! [`load_persisted_state`] is the companion read path used at startup.

use tracing::{info, warn};

use crate::engine::transitive::Engine;
use crate::storage::{StateStore, StoreError};
use crate::types::Id;
use crate::vm::ChainVm;

// ---------------------------------------------------------------------------
// Persisted Layout
// ---------------------------------------------------------------------------

/// Key holding the 32-byte last-accepted block id.
pub const LAST_ACCEPTED_KEY: &[u8] = b"lastAccepted";

/// Key holding the last-accepted height as 8 big-endian bytes.
pub const LAST_ACCEPTED_HEIGHT_KEY: &[u8] = b"lastAcceptedHeight";

/// Key holding the bootstrap flag: one byte, `0x01` when bootstrapped.
pub const BOOTSTRAPPED_KEY: &[u8] = b"bootstrapped";

/// The three persisted values, as read back at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistedState {
    /// Persisted last-accepted block id; [`Id::EMPTY`] when absent.
    pub last_accepted: Id,
    /// Persisted last-accepted height; zero when absent.
    pub height: u64,
    /// Whether the replica had completed bootstrap.
    pub bootstrapped: bool,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of the reconciliation sequence, in step order.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The VM could not produce the head block. Nothing was changed.
    #[error("vm get_block failed for {id}")]
    VmGetBlock {
        /// The head that was requested.
        id: Id,
        /// The VM's error.
        #[source]
        source: anyhow::Error,
    },
    /// Persisting the metadata keys failed. Fatal: a restart before a
    /// successful retry will load stale state.
    #[error("persisting consensus metadata failed")]
    PersistFailed(#[source] StoreError),
    /// The VM rejected the preference update. The persisted state is
    /// already correct; retrying the whole call is safe.
    #[error("vm set_preference failed for {id}")]
    SetPreference {
        /// The head that was being preferred.
        id: Id,
        /// The VM's error.
        #[source]
        source: anyhow::Error,
    },
    /// No state store is attached to the engine.
    #[error("no state store attached")]
    StoreMissing,
}

// ---------------------------------------------------------------------------
// Write path
// ---------------------------------------------------------------------------

/// Writes the three metadata keys for the given head.
pub fn persist_head(store: &dyn StateStore, head: Id, height: u64) -> Result<(), StoreError> {
    store.put(LAST_ACCEPTED_KEY, head.as_bytes())?;
    store.put(LAST_ACCEPTED_HEIGHT_KEY, &height.to_be_bytes())?;
    store.put(BOOTSTRAPPED_KEY, &[0x01])?;
    Ok(())
}

/// Reconciles persisted and in-memory consensus state with an
/// externally advanced chain head.
///
/// `engine` may be absent; persistence and the VM preference update run
/// regardless, so a stopped replica can still be repaired on disk.
/// Returns the head's height.
pub async fn apply_imported_head(
    store: &dyn StateStore,
    vm: &dyn ChainVm,
    engine: Option<&Engine>,
    head: Id,
) -> Result<u64, SyncError> {
    let block = vm
        .get_block(head)
        .await
        .map_err(|source| SyncError::VmGetBlock { id: head, source })?;
    let height = block.height();

    persist_head(store, head, height).map_err(SyncError::PersistFailed)?;

    vm.set_preference(head)
        .await
        .map_err(|source| SyncError::SetPreference { id: head, source })?;

    if let Some(engine) = engine {
        engine.sync_state(head, height).await;
    } else {
        warn!(head = %head.short(), height, "no engine attached, reconciled on disk only");
    }

    info!(head = %head.short(), height, "imported head applied");
    Ok(height)
}

// ---------------------------------------------------------------------------
// Read path
// ---------------------------------------------------------------------------

/// Loads the persisted metadata written by [`persist_head`].
///
/// Absent keys yield the zero value for their field, never an error — a
/// fresh store reads back as "no head, height zero, not bootstrapped".
pub fn load_persisted_state(store: &dyn StateStore) -> Result<PersistedState, StoreError> {
    let last_accepted = store
        .get(LAST_ACCEPTED_KEY)?
        .and_then(|bytes| Id::from_slice(&bytes))
        .unwrap_or(Id::EMPTY);

    let height = store
        .get(LAST_ACCEPTED_HEIGHT_KEY)?
        .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_slice()).ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0);

    let bootstrapped = store
        .get(BOOTSTRAPPED_KEY)?
        .is_some_and(|bytes| bytes.first() == Some(&0x01));

    Ok(PersistedState {
        last_accepted,
        height,
        bootstrapped,
    })
}
