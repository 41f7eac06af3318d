//! # Engine Layer
//!
//! The concurrent wrapper around the voting core and the reconciliation
//! path for externally advanced heads:
//!
//! ```text
//! transitive.rs — lifecycle, channels, background tasks, public surface
//! syncer.rs     — imported-head reconciliation + the persisted layout
//! ```

pub mod syncer;
pub mod transitive;

pub use syncer::{
    apply_imported_head, load_persisted_state, persist_head, PersistedState, SyncError,
    BOOTSTRAPPED_KEY, LAST_ACCEPTED_HEIGHT_KEY, LAST_ACCEPTED_KEY,
};
pub use transitive::{Engine, EngineError, EngineOptions};
