//!
//! relcat configuration module
//! ---------------------------
//! The GUC engine: a typed registry of runtime configuration variables with
//! context/permission gating, source-priority arbitration, unit-aware
//! parsing and a per-variable transactional scope stack (SET / SET LOCAL /
//! save-restore) that unwinds with the owning transaction. Also covers the
//! parallel-worker configuration handoff and the per-role/per-database
//! stored option arrays.
//!
//! A session holds one `GucRegistry` behind its own lock; the engine keeps
//! no process-global mutable state.

pub mod value;
pub mod variable;
pub mod stack;
pub mod registry;
pub mod serialize;
pub mod arrays;

pub use registry::{GucRegistry, GucRegistryBuilder};
pub use stack::{ScopeKind, StackFrame};
pub use value::{GucUnit, GucValue};
pub use variable::{
    CheckHook, ExtraPayload, GucAction, GucContext, GucFlags, GucKind, GucSource, GucVar,
    SavedValue,
};

use std::sync::Arc;

use parking_lot::Mutex;

/// Shared handle to a session's configuration state, mirroring how the
/// catalog itself is shared.
pub type SharedGucRegistry = Arc<Mutex<GucRegistry>>;

/// Boot a session registry with the built-in variable table.
pub fn boot_session_registry() -> SharedGucRegistry {
    Arc::new(Mutex::new(GucRegistry::builtin()))
}
