//! Session management core module.
//!
//! Turns successive status snapshots into the active-session table and the
//! lifecycle journal: the reconciler decides what changed, the session
//! manager runs that decision as one locked, crash-safe cycle.

/// Submodule for the cross-process cycle lock.
pub mod concurrency_guard;
/// Submodule for the snapshot-to-table diff.
pub mod reconciler;
/// Submodule for the cycle runner.
pub mod session_manager;


pub use concurrency_guard::{CycleLock, CycleLockGuard};
pub use reconciler::{project_table, reconcile, Reconciliation};
pub use session_manager::{
    current_clients_blocking, run_cycle_blocking, CycleReport, SessionManager,
};
