//! Storage Trait
//!
//! This module defines the `Storage` trait, the repository a reconciliation
//! cycle works against. It groups the three durable documents the monitor
//! owns:
//! - the active-session table
//! - the lifecycle journal, with its staging area for in-flight events
//! - the geo-enrichment store
//!
//! None of these methods lock anything: a writer must hold the cycle lock
//! for its whole load-mutate-persist sequence. Readers may call the `load_*`
//! methods at any time and see the last complete document.

use crate::error_handling::types::StorageError;
use crate::storage::types::{HistoryEvent, SessionTable};

pub trait Storage: Send + Sync {
    /// Loads the active-session table; never fails, see `SessionStateStore::load`.
    fn load_sessions(&self) -> SessionTable;

    /// Atomically replaces the active-session table.
    fn save_sessions(&self, table: &SessionTable) -> Result<(), StorageError>;

    /// Reads the whole journal in append order.
    fn load_history(&self) -> Result<Vec<HistoryEvent>, StorageError>;

    /// Appends events not yet journaled and returns those written.
    fn append_history(&self, events: &[HistoryEvent]) -> Result<Vec<HistoryEvent>, StorageError>;

    /// Durably stages events before the session table is persisted.
    fn stage_events(&self, events: &[HistoryEvent]) -> Result<(), StorageError>;

    /// Events staged by a cycle that did not finish.
    fn staged_events(&self) -> Vec<HistoryEvent>;

    fn clear_staged_events(&self) -> Result<(), StorageError>;

    /// Feeds journaled events to the geo-enrichment store.
    fn record_geo(&self, events: &[HistoryEvent]) -> Result<bool, StorageError>;
}
