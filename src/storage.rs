//! Storage subsystem
//!
//! This module provides the durable documents the monitor maintains and the
//! repository abstraction a reconciliation cycle works against.
//!
//! Components:
//! - `storage_trait`: the Storage trait defining a uniform API.
//! - `types`: session records and journal events.
//! - `atomic_file`: write-to-temporary-then-rename helper shared by all documents.
//! - `session_store`: the active-session table.
//! - `history_journal`: the lifecycle journal and its staging area.
//! - `geo_store`: the geo-enrichment store fed from journal events.
//! - `file_storage`: filesystem-backed implementation of the Storage trait.

pub mod atomic_file;
pub mod file_storage;
pub mod geo_store;
pub mod history_journal;
pub mod session_store;
pub mod storage_trait;
pub mod types;

pub use file_storage::FileStorage;
pub use storage_trait::Storage;
