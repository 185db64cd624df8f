use log::info;

use crate::configuration::Config;
use crate::error_handling::types::StorageError;
use crate::storage::geo_store::GeoStore;
use crate::storage::history_journal::HistoryJournal;
use crate::storage::session_store::SessionStateStore;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{HistoryEvent, SessionTable};

/// Filesystem-backed repository: one JSON document per concern, each
/// written with an atomic rename.
#[derive(Debug, Clone)]
pub struct FileStorage {
    sessions: SessionStateStore,
    journal: HistoryJournal,
    geo: GeoStore,
}

impl FileStorage {
    pub fn new(config: &Config) -> Self {
        info!(
            "FileStorage using sessions={} journal={} geo={}",
            config.active_sessions.display(),
            config.history_log.display(),
            config.client_geo_db.display()
        );
        Self {
            sessions: SessionStateStore::new(&config.active_sessions),
            journal: HistoryJournal::new(&config.history_log),
            geo: GeoStore::new(&config.client_geo_db),
        }
    }
}

impl Storage for FileStorage {
    fn load_sessions(&self) -> SessionTable {
        self.sessions.load()
    }

    fn save_sessions(&self, table: &SessionTable) -> Result<(), StorageError> {
        self.sessions.persist(table)
    }

    fn load_history(&self) -> Result<Vec<HistoryEvent>, StorageError> {
        self.journal.load()
    }

    fn append_history(&self, events: &[HistoryEvent]) -> Result<Vec<HistoryEvent>, StorageError> {
        self.journal.append(events)
    }

    fn stage_events(&self, events: &[HistoryEvent]) -> Result<(), StorageError> {
        self.journal.stage(events)
    }

    fn staged_events(&self) -> Vec<HistoryEvent> {
        self.journal.staged()
    }

    fn clear_staged_events(&self) -> Result<(), StorageError> {
        self.journal.clear_staged()
    }

    fn record_geo(&self, events: &[HistoryEvent]) -> Result<bool, StorageError> {
        self.geo.ingest(events)
    }
}
