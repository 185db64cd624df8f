use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde_json::Value;

use super::atomic_file::write_json_atomic;
use super::types::{ActiveSessionRecord, SessionTable};
use crate::error_handling::types::StorageError;

/// Durable table of the clients currently believed connected.
///
/// The document is a JSON object keyed by common name. Loading never
/// fails: a missing, unreadable or malformed document is an empty table,
/// and individual invalid records are dropped without affecting the rest.
#[derive(Debug, Clone)]
pub struct SessionStateStore {
    path: PathBuf,
}

impl SessionStateStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> SessionTable {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No session table at {}, starting empty", self.path.display());
                return SessionTable::new();
            }
            Err(e) => {
                warn!("Unable to read session table {}: {}; starting empty", self.path.display(), e);
                return SessionTable::new();
            }
        };

        let document: Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                warn!("Session table {} is corrupt ({}); recovering with an empty table", self.path.display(), e);
                return SessionTable::new();
            }
        };

        let Value::Object(entries) = document else {
            warn!("Session table {} is not a JSON object; recovering with an empty table", self.path.display());
            return SessionTable::new();
        };

        let mut table = SessionTable::new();
        for (common_name, raw) in &entries {
            match ActiveSessionRecord::from_value(raw) {
                Some(record) => {
                    table.insert(common_name.clone(), record);
                }
                None => warn!("Dropping invalid session record for {:?} in {}", common_name, self.path.display()),
            }
        }
        debug!("Loaded {} active session(s) from {}", table.len(), self.path.display());
        table
    }

    pub fn persist(&self, table: &SessionTable) -> Result<(), StorageError> {
        write_json_atomic(&self.path, table)?;
        info!("Saved {} active session(s) to {}", table.len(), self.path.display());
        Ok(())
    }
}
