//! Lifecycle journal.
//!
//! The journal is one JSON array of [`HistoryEvent`]s in append order. Every
//! append reads the whole array, adds the new events and atomically rewrites
//! the document, so cost grows with history size.
//!
//! Appends are idempotent per `(session_id, kind)`: an event already in the
//! journal is never written twice. Together with the staging file
//! (`<journal>.pending`) this gives at-least-once delivery that survives a
//! crash between persisting the session table and appending the journal.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{debug, info, warn};

use super::atomic_file::write_json_atomic;
use super::types::{EventKind, HistoryEvent};
use crate::error_handling::types::StorageError;

enum JournalContent {
    Events(Vec<HistoryEvent>),
    /// Line-oriented journal left by an earlier release, with the number of
    /// lines that could not be read
    Legacy(Vec<HistoryEvent>, usize),
    Corrupt(String),
}

#[derive(Debug, Clone)]
pub struct HistoryJournal {
    path: PathBuf,
}

impl HistoryJournal {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn pending_path(&self) -> PathBuf {
        with_suffix(&self.path, ".pending")
    }

    /// Every event in append order. A journal still in the legacy line
    /// format is returned converted.
    pub fn load(&self) -> Result<Vec<HistoryEvent>, StorageError> {
        match self.read_content()? {
            JournalContent::Events(events) | JournalContent::Legacy(events, _) => Ok(events),
            JournalContent::Corrupt(reason) => {
                Err(StorageError::CorruptDocument(self.path.clone(), reason))
            }
        }
    }

    /// Appends `events` in order, skipping any whose `(session_id, kind)` is
    /// already journaled. Returns the events actually written.
    pub fn append(&self, events: &[HistoryEvent]) -> Result<Vec<HistoryEvent>, StorageError> {
        let (mut journal, migrating) = match self.read_content()? {
            JournalContent::Events(existing) => (existing, false),
            JournalContent::Legacy(existing, dropped) => {
                self.preserve_legacy(existing.len(), dropped)?;
                (existing, true)
            }
            JournalContent::Corrupt(reason) => {
                self.quarantine(&reason)?;
                (Vec::new(), false)
            }
        };

        let mut seen: HashSet<(String, EventKind)> =
            journal.iter().map(HistoryEvent::delivery_key).collect();
        let mut appended = Vec::new();
        for event in events {
            if seen.insert(event.delivery_key()) {
                appended.push(event.clone());
            } else {
                debug!("Event {:?} for session {} already journaled", event.kind(), event.session_id);
            }
        }

        if appended.is_empty() && !migrating {
            return Ok(appended);
        }
        journal.extend(appended.iter().cloned());
        write_json_atomic(&self.path, &journal)?;
        debug!("Appended {} event(s) to {}", appended.len(), self.path.display());
        Ok(appended)
    }

    /// Durably records a batch about to be appended.
    pub fn stage(&self, events: &[HistoryEvent]) -> Result<(), StorageError> {
        write_json_atomic(&self.pending_path(), events)
    }

    /// The batch left staged by an interrupted cycle, if any.
    pub fn staged(&self) -> Vec<HistoryEvent> {
        let path = self.pending_path();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Unable to read staged events {}: {}", path.display(), e);
                return Vec::new();
            }
        };
        match serde_json::from_str(&content) {
            Ok(events) => events,
            Err(e) => {
                warn!("Discarding unreadable staged events {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    pub fn clear_staged(&self) -> Result<(), StorageError> {
        let path = self.pending_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::WriteFailed(path, e)),
        }
    }

    fn read_content(&self) -> Result<JournalContent, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(JournalContent::Events(Vec::new())),
            Err(e) => return Err(StorageError::ReadFailed(self.path.clone(), e)),
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(JournalContent::Events(Vec::new()));
        }

        match serde_json::from_str::<Vec<HistoryEvent>>(trimmed) {
            Ok(events) => Ok(JournalContent::Events(events)),
            Err(e) if trimmed.starts_with('[') || trimmed.starts_with('{') => {
                Ok(JournalContent::Corrupt(e.to_string()))
            }
            Err(e) => {
                let mut events = Vec::new();
                let mut dropped = 0;
                for line in trimmed.lines().filter(|l| !l.trim().is_empty()) {
                    match HistoryEvent::from_legacy_line(line) {
                        Some(event) => events.push(event),
                        None => dropped += 1,
                    }
                }
                if events.is_empty() {
                    Ok(JournalContent::Corrupt(e.to_string()))
                } else {
                    Ok(JournalContent::Legacy(events, dropped))
                }
            }
        }
    }

    /// Copies a legacy journal aside before it is rewritten as JSON.
    fn preserve_legacy(&self, migrated: usize, dropped: usize) -> Result<(), StorageError> {
        let suffix = format!(".legacy-{}", Local::now().format("%Y%m%d%H%M%S"));
        let target = with_suffix(&self.path, &suffix);
        fs::copy(&self.path, &target).map_err(|e| StorageError::WriteFailed(target.clone(), e))?;
        info!(
            "Migrating {} legacy journal line(s) in {} to JSON, original kept at {}",
            migrated,
            self.path.display(),
            target.display()
        );
        if dropped > 0 {
            warn!("{} unreadable legacy journal line(s) left out of the migration", dropped);
        }
        Ok(())
    }

    /// Moves an unreadable journal aside so a fresh one can be started
    /// without losing its content.
    fn quarantine(&self, reason: &str) -> Result<(), StorageError> {
        let suffix = format!(".corrupt-{}", Local::now().format("%Y%m%d%H%M%S"));
        let target = with_suffix(&self.path, &suffix);
        fs::rename(&self.path, &target)
            .map_err(|e| StorageError::WriteFailed(target.clone(), e))?;
        warn!(
            "Journal {} is corrupt ({}); moved to {} and starting a new one",
            self.path.display(),
            reason,
            target.display()
        );
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::parse_timestamp;
    use crate::storage::types::ActiveSessionRecord;
    use tempfile::TempDir;

    fn session(id: &str) -> ActiveSessionRecord {
        ActiveSessionRecord {
            ip: "198.51.100.10".into(),
            vpn_ip: "10.8.0.5".into(),
            vpn_ipv4: "10.8.0.5".into(),
            vpn_ipv6: "".into(),
            connected_at: parse_timestamp("2024-01-01 09:00:00").unwrap(),
            bytes_received: 10,
            bytes_sent: 20,
            port: "443".into(),
            session_id: id.into(),
        }
    }

    fn ended() -> chrono::NaiveDateTime {
        parse_timestamp("2024-01-01 13:00:00").unwrap()
    }

    #[test]
    fn test_append_preserves_order() {
        let dir = TempDir::new().unwrap();
        let journal = HistoryJournal::new(dir.path().join("history.json"));
        journal.append(&[HistoryEvent::connect("alice", &session("s1"))]).unwrap();
        journal
            .append(&[
                HistoryEvent::connect("bob", &session("s2")),
                HistoryEvent::disconnect("alice", &session("s1"), ended()),
            ])
            .unwrap();

        let events = journal.load().unwrap();
        let keys: Vec<(String, EventKind)> = events.iter().map(HistoryEvent::delivery_key).collect();
        assert_eq!(
            keys,
            vec![
                ("s1".to_string(), EventKind::Connect),
                ("s2".to_string(), EventKind::Connect),
                ("s1".to_string(), EventKind::Disconnect),
            ]
        );
    }

    #[test]
    fn test_append_skips_already_journaled_events() {
        let dir = TempDir::new().unwrap();
        let journal = HistoryJournal::new(dir.path().join("history.json"));
        let batch = vec![HistoryEvent::connect("alice", &session("s1"))];
        assert_eq!(journal.append(&batch).unwrap().len(), 1);
        assert!(journal.append(&batch).unwrap().is_empty());
        assert_eq!(journal.load().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_or_empty_journal_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        let journal = HistoryJournal::new(&path);
        assert!(journal.load().unwrap().is_empty());
        fs::write(&path, "").unwrap();
        assert!(journal.load().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_journal_is_quarantined_on_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "[{\"timestamp\": ").unwrap();
        let journal = HistoryJournal::new(&path);

        assert!(matches!(journal.load(), Err(StorageError::CorruptDocument(_, _))));
        journal.append(&[HistoryEvent::connect("alice", &session("s1"))]).unwrap();
        assert_eq!(journal.load().unwrap().len(), 1);

        let quarantined: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("history.json.corrupt-"))
            .collect();
        assert_eq!(quarantined.len(), 1);
        let kept = fs::read_to_string(dir.path().join(&quarantined[0])).unwrap();
        assert_eq!(kept, "[{\"timestamp\": ");
    }

    #[test]
    fn test_legacy_journal_is_migrated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        fs::write(
            &path,
            "2024-01-01 09:00:00,alice,198.51.100.10,s1,,,10.8.0.5,443\n\
             2024-01-01 09:00:00,alice,198.51.100.10,s1,1.0,2.0,10.8.0.5,443,2024-01-01 13:00:00\n",
        )
        .unwrap();
        let journal = HistoryJournal::new(&path);
        assert_eq!(journal.load().unwrap().len(), 2);

        journal.append(&[HistoryEvent::connect("bob", &session("s2"))]).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.trim_start().starts_with('['));
        let events = journal.load().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].kind(), EventKind::Disconnect);
    }

    #[test]
    fn test_legacy_migration_keeps_every_line_and_a_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        let original = "2024-01-01 09:00:00,alice,198.51.100.10,s1,,,10.8.0.5,443\n\
                        2024-01-01T09:30:00,bob,203.0.113.7,s2\n\
                        garbage\n";
        fs::write(&path, original).unwrap();
        let journal = HistoryJournal::new(&path);

        journal.append(&[HistoryEvent::connect("carol", &session("s3"))]).unwrap();

        let names: Vec<String> = journal.load().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);

        let backups: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("history.json.legacy-"))
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(fs::read_to_string(dir.path().join(&backups[0])).unwrap(), original);
    }

    #[test]
    fn test_staging_lifecycle() {
        let dir = TempDir::new().unwrap();
        let journal = HistoryJournal::new(dir.path().join("history.json"));
        assert!(journal.staged().is_empty());

        let batch = vec![HistoryEvent::disconnect("alice", &session("s1"), ended())];
        journal.stage(&batch).unwrap();
        assert!(journal.pending_path().exists());
        assert_eq!(journal.staged(), batch);

        journal.clear_staged().unwrap();
        assert!(!journal.pending_path().exists());
        journal.clear_staged().unwrap();
    }
}
