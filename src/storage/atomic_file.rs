//! Crash-safe document writes.
//!
//! A document is serialised into a temporary file created next to its
//! target, flushed and synced, then renamed over the target. Readers see
//! either the previous document or the new one, never a partial write.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use log::{debug, error};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error_handling::types::StorageError;

pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| {
        error!("Failed to create directory {}: {}", dir.display(), e);
        StorageError::WriteFailed(dir.to_path_buf(), e)
    })?;

    let tmp = NamedTempFile::new_in(dir).map_err(|e| {
        error!("Failed to create temporary file in {}: {}", dir.display(), e);
        StorageError::WriteFailed(path.to_path_buf(), e)
    })?;

    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer
            .write_all(b"\n")
            .and_then(|_| writer.flush())
            .map_err(|e| StorageError::WriteFailed(path.to_path_buf(), e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| StorageError::WriteFailed(path.to_path_buf(), e))?;

    tmp.persist(path).map_err(|e| {
        error!("Failed to move document into place at {}: {}", path.display(), e.error);
        StorageError::WriteFailed(path.to_path_buf(), e.error)
    })?;

    // Make the rename itself durable. Not every platform lets a directory be
    // opened for syncing, so this step is best effort.
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
    debug!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_write_replaces_whole_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &json!({"a": 1, "b": [1, 2, 3]})).unwrap();
        write_json_atomic(&path, &json!({"a": 2})).unwrap();

        let read: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read, json!({"a": 2}));
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_creates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("doc.json");
        write_json_atomic(&path, &json!([])).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_write_keeps_previous_document() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        let path = data.join("doc.json");
        write_json_atomic(&path, &json!({"v": 1})).unwrap();

        fs::set_permissions(&data, fs::Permissions::from_mode(0o555)).unwrap();
        let probe = File::create(data.join("probe"));
        if probe.is_ok() {
            // Privileged runs ignore directory permissions.
            fs::set_permissions(&data, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }
        let result = write_json_atomic(&path, &json!({"v": 2}));
        fs::set_permissions(&data, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(result, Err(StorageError::WriteFailed(_, _))));
        let read: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read, json!({"v": 1}));
    }
}
