//! Persisted sync bookkeeping.
//!
//! Two things survive restarts: whether the zone has been provisioned, and
//! the last change-feed cursor of each collection. [`FileSettings`] keeps them
//! in a small JSON file that is replaced atomically on every write.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use zonesync_protocol::ChangeToken;

/// Storage for the zone flag and per-collection cursors.
pub trait SettingsStore: Send + Sync {
    /// Returns true if the zone is known to exist.
    fn zone_provisioned(&self) -> bool;

    /// Records whether the zone exists.
    fn set_zone_provisioned(&self, provisioned: bool) -> SyncResult<()>;

    /// Returns the stored cursor of a collection.
    fn cursor(&self, entity_type: &str) -> Option<ChangeToken>;

    /// Stores the cursor of a collection.
    fn set_cursor(&self, entity_type: &str, cursor: &ChangeToken) -> SyncResult<()>;

    /// Forgets the cursor of a collection, forcing a full resync.
    fn clear_cursor(&self, entity_type: &str) -> SyncResult<()>;
}

/// Serialized form of the settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    /// Whether the zone is known to exist.
    #[serde(default)]
    pub zone_provisioned: bool,
    /// Raw cursor bytes per entity type.
    #[serde(default)]
    pub cursors: BTreeMap<String, Vec<u8>>,
}

/// Settings held in memory only.
#[derive(Debug, Default)]
pub struct MemorySettings {
    inner: Mutex<SettingsSnapshot>,
}

impl MemorySettings {
    /// Creates empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current settings.
    pub fn snapshot(&self) -> SettingsSnapshot {
        self.inner.lock().clone()
    }
}

impl SettingsStore for MemorySettings {
    fn zone_provisioned(&self) -> bool {
        self.inner.lock().zone_provisioned
    }

    fn set_zone_provisioned(&self, provisioned: bool) -> SyncResult<()> {
        self.inner.lock().zone_provisioned = provisioned;
        Ok(())
    }

    fn cursor(&self, entity_type: &str) -> Option<ChangeToken> {
        self.inner
            .lock()
            .cursors
            .get(entity_type)
            .map(|bytes| ChangeToken::from_bytes(bytes.clone()))
    }

    fn set_cursor(&self, entity_type: &str, cursor: &ChangeToken) -> SyncResult<()> {
        self.inner
            .lock()
            .cursors
            .insert(entity_type.to_owned(), cursor.as_bytes().to_vec());
        Ok(())
    }

    fn clear_cursor(&self, entity_type: &str) -> SyncResult<()> {
        self.inner.lock().cursors.remove(entity_type);
        Ok(())
    }
}

/// Settings persisted to a JSON file.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    inner: Mutex<SettingsSnapshot>,
}

impl FileSettings {
    /// Opens the settings file, starting empty if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = Self::load(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            inner: Mutex::new(snapshot),
        })
    }

    /// Reads a settings file without opening it for writing.
    ///
    /// Returns `None` if the file does not exist or is empty.
    pub fn load(path: &Path) -> SyncResult<Option<SettingsSnapshot>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        if data.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| SyncError::Settings(format!("{}: {e}", path.display())))
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of the current settings.
    pub fn snapshot(&self) -> SettingsSnapshot {
        self.inner.lock().clone()
    }

    fn update<F>(&self, f: F) -> SyncResult<()>
    where
        F: FnOnce(&mut SettingsSnapshot),
    {
        let mut inner = self.inner.lock();
        let mut next = inner.clone();
        f(&mut next);
        if next == *inner {
            return Ok(());
        }
        self.persist(&next)?;
        *inner = next;
        Ok(())
    }

    /// Writes to a temporary file and renames it over the settings file.
    fn persist(&self, snapshot: &SettingsSnapshot) -> SyncResult<()> {
        let data = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| SyncError::Settings(e.to_string()))?;

        let temp_path = self.path.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        self.sync_directory()?;
        Ok(())
    }

    /// Fsyncs the directory holding the settings file so the rename is durable.
    #[cfg(unix)]
    fn sync_directory(&self) -> SyncResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        File::open(dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> SyncResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced.
        Ok(())
    }
}

impl SettingsStore for FileSettings {
    fn zone_provisioned(&self) -> bool {
        self.inner.lock().zone_provisioned
    }

    fn set_zone_provisioned(&self, provisioned: bool) -> SyncResult<()> {
        self.update(|s| s.zone_provisioned = provisioned)
    }

    fn cursor(&self, entity_type: &str) -> Option<ChangeToken> {
        self.inner
            .lock()
            .cursors
            .get(entity_type)
            .map(|bytes| ChangeToken::from_bytes(bytes.clone()))
    }

    fn set_cursor(&self, entity_type: &str, cursor: &ChangeToken) -> SyncResult<()> {
        self.update(|s| {
            s.cursors
                .insert(entity_type.to_owned(), cursor.as_bytes().to_vec());
        })
    }

    fn clear_cursor(&self, entity_type: &str) -> SyncResult<()> {
        self.update(|s| {
            s.cursors.remove(entity_type);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_settings() {
        let settings = MemorySettings::new();
        assert!(!settings.zone_provisioned());
        assert!(settings.cursor("Note").is_none());

        settings.set_zone_provisioned(true).unwrap();
        settings
            .set_cursor("Note", &ChangeToken::from_bytes(vec![1, 2]))
            .unwrap();
        assert!(settings.zone_provisioned());
        assert_eq!(settings.cursor("Note"), Some(ChangeToken::from_bytes(vec![1, 2])));

        settings.clear_cursor("Note").unwrap();
        assert!(settings.cursor("Note").is_none());
    }

    #[test]
    fn file_settings_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.json");

        {
            let settings = FileSettings::open(&path).unwrap();
            settings.set_zone_provisioned(true).unwrap();
            settings
                .set_cursor("Note", &ChangeToken::from_bytes(vec![0, 0, 7]))
                .unwrap();
        }

        let settings = FileSettings::open(&path).unwrap();
        assert!(settings.zone_provisioned());
        assert_eq!(
            settings.cursor("Note"),
            Some(ChangeToken::from_bytes(vec![0, 0, 7]))
        );
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn write_syncs_nested_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("profiles").join("phone");
        fs::create_dir_all(&nested).unwrap();
        let path = nested.join("sync.json");

        let settings = FileSettings::open(&path).unwrap();
        settings.set_zone_provisioned(true).unwrap();

        assert!(FileSettings::load(&path).unwrap().unwrap().zone_provisioned);
        assert_eq!(fs::read_dir(&nested).unwrap().count(), 1);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");

        assert!(FileSettings::load(&path).unwrap().is_none());
        let settings = FileSettings::open(&path).unwrap();
        assert_eq!(settings.snapshot(), SettingsSnapshot::default());
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.json");
        fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(
            FileSettings::open(&path),
            Err(SyncError::Settings(_))
        ));
    }

    #[test]
    fn clear_cursor_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.json");

        let settings = FileSettings::open(&path).unwrap();
        settings
            .set_cursor("Note", &ChangeToken::from_bytes(vec![9]))
            .unwrap();
        settings.clear_cursor("Note").unwrap();

        let reloaded = FileSettings::load(&path).unwrap().unwrap();
        assert!(reloaded.cursors.is_empty());
    }
}
