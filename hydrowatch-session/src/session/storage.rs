//! Session Storage - Persistence layer for the session record
//!
//! A [`KeyValueStore`] holds the raw entries; [`SessionStorage`] maps them to
//! and from [`PersistedRecord`]. All entries are replaced or cleared together.

use super::types::PersistedRecord;
use hydrowatch_core::{storage_error, HydroResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Durable key-value slot for the session entries
pub trait KeyValueStore: Send + Sync {
    /// All stored entries; empty when nothing is stored
    fn read(&self) -> HydroResult<BTreeMap<String, String>>;

    /// Replace every entry in one step
    fn replace(&self, entries: &BTreeMap<String, String>) -> HydroResult<()>;

    /// Remove every entry
    fn clear(&self) -> HydroResult<()>;
}

/// JSON file store; writes go through a temp file and a rename
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "session.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl KeyValueStore for FileStore {
    fn read(&self) -> HydroResult<BTreeMap<String, String>> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(storage_error!(
                    format!("Failed to read {}: {}", self.path.display(), e),
                    "file_store",
                    e
                ))
            }
        };

        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let entries = serde_json::from_str(&data)?;
        debug!("Loaded session entries from {}", self.path.display());
        Ok(entries)
    }

    fn replace(&self, entries: &BTreeMap<String, String>) -> HydroResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    storage_error!(
                        format!("Failed to create {}: {}", parent.display(), e),
                        "file_store",
                        e
                    )
                })?;
            }
        }

        let json_data = serde_json::to_string_pretty(entries)?;
        let temp_path = self.temp_path();

        std::fs::write(&temp_path, json_data).map_err(|e| {
            storage_error!(
                format!("Failed to write {}: {}", temp_path.display(), e),
                "file_store",
                e
            )
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&temp_path, &self.path).map_err(|e| {
            storage_error!(
                format!("Failed to move session file into place: {}", e),
                "file_store",
                e
            )
        })?;

        debug!("Saved session entries to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> HydroResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Deleted session file: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error!(
                format!("Failed to delete {}: {}", self.path.display(), e),
                "file_store",
                e
            )),
        }
    }
}

/// In-process store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    fail_writes: AtomicBool,
    fail_clears: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entries
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Make subsequent `replace` calls fail, simulating a full disk
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `clear` calls fail
    pub fn set_fail_clears(&self, fail: bool) {
        self.fail_clears.store(fail, Ordering::SeqCst);
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self) -> HydroResult<BTreeMap<String, String>> {
        Ok(self.entries())
    }

    fn replace(&self, entries: &BTreeMap<String, String>) -> HydroResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(storage_error!("Memory store is read-only", "memory_store"));
        }
        *self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = entries.clone();
        Ok(())
    }

    fn clear(&self) -> HydroResult<()> {
        if self.fail_clears.load(Ordering::SeqCst) {
            return Err(storage_error!("Memory store cannot be cleared", "memory_store"));
        }
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        Ok(())
    }
}

/// Session storage manager
#[derive(Clone)]
pub struct SessionStorage {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStorage {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load the stored session, if any
    pub fn load(&self) -> HydroResult<Option<PersistedRecord>> {
        let entries = self.store.read()?;
        let record = PersistedRecord::from_entries(&entries)?;
        match &record {
            Some(record) => info!("Found persisted {} session", record.role),
            None => debug!("No persisted session"),
        }
        Ok(record)
    }

    pub fn save(&self, record: &PersistedRecord) -> HydroResult<()> {
        let entries = record.to_entries()?;
        self.store.replace(&entries)?;
        debug!("Persisted {} session", record.role);
        Ok(())
    }

    /// Remove the stored session
    ///
    /// Falls back to overwriting with an empty record when removal fails.
    pub fn clear(&self) -> HydroResult<()> {
        let error = match self.store.clear() {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        warn!("Failed to clear persisted session, overwriting instead: {}", error);
        self.store.replace(&BTreeMap::new()).map_err(|e| {
            warn!("Failed to overwrite persisted session: {}", e);
            error
        })
    }
}
