//! Snapshot store trait and implementations.
//!
//! The snapshot store is the last-resort persistence substitute used when the
//! backend is unreachable: full domain snapshots are written to it on failed
//! mutations and read back on failed loads. There is no expiry, no size bound,
//! and no merge with the backend when connectivity returns.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::TrackerError;

/// Snapshot key for the procedures list.
pub const PROCEDURES_KEY: &str = "procedures";

/// Snapshot key for the schedules list.
pub const SCHEDULES_KEY: &str = "schedules";

/// Key-value store for serialized domain snapshots.
///
/// Abstracted to support different backings (filesystem, tests).
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot under a key, replacing any previous one.
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), TrackerError>;

    /// Load the snapshot stored under a key, if any.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, TrackerError>;
}

/// Snapshot store writing one JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Create a store rooted at the given directory.
    ///
    /// The directory is created lazily on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), TrackerError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| TrackerError::Snapshot(format!("create {}: {}", self.dir.display(), e)))?;

        let path = self.path_for(key);
        std::fs::write(&path, bytes)
            .map_err(|e| TrackerError::Snapshot(format!("write {}: {}", path.display(), e)))
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, TrackerError> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrackerError::Snapshot(format!(
                "read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// An in-memory snapshot store for testing.
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemorySnapshotStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), TrackerError> {
        self.entries
            .lock()
            .expect("snapshot map poisoned")
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, TrackerError> {
        Ok(self
            .entries
            .lock()
            .expect("snapshot map poisoned")
            .get(key)
            .cloned())
    }
}
