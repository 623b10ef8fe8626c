//! Persisted unit state
//!
//! The reconciler owns a small amount of durable state (the controller
//! endpoint last seen over relation data) that must survive process
//! restarts. It is persisted through the [`StateStore`] abstraction so the
//! reconciler never depends on framework-implicit storage; the store is
//! written before any action that depends on the stored value is
//! considered complete.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// =============================================================================
// Port Trait
// =============================================================================

/// Key/value persistence scoped to a reconciliation step.
///
/// Single-threaded event handling means no concurrent writers; the store
/// only has to guarantee durability of a completed `put`/`delete`.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Volatile store for tests and standalone runs
#[derive(Default)]
pub struct MemoryStateStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

// =============================================================================
// File-Backed Store
// =============================================================================

/// JSON file on local disk, rewritten atomically on every mutation.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write-to-temp-then-rename so a crash mid-write never leaves a
    /// truncated state file behind.
    fn save(&self, entries: &HashMap<String, String>) -> Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path).map_err(Error::from)
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}
