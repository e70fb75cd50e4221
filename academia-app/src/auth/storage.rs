//! Client-side key/value storage and credential cleanup

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use parking_lot::RwLock;

use academia_core::directory::Directory;

/// Key prefixes under which the identity client caches credentials
pub const DEFAULT_CREDENTIAL_PREFIXES: &[&str] = &["supabase.auth.", "sb-"];

/// File name of the persistent store inside the data directory
pub const PERSISTENT_STORAGE_FILE: &str = "storage.json";

/// A flat string key/value store
pub trait ClientStorage: Send + Sync {
    fn keys(&self) -> Vec<String>;
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// Session-scoped storage, gone when the process exits
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, String>>,
}

impl ClientStorage for MemoryStorage {
    fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Persistent storage backed by a JSON file
pub struct FileStorage {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open the store in the platform data directory
    pub fn open_default() -> Result<Self> {
        let dir = Directory::data_local_directory()
            .ok_or_else(|| anyhow!("Cannot get data directory"))?;
        Self::open(dir.join(PERSISTENT_STORAGE_FILE))
    }

    /// Open (or lazily create) the store at `path`.
    ///
    /// An unreadable file is treated as empty and overwritten on next write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create {}", parent.display())
                })?;
            }
        }

        let entries = if path.exists() {
            let data = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match serde_json::from_str(&data) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(
                        "Ignoring corrupt storage file {}: {}",
                        path.display(),
                        e
                    );
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let data = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl ClientStorage for FileStorage {
    fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

/// Best-effort purge of cached credentials from both storage scopes.
///
/// Only enumerates keys and removes; never reads values. Safe to call from
/// several operations at once.
#[derive(Clone)]
pub struct StorageCleaner {
    session: Arc<dyn ClientStorage>,
    persistent: Arc<dyn ClientStorage>,
    prefixes: Vec<String>,
}

impl StorageCleaner {
    pub fn new(
        session: Arc<dyn ClientStorage>,
        persistent: Arc<dyn ClientStorage>,
        prefixes: Vec<String>,
    ) -> Self {
        let prefixes = if prefixes.is_empty() {
            DEFAULT_CREDENTIAL_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect()
        } else {
            prefixes
        };
        Self {
            session,
            persistent,
            prefixes,
        }
    }

    pub fn is_credential_key(&self, key: &str) -> bool {
        self.prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    /// Remove every credential key; returns how many were removed
    pub fn clean(&self) -> usize {
        let mut removed = 0;
        for (scope, storage) in [("session", &self.session), ("persistent", &self.persistent)] {
            let keys = storage
                .keys()
                .into_iter()
                .filter(|k| self.is_credential_key(k));
            for key in keys {
                match storage.remove(&key) {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        tracing::warn!("Failed to remove {} from {} storage: {:?}", key, scope, e);
                    }
                }
            }
        }
        if removed > 0 {
            tracing::debug!("Removed {} cached credential entries", removed);
        }
        removed
    }
}
