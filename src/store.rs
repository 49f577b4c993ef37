//! Opaque key/value string storage.
//!
//! The library only needs `get`/`set` of string blobs (the rhythm registry and
//! the chosen tunebook file are stored this way). [`MemoryStore`] is used in
//! tests; [`YamlFileStore`] persists a flat YAML mapping on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ChordGridError, Result};

/// Store key for the path of the tunebook the user last opened.
pub const TUNEBOOK_FILE_KEY: &str = "TunebookFile";

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// A store backed by a YAML file holding a `key: value` mapping.
/// Every `set` writes the whole file back.
#[derive(Debug, Clone)]
pub struct YamlFileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl YamlFileStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| {
                ChordGridError::Store(format!("Failed to read store {:?}: {}", path, e))
            })?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_yaml::from_str(&contents).map_err(|e| {
                    ChordGridError::Store(format!("Failed to parse store {:?}: {}", path, e))
                })?
            }
        } else {
            debug!("Store {:?} does not exist yet", path);
            BTreeMap::new()
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&self.values)
            .map_err(|e| ChordGridError::Store(format!("Failed to serialize store: {}", e)))?;
        fs::write(&self.path, yaml).map_err(|e| {
            ChordGridError::Store(format!("Failed to write store {:?}: {}", self.path, e))
        })
    }
}

impl KeyValueStore for YamlFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap(), Some("1".to_string()));
    }

    #[test]
    fn test_yaml_store_persists_multiline_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.yaml");

        let mut store = YamlFileStore::open(&path).unwrap();
        store.set("Rhythms", "[Jig, 6/8, 2 bpb]\n[Reel, 4/4, 4 bpb]\n").unwrap();
        store.set(TUNEBOOK_FILE_KEY, "tunes.txt").unwrap();

        let reopened = YamlFileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("Rhythms").unwrap().as_deref(),
            Some("[Jig, 6/8, 2 bpb]\n[Reel, 4/4, 4 bpb]\n")
        );
        assert_eq!(reopened.get(TUNEBOOK_FILE_KEY).unwrap().as_deref(), Some("tunes.txt"));
    }

    #[test]
    fn test_yaml_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.yaml");
        fs::write(&path, "- not\n- a\n- mapping\n").unwrap();
        assert!(matches!(YamlFileStore::open(&path), Err(ChordGridError::Store(_))));
    }
}
