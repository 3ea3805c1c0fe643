//! Persistence delegated to an external key-value store (§4.1, §6).
//!
//! The core never owns durable storage for settings; it only defines the
//! two-method boundary. Two implementations ship for development and
//! testing: an in-memory store and a YAML-file-backed store mirroring the
//! lineage's TOML-backed notebook registry loader.

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Errors raised by a `SettingsStore` implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write settings file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file {path} is not valid YAML: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The external settings persistence boundary (§4.1, §6's "Settings
/// store: read_all() -> {path: value}, write(path, value); must be
/// durable").
pub trait SettingsStore: Send + Sync {
    fn read_all(&self) -> StoreResult<HashMap<String, Value>>;
    fn write_one(&self, path: &str, value: Value) -> StoreResult<()>;
}

/// A non-durable in-memory store, useful for tests and for the
/// compiled-in "default" scope which is never written to at runtime.
#[derive(Default)]
pub struct InMemorySettingsStore {
    values: RwLock<HashMap<String, Value>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(values: HashMap<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn read_all(&self) -> StoreResult<HashMap<String, Value>> {
        Ok(self.values.read().unwrap().clone())
    }

    fn write_one(&self, path: &str, value: Value) -> StoreResult<()> {
        self.values.write().unwrap().insert(path.to_string(), value);
        Ok(())
    }
}

/// A YAML-file-backed durable store. Reads and writes the whole document
/// on every call — settings bundles are small and writes are already
/// serialized per project by the [`super::resolver::SettingsResolver`].
pub struct YamlFileSettingsStore {
    path: PathBuf,
}

impl YamlFileSettingsStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn load(&self) -> StoreResult<HashMap<String, Value>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_yaml::from_str(&contents).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, values: &HashMap<String, Value>) -> StoreResult<()> {
        let yaml = serde_yaml::to_string(values).expect("HashMap<String, Value> always serializes");
        std::fs::write(&self.path, yaml).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl SettingsStore for YamlFileSettingsStore {
    fn read_all(&self) -> StoreResult<HashMap<String, Value>> {
        self.load()
    }

    fn write_one(&self, path: &str, value: Value) -> StoreResult<()> {
        let mut values = self.load()?;
        values.insert(path.to_string(), value);
        self.save(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_round_trips() {
        let store = InMemorySettingsStore::new();
        store
            .write_one("enhancement.auto_threshold", serde_json::json!(85.0))
            .unwrap();
        let all = store.read_all().unwrap();
        assert_eq!(all["enhancement.auto_threshold"], serde_json::json!(85.0));
    }

    #[test]
    fn yaml_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.yaml");

        let store = YamlFileSettingsStore::new(&path);
        store
            .write_one("router.quality_tier", serde_json::json!("premium"))
            .unwrap();

        let reopened = YamlFileSettingsStore::new(&path);
        let all = reopened.read_all().unwrap();
        assert_eq!(all["router.quality_tier"], serde_json::json!("premium"));
    }

    #[test]
    fn yaml_store_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.yaml");
        let store = YamlFileSettingsStore::new(&path);
        assert!(store.read_all().unwrap().is_empty());
    }
}
