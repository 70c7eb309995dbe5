//! JSON file store for Chromophore.
//!
//! The whole root lives in one pretty-printed JSON file. A missing file is
//! created from the default value; an unreadable one is replaced by it. Saves
//! go through a temporary file renamed over the target, so the file on disk
//! is always a complete root.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chromophore_core::{BackingStore, Value};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum JsonStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A store keeping its root in a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    default: Value,
}

impl JsonFileStore {
    /// Creates a store for `path`. Nothing is read or written until first use.
    pub fn new(path: impl Into<PathBuf>, default: Value) -> Self {
        JsonFileStore {
            path: path.into(),
            default,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    /// Whether the backing file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Reads one top-level key.
    ///
    /// A key missing from the file but present in the default value is copied
    /// over from the default and the file is rewritten.
    pub fn fetch(&self, key: &str) -> Result<Option<Value>, JsonStoreError> {
        let mut root = self.load()?;
        if let Some(value) = root.get(key) {
            return Ok(Some(value.clone()));
        }
        let Some(fallback) = self.default.get(key).cloned() else {
            return Ok(None);
        };
        if let Some(map) = root.as_mapping_mut() {
            debug!(key, "back-filling key from default");
            map.insert(key.to_string(), fallback.clone());
            self.save(&root)?;
        }
        Ok(Some(fallback))
    }

    /// Whether the persisted root has the top-level key.
    pub fn contains(&self, key: &str) -> Result<bool, JsonStoreError> {
        Ok(self.load()?.get(key).is_some())
    }

    /// Top-level keys of the persisted root, in file order.
    pub fn keys(&self) -> Result<Vec<String>, JsonStoreError> {
        Ok(match self.load()? {
            Value::Mapping(map) => map.into_keys().collect(),
            Value::Sequence(items) => (0..items.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        })
    }

    /// Loads the root, lets `f` change it, and saves the result.
    pub fn update<F>(&self, f: F) -> Result<Value, JsonStoreError>
    where
        F: FnOnce(&mut Value),
    {
        let mut root = self.load()?;
        f(&mut root);
        self.save(&root)?;
        Ok(root)
    }

    fn reset(&self) -> Result<Value, JsonStoreError> {
        self.save(&self.default)?;
        Ok(self.default.clone())
    }
}

impl BackingStore for JsonFileStore {
    type Error = JsonStoreError;

    fn load(&self) -> Result<Value, Self::Error> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "initializing from default");
                return self.reset();
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(root) if root.is_composite() => Ok(root),
            Ok(root) => {
                warn!(
                    path = %self.path.display(),
                    kind = %root.kind(),
                    "root is not a mapping or sequence, resetting to default"
                );
                self.reset()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt JSON file, resetting to default");
                self.reset()
            }
        }
    }

    fn save(&self, root: &Value) -> Result<(), Self::Error> {
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };
        let text = serde_json::to_string_pretty(root)?;

        // Same directory, so the rename cannot cross filesystems.
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(text.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        debug!(path = %self.path.display(), bytes = text.len(), "saved root");
        Ok(())
    }
}
