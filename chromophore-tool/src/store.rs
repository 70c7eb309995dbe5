use std::path::{Path, PathBuf};

use chromophore_core::{BackingStore, Value};
use chromophore_json::{JsonFileStore, JsonStoreError};
use chromophore_rocks::{RocksError, RocksStore};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnyStoreError {
    #[error("json error: {0}")]
    Json(#[from] JsonStoreError),
    #[error("rocks error: {0}")]
    Rocks(#[from] RocksError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    #[default]
    Json,
    Rocks,
}

impl std::str::FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(StoreType::Json),
            "rocks" | "rocksdb" => Ok(StoreType::Rocks),
            _ => Err(format!("unknown store type: {}", s)),
        }
    }
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreType::Json => write!(f, "json"),
            StoreType::Rocks => write!(f, "rocks"),
        }
    }
}

pub enum AnyStore {
    Json(JsonFileStore),
    Rocks(RocksStore),
}

impl AnyStore {
    pub fn open(
        store_type: StoreType,
        path: impl AsRef<Path>,
        default: Value,
    ) -> Result<Self, AnyStoreError> {
        match store_type {
            StoreType::Json => Ok(Self::Json(JsonFileStore::new(path.as_ref(), default))),
            StoreType::Rocks => Ok(Self::Rocks(RocksStore::open(path, default)?)),
        }
    }
}

impl BackingStore for AnyStore {
    type Error = AnyStoreError;

    fn load(&self) -> Result<Value, Self::Error> {
        match self {
            AnyStore::Json(s) => s.load().map_err(Into::into),
            AnyStore::Rocks(s) => s.load().map_err(Into::into),
        }
    }

    fn save(&self, root: &Value) -> Result<(), Self::Error> {
        match self {
            AnyStore::Json(s) => s.save(root).map_err(Into::into),
            AnyStore::Rocks(s) => s.save(root).map_err(Into::into),
        }
    }
}

pub fn default_store_path(store_type: StoreType) -> PathBuf {
    let dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chromophore");
    match store_type {
        StoreType::Json => dir.join("root.json"),
        StoreType::Rocks => dir.join("store"),
    }
}
