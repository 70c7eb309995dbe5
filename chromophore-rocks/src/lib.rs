//! RocksDB-backed store for Chromophore.
//!
//! The root snapshot is CBOR-encoded under a fixed key, with a BLAKE3 digest
//! of the encoded bytes stored beside it. A root whose bytes do not decode or
//! do not match the digest is treated as corrupt and replaced by the default.

use std::path::Path;

use chromophore_core::{BackingStore, Value};
use rocksdb::{DB, Options, WriteBatch};
use thiserror::Error;
use tracing::{debug, warn};

const ROOT_KEY: &[u8] = b"root";
const DIGEST_KEY: &[u8] = b"root.blake3";

#[derive(Debug, Error)]
pub enum RocksError {
    #[error("RocksDB error: {0}")]
    Db(#[from] rocksdb::Error),
    #[error("CBOR encoding error: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
}

/// A persistent store backed by RocksDB.
pub struct RocksStore {
    db: DB,
    default: Value,
}

impl RocksStore {
    /// Opens a RocksDB store at the given path.
    ///
    /// Creates the database if it doesn't exist. The default value is written
    /// on the first `load` that finds no root.
    pub fn open(path: impl AsRef<Path>, default: Value) -> Result<Self, RocksError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db, default })
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    /// Whether a root has been persisted.
    pub fn has_root(&self) -> Result<bool, RocksError> {
        Ok(self.db.get_pinned(ROOT_KEY)?.is_some())
    }

    fn decode(&self, bytes: &[u8]) -> Option<Value> {
        let digest = match self.db.get(DIGEST_KEY) {
            Ok(Some(digest)) => digest,
            Ok(None) => {
                warn!("root digest missing");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "root digest unreadable");
                return None;
            }
        };
        if blake3::hash(bytes).as_bytes().as_slice() != digest.as_slice() {
            warn!("root digest mismatch");
            return None;
        }
        match ciborium::from_reader::<Value, _>(bytes) {
            Ok(root) if root.is_composite() => Some(root),
            Ok(root) => {
                warn!(kind = %root.kind(), "root is not a mapping or sequence");
                None
            }
            Err(e) => {
                warn!(error = %e, "root does not decode");
                None
            }
        }
    }

    fn reset(&self) -> Result<Value, RocksError> {
        self.save(&self.default)?;
        Ok(self.default.clone())
    }
}

impl BackingStore for RocksStore {
    type Error = RocksError;

    fn load(&self) -> Result<Value, Self::Error> {
        let Some(bytes) = self.db.get(ROOT_KEY)? else {
            debug!("initializing from default");
            return self.reset();
        };
        match self.decode(&bytes) {
            Some(root) => Ok(root),
            None => {
                warn!("corrupt root, resetting to default");
                self.reset()
            }
        }
    }

    fn save(&self, root: &Value) -> Result<(), Self::Error> {
        let mut bytes = Vec::new();
        ciborium::into_writer(root, &mut bytes)?;
        let digest = blake3::hash(&bytes);

        let mut batch = WriteBatch::default();
        batch.put(ROOT_KEY, &bytes);
        batch.put(DIGEST_KEY, digest.as_bytes());
        self.db.write(batch)?;
        debug!(bytes = bytes.len(), digest = %digest.to_hex(), "saved root");
        Ok(())
    }
}
