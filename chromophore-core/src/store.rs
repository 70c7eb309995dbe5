use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::Value;

/// Durable home of a tree's root.
///
/// Stores see only complete root snapshots: `save` always receives the whole
/// tree, never a delta. They own the encoding and any recovery from damaged
/// data; the tree never sees a corrupt store.
///
/// All methods take `&self` to support stores with internal locking (e.g., RocksDB).
pub trait BackingStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the persisted root.
    ///
    /// When nothing has been persisted yet, the store persists its default
    /// value and returns it. When the persisted data cannot be decoded, the
    /// store logs a warning, persists the default in its place, and returns it.
    fn load(&self) -> Result<Value, Self::Error>;

    /// Overwrites the persisted root.
    fn save(&self, root: &Value) -> Result<(), Self::Error>;
}

impl<S: BackingStore + ?Sized> BackingStore for Arc<S> {
    type Error = S::Error;

    fn load(&self) -> Result<Value, Self::Error> {
        (**self).load()
    }

    fn save(&self, root: &Value) -> Result<(), Self::Error> {
        (**self).save(root)
    }
}

/// An in-memory store.
///
/// Useful for testing and as a reference implementation. It also counts
/// saves, which makes persistence behaviour easy to assert on.
#[derive(Debug, Default)]
pub struct MemoryStore {
    default: Value,
    data: RwLock<Option<Value>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store that initializes to `default` on first load.
    pub fn new(default: Value) -> Self {
        MemoryStore {
            default,
            data: RwLock::new(None),
            saves: AtomicUsize::new(0),
        }
    }

    /// Creates a store that already holds `data`.
    pub fn with_data(default: Value, data: Value) -> Self {
        MemoryStore {
            default,
            data: RwLock::new(Some(data)),
            saves: AtomicUsize::new(0),
        }
    }

    /// The persisted root, if any.
    pub fn snapshot(&self) -> Option<Value> {
        self.data.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of `save` calls so far. Initialization on first load is not
    /// counted.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl BackingStore for MemoryStore {
    type Error = Infallible;

    fn load(&self) -> Result<Value, Self::Error> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get_or_insert_with(|| self.default.clone()).clone())
    }

    fn save(&self, root: &Value) -> Result<(), Self::Error> {
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = Some(root.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
