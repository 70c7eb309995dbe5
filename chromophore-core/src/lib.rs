//! Chromophore is a deep mutation-tracking object store.
//!
//! Core concepts:
//! - **Value**: Detached plain data (mappings, sequences, scalars, callables, opaque leaves)
//! - **Observed**: A wrapper over one composite node of a tree; every read, write and
//!   structural change on any node goes through one
//! - **Context**: The shared state of a tree; its `wrap` is the factory for wrappers
//! - **Coordinator**: Owns the root and is the only party that persists it
//! - **BackingStore**: Loads and saves whole-root snapshots
//!
//! After every mutation that succeeds, anywhere in the tree, the coordinator saves a
//! snapshot of the entire root. Mutations a node refuses are never saved.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use chromophore_core::{Coordinator, MemoryStore, Value};
//!
//! let defaults = Value::from(serde_json::json!({
//!     "name": "Default User",
//!     "settings": { "preferences": { "language": "he" } }
//! }));
//! let store = Arc::new(MemoryStore::new(defaults));
//! let coordinator = Coordinator::open(store.clone()).unwrap();
//!
//! let prefs = coordinator
//!     .root()
//!     .at_path("settings.preferences")
//!     .unwrap()
//!     .unwrap()
//!     .into_node()
//!     .unwrap();
//! prefs.set("language", "en").unwrap();
//!
//! assert_eq!(store.save_count(), 1);
//! ```
//!
//! # Persistence Note
//!
//! Callables are behaviour, not data: they are never part of a saved snapshot.
//! Non-enumerable properties and prototype links are not saved either.

mod arena;
mod callable;
mod coordinator;
mod error;
mod key;
mod observed;
mod store;
mod value;

pub use arena::Attributes;
pub use callable::{Callable, Invoke};
pub use coordinator::{Coordinator, open};
pub use error::{Error, Rejection, Result};
pub use key::{Key, parse_path};
pub use observed::{Context, Descriptor, Entry, Observed};
pub use store::{BackingStore, MemoryStore};
pub use value::{Kind, Number, Opaque, Value, from_epoch_millis};
