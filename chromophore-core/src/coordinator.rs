use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::observed::{Context, Observed};
use crate::store::BackingStore;

/// Owner of a persisted tree.
///
/// The coordinator loads the root from a backing store once, binds the
/// store's `save` as the tree's only persistence path, and hands out the root
/// wrapper. It is the only party that writes to the store.
#[derive(Debug)]
pub struct Coordinator {
    root: Observed,
}

impl Coordinator {
    /// Loads the root from `store` and starts observing it.
    #[instrument(skip_all)]
    pub fn open<S>(store: S) -> Result<Self>
    where
        S: BackingStore + Send + 'static,
    {
        let initial = store.load().map_err(Error::store)?;
        debug!(kind = %initial.kind(), "loaded root");
        let root = Context::observe(initial, move |root| store.save(root).map_err(Error::store))?;
        Ok(Coordinator { root })
    }

    /// The root wrapper. Every wrapper of the tree is reached from here.
    pub fn root(&self) -> Observed {
        self.root.clone()
    }

    pub fn context(&self) -> &Context {
        self.root.context()
    }

    /// Number of mutations persisted since the tree was opened.
    pub fn mutations(&self) -> u64 {
        self.context().mutations()
    }

    /// Saves the current root even though nothing changed.
    pub fn flush(&self) -> Result<()> {
        self.context().flush()
    }

    /// Flushes and closes the tree. Wrappers still held elsewhere fail with
    /// [`Error::Closed`] from now on.
    pub fn close(self) -> Result<()> {
        self.context().close()
    }
}

/// Opens `store` and returns the root wrapper.
pub fn open<S>(store: S) -> Result<Observed>
where
    S: BackingStore + Send + 'static,
{
    Ok(Coordinator::open(store)?.root())
}
