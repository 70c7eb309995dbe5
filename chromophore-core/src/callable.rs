use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::observed::{Entry, Observed};
use crate::value::{Kind, Value};

/// Executable behaviour stored as a leaf in the tree.
///
/// `this` is the wrapper of the node the callable was invoked through, so any
/// writes the callable makes through it are observed and persisted like
/// writes from any other caller.
pub trait Invoke: Send + Sync {
    fn call(&self, this: Option<&Observed>, args: &[Value]) -> Result<Entry>;

    /// Builds a new instance. Callables are not constructors unless they say so.
    fn construct(&self, _args: &[Value]) -> Result<Value> {
        Err(Error::InvalidNodeKind {
            expected: "constructor",
            found: Kind::Callable,
        })
    }
}

impl<F> Invoke for F
where
    F: Fn(Option<&Observed>, &[Value]) -> Result<Entry> + Send + Sync,
{
    fn call(&self, this: Option<&Observed>, args: &[Value]) -> Result<Entry> {
        self(this, args)
    }
}

/// A named, shareable handle to an [`Invoke`] implementation.
///
/// Two callables are equal only if they share the same implementation
/// instance. Callables are never persisted.
#[derive(Clone)]
pub struct Callable {
    name: Arc<str>,
    func: Arc<dyn Invoke>,
}

impl Callable {
    pub fn new(name: impl Into<Arc<str>>, func: impl Invoke + 'static) -> Self {
        Callable {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Creates a callable from a closure.
    pub fn from_fn<F>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(Option<&Observed>, &[Value]) -> Result<Entry> + Send + Sync + 'static,
    {
        Callable::new(name, f)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Calls the underlying implementation directly, without a receiver.
    pub fn call(&self, this: Option<&Observed>, args: &[Value]) -> Result<Entry> {
        self.func.call(this, args)
    }

    pub fn construct(&self, args: &[Value]) -> Result<Value> {
        self.func.construct(args)
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.func), Arc::as_ptr(&other.func))
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({})", self.name)
    }
}
