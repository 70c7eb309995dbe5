use std::fmt;

use crate::key::Key;
use crate::value::Kind;

/// Why a node refused a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// A new member was added to a node that no longer accepts extensions.
    NotExtensible,
    /// The property exists and is not writable.
    ReadOnly(Key),
    /// The property is not configurable.
    NonConfigurable(Key),
    /// A sequence was addressed with a key that is not an index.
    NotAnIndex(Key),
    /// A sequence write landed too far past the end.
    IndexOutOfRange(Key),
    /// The node being stored already contains the node it is stored into.
    Cycle,
    /// The prototype link would make a node its own ancestor.
    PrototypeCycle,
    /// Extensibility cannot be restored once prevented.
    Irreversible,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotExtensible => write!(f, "node is not extensible"),
            Rejection::ReadOnly(key) => write!(f, "property {} is read-only", key),
            Rejection::NonConfigurable(key) => {
                write!(f, "property {} is not configurable", key)
            }
            Rejection::NotAnIndex(key) => write!(f, "{} is not a sequence index", key),
            Rejection::IndexOutOfRange(key) => write!(f, "index {} is out of range", key),
            Rejection::Cycle => write!(f, "node would contain itself"),
            Rejection::PrototypeCycle => write!(f, "prototype chain would be cyclic"),
            Rejection::Irreversible => write!(f, "extensibility cannot be restored"),
        }
    }
}

/// Error type for tree operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("mutation rejected: {0}")]
    Rejected(Rejection),
    #[error("expected {expected}, found {found}")]
    InvalidNodeKind { expected: &'static str, found: Kind },
    #[error("node belongs to a different tree")]
    ForeignNode,
    #[error("tree contains a cycle and cannot be persisted")]
    Cycle,
    #[error("backing store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("tree has been closed")]
    Closed,
    #[error("invalid path: {0:?}")]
    InvalidPath(String),
    #[error("{0}")]
    Invocation(String),
}

impl Error {
    /// Wraps a backing store failure.
    pub fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Store(Box::new(err))
    }

    /// Returns the rejection reason if this is a refused mutation.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Error::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

impl From<Rejection> for Error {
    fn from(r: Rejection) -> Self {
        Error::Rejected(r)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
