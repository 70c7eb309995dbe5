use thiserror::Error;

use crate::store::AnyStoreError;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] AnyStoreError),

    #[error("Tree error: {0}")]
    Tree(#[from] chromophore_core::Error),

    #[error("Nothing at path: {0}")]
    NotFound(String),

    #[error("Path must name a property: {0:?}")]
    EmptyPath(String),

    #[error("Defaults must be a JSON object or array: {0}")]
    InvalidDefaults(String),
}
