//! Error types for editing, persistence and sync.

use dgm_core::id::DiagramId;
use dgm_core::model::ModelError;
use thiserror::Error;

/// Rejected command input. Commands validate before mutating, so a
/// `CommandError` always means the diagram is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("validation failed: {0}")]
    Validation(String),
}

impl From<ModelError> for CommandError {
    fn from(err: ModelError) -> Self {
        CommandError::Validation(err.to_string())
    }
}

/// Failures reported by a `DiagramStore` backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("write rejected: {0}")]
    Conflict(String),
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

impl From<ModelError> for StoreError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::UnknownShape(_) | ModelError::UnknownConnector(_) => {
                StoreError::NotFound(err.to_string())
            }
            other => StoreError::Conflict(other.to_string()),
        }
    }
}

/// Top-level error of the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditorError {
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The local change was applied (and recorded) but could not be persisted.
    #[error("persistence failed: {0}")]
    Persistence(#[source] StoreError),

    #[error("diagram {0} is not open")]
    UnknownDiagram(DiagramId),
}
