//! Error taxonomy for resource store interactions.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Walk an error chain looking for a not-found store error.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|e| e.downcast_ref::<StoreError>().map(StoreError::is_not_found).unwrap_or(false))
}

pub fn is_already_exists(err: &anyhow::Error) -> bool {
    err.chain().any(|e| e.downcast_ref::<StoreError>().map(StoreError::is_already_exists).unwrap_or(false))
}

pub fn is_conflict(err: &anyhow::Error) -> bool {
    err.chain().any(|e| e.downcast_ref::<StoreError>().map(StoreError::is_conflict).unwrap_or(false))
}
