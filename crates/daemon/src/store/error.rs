// Error taxonomy for store operations.

use std::io;

use nbstore_common::path::PathError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Directory, document or checkpoint does not exist.
    #[error("{kind} not found: {target}")]
    NotFound { kind: &'static str, target: String },

    /// Creating an explicitly named entry that already exists.
    #[error("{0} already exists")]
    Conflict(String),

    /// Malformed path, reserved or unrecognized name, unsupported format.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The storage medium failed. Never retried at this layer.
    #[error("storage failure while {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: io::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn not_found(kind: &'static str, target: impl Into<String>) -> Self {
        Self::NotFound { kind, target: target.into() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<PathError> for StoreError {
    fn from(error: PathError) -> Self {
        Self::InvalidArgument(error.to_string())
    }
}

/// Attach operation context to I/O failures, in the spirit of `anyhow::Context`.
pub trait StorageContext<T> {
    fn storage_context<F>(self, context: F) -> StoreResult<T>
    where
        F: FnOnce() -> String;
}

impl<T> StorageContext<T> for io::Result<T> {
    fn storage_context<F>(self, context: F) -> StoreResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| StoreError::Storage { context: context(), source })
    }
}
