//! Error type for [`crate::BlobStore`], and its conversion into
//! [`evhub_core::Error`].

use evhub_core::{Error as CoreError, Operation};

/// Wraps `object_store::Error` with the operation it occurred under, so the
/// conversion into [`evhub_core::Error`] can attach the right tag.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("object store error during {operation}: {source}")]
    Store {
        operation: Operation,
        #[source]
        source: object_store::Error,
    },

    #[error("malformed ownership/checkpoint record at {path}: {message}")]
    Malformed { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    #[must_use]
    pub fn store(operation: Operation, source: object_store::Error) -> Self {
        Self::Store { operation, source }
    }
}

/// Classify the underlying `object_store::Error` into the Transient /
/// Permanent split spec.md §7 asks callers to distinguish. A lost
/// compare-and-set (`Precondition`/`AlreadyExists`) is not an error at all
/// at this layer — callers check for it explicitly before this conversion
/// runs (see `BlobStore::claim_one`) — so it never reaches here.
impl From<Error> for CoreError {
    fn from(err: Error) -> Self {
        match err {
            Error::Store { operation, source } => match &source {
                object_store::Error::NotFound { .. } => CoreError::permanent(operation, source.to_string()),
                object_store::Error::NotSupported { .. }
                | object_store::Error::InvalidPath { .. }
                | object_store::Error::Precondition { .. }
                | object_store::Error::AlreadyExists { .. }
                | object_store::Error::PermissionDenied { .. }
                | object_store::Error::Unauthenticated { .. } => {
                    CoreError::permanent(operation, source.to_string())
                }
                _ => CoreError::transient(operation, source.to_string()),
            },
            Error::Malformed { path, message } => {
                CoreError::permanent(Operation::ListOwnership, format!("{path}: {message}"))
            }
        }
    }
}
