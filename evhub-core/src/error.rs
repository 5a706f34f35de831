//! Error types for the event-hub processor core.

use std::fmt;

/// The operation an error is attributed to, surfaced to `on_error` so the
/// handler can distinguish "renewing a lease failed" from "reading events
/// failed" without downcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListOwnership,
    ClaimOwnership,
    RenewOwnership,
    ListCheckpoints,
    UpdateCheckpoint,
    GetPartitionIds,
    ReadEvents,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ListOwnership => "ListOwnership",
            Self::ClaimOwnership => "ClaimOwnership",
            Self::RenewOwnership => "RenewOwnership",
            Self::ListCheckpoints => "ListCheckpoints",
            Self::UpdateCheckpoint => "UpdateCheckpoint",
            Self::GetPartitionIds => "GetPartitionIds",
            Self::ReadEvents => "ReadEvents",
        };
        f.write_str(s)
    }
}

/// Error type for the processor core.
///
/// Variants map directly onto the error kinds distinguished in the design:
/// transient errors are retried by the caller before they ever reach here,
/// permanent ones are surfaced to `on_error` but don't stop the loop,
/// configuration errors are synchronous/fatal, and logic errors are
/// programmer mistakes (e.g. checkpointing a synthetic event).
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("transient error during {operation}: {message}")]
    Transient { operation: Operation, message: String },

    #[error("permanent error during {operation}: {message}")]
    Permanent { operation: Operation, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("logic error: {0}")]
    Logic(String),
}

impl Error {
    #[must_use]
    pub fn transient(operation: Operation, message: impl Into<String>) -> Self {
        Self::Transient { operation, message: message.into() }
    }

    #[must_use]
    pub fn permanent(operation: Operation, message: impl Into<String>) -> Self {
        Self::Permanent { operation, message: message.into() }
    }

    /// The operation this error is attributed to, if any (configuration and
    /// logic errors aren't attributed to a store/transport operation).
    #[must_use]
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Self::Transient { operation, .. } | Self::Permanent { operation, .. } => {
                Some(*operation)
            }
            Self::Configuration(_) | Self::Logic(_) => None,
        }
    }

    /// Whether a caller should retry this error per its retry policy.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Result type alias for the processor core.
pub type Result<T> = std::result::Result<T, Error>;
