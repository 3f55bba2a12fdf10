use crate::services::{guard_store::GuardError, storage_service::StorageError};
use thiserror::Error;

/// Why one notification could not be carried through.
///
/// Every variant is scoped to a single resource and a single delivery. None of
/// them stop the process: a later re-delivery or resync retries from scratch.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("could not empty bucket `{bucket}`: {source}")]
    Empty {
        bucket: String,
        #[source]
        source: StorageError,
    },
    #[error("bucket `{bucket}` emptied but guard release failed: {source}")]
    Release {
        bucket: String,
        #[source]
        source: GuardError,
    },
}

impl ReconcileError {
    /// Shutdown interrupted the attempt; the guard was left in place.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ReconcileError::Empty {
                source: StorageError::Cancelled(_),
                ..
            }
        )
    }

    /// Whether a later delivery can be expected to succeed.
    ///
    /// Only malformed requests are not; they fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ReconcileError::Empty {
                source: StorageError::InvalidRequest(_),
                ..
            }
        )
    }
}
