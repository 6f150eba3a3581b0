use revcycle_core::{PhaseNr, ReviewObjId, UnknownAttributeError};
use thiserror::Error;

/// Failure reported by a storage backend.
///
/// Propagated unchanged; nothing in this crate retries or recovers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    #[error("corrupt {what} in storage")]
    Corruption { what: &'static str },

    /// The phase configuration needed to resolve a quorum does not exist.
    #[error("no configuration for phase {phase_nr} of review object {review_obj}")]
    MissingPhase {
        review_obj: ReviewObjId,
        phase_nr: PhaseNr,
    },
}

impl RepositoryError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        RepositoryError::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: &'static str) -> Self {
        RepositoryError::Corruption { what }
    }
}

/// Hard failures surfaced to collaborators of the mapper and allocation.
///
/// Recoverable outcomes (missing keys, unmet quorum) are `Ok(false)`, never
/// one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReviewError {
    #[error(transparent)]
    UnknownAttribute(#[from] UnknownAttributeError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
