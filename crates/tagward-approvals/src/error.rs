//! Error types for approval management.

use tagward_core::ProviderType;
use tagward_state::StateError;
use thiserror::Error;

/// Result type alias for approval operations.
pub type ApprovalResult<T> = Result<T, ApprovalError>;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval {provider}/{identifier} already exists")]
    AlreadyExists {
        provider: ProviderType,
        identifier: String,
    },

    #[error("approval {provider}/{identifier} not found")]
    NotFound {
        provider: ProviderType,
        identifier: String,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

impl ApprovalError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApprovalError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ApprovalError::AlreadyExists { .. })
    }
}

/// Failure to hand an event back to the trigger pipeline.
#[derive(Debug, Error)]
#[error("resubmission failed: {0}")]
pub struct SinkError(pub String);
