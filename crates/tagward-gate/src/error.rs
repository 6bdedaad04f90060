//! Error types for the gate orchestrator.

use tagward_approvals::ApprovalError;
use tagward_core::ImageError;
use tagward_schedule::ScheduleError;
use thiserror::Error;

/// Result type alias for gate operations.
pub type GateResult<T> = Result<T, GateError>;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid image: {0}")]
    Image(#[from] ImageError),

    #[error("invalid update schedule: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("workload not found: {0}")]
    WorkloadNotFound(String),

    #[error("workload {workload} has no container {container}")]
    ContainerNotFound { workload: String, container: usize },
}
