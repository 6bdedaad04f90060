//! Resubmission seam between the approval manager and the trigger pipeline.

use tagward_core::Event;

use crate::error::SinkError;

/// Receives events whose approval reached quorum.
///
/// Called while a vote is being recorded, so implementations must not block.
pub trait EventSink: Send + Sync {
    fn submit(&self, event: Event) -> Result<(), SinkError>;
}

/// Sink that drops everything. Useful where nothing consumes resubmissions.
pub struct NoopSink;

impl EventSink for NoopSink {
    fn submit(&self, _event: Event) -> Result<(), SinkError> {
        Ok(())
    }
}
