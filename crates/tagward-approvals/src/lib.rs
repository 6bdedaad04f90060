//! tagward-approvals: consent gating for candidate updates.
//!
//! An [`Approval`] is a persisted voting record keyed by provider and
//! identifier. The [`ApprovalManager`] owns the state machine: votes and
//! rejections mutate the record, and the first write that leaves it
//! approved (quorum reached, not rejected) hands the captured trigger
//! event back to an [`EventSink`] so the decision pipeline runs again.
//!
//! Records expire after their deadline; [`ApprovalManager::run_expiry`]
//! sweeps them on a timer until shut down.

pub mod approval;
pub mod error;
pub mod manager;
pub mod sink;

pub use approval::{Approval, ApprovalStatus, ApprovalView};
pub use error::{ApprovalError, ApprovalResult, SinkError};
pub use manager::{ApprovalManager, KEY_PREFIX};
pub use sink::{EventSink, NoopSink};
