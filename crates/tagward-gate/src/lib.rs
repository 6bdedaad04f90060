//! tagward-gate: decides whether a detected tag change reaches a workload.
//!
//! An event whose tag is older than one already admitted for the same base
//! image and release line is dropped as superseded. Otherwise, for every
//! workload running the event's base image the [`Gate`] asks, in order:
//! does the workload's policy want this tag, is a maintenance window
//! open, and (when the workload requires votes) has the approval reached
//! quorum. Only then is the workload patched through its
//! [`WorkloadClient`]. Approvals that reach quorum come back through a
//! [`ChannelSink`] and are re-evaluated by [`Gate::run_resubmissions`].

pub mod error;
pub mod gate;
pub mod sink;
pub mod workload;

pub use error::{GateError, GateResult};
pub use gate::{Gate, Outcome, SubmitReport, WorkloadOutcome};
pub use sink::ChannelSink;
pub use workload::{InMemoryWorkloads, Patch, Workload, WorkloadClient};
