//! The gate orchestrator.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tagward_approvals::{Approval, ApprovalManager, ApprovalStatus};
use tagward_core::tracker::{merge, observe};
use tagward_core::version::newest_available;
use tagward_core::{
    Event, ImageRef, ProviderType, TrackedImage, TriggerType, UpdatePolicy, annotations,
    policy_from_labels,
};
use tagward_schedule::{UpdateSchedule, is_update_allowed};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::GateResult;
use crate::workload::{Workload, WorkloadClient};

/// What happened to one workload container for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Updated { from: String, to: String },
    AwaitingApproval { identifier: String },
    Rejected { identifier: String },
    OutsideWindow,
    PolicyDenied,
    /// A newer tag on the same release line was already admitted.
    Superseded { by: String },
    /// The workload has no update policy.
    NotTracked,
    Failed { reason: String },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Updated { from, to } => write!(f, "updated {from} -> {to}"),
            Outcome::AwaitingApproval { identifier } => write!(f, "awaiting approval {identifier}"),
            Outcome::Rejected { identifier } => write!(f, "rejected {identifier}"),
            Outcome::OutsideWindow => f.write_str("outside update window"),
            Outcome::PolicyDenied => f.write_str("denied by policy"),
            Outcome::Superseded { by } => write!(f, "superseded by {by}"),
            Outcome::NotTracked => f.write_str("not tracked"),
            Outcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadOutcome {
    pub workload: String,
    pub container: usize,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Per-workload results of one submitted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitReport {
    pub image: String,
    pub outcomes: Vec<WorkloadOutcome>,
}

impl SubmitReport {
    pub fn updated(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Updated { .. }))
            .count()
    }

    pub fn outcome_for(&self, workload: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.workload == workload)
            .map(|o| &o.outcome)
    }
}

pub struct Gate {
    workloads: Arc<dyn WorkloadClient>,
    approvals: Arc<ApprovalManager>,
    provider: ProviderType,
    default_deadline: Duration,
    /// Every tag admitted so far, folded per base image.
    admitted: Mutex<Vec<TrackedImage>>,
}

impl Gate {
    pub fn new(
        workloads: Arc<dyn WorkloadClient>,
        approvals: Arc<ApprovalManager>,
        provider: ProviderType,
    ) -> Self {
        Self {
            workloads,
            approvals,
            provider,
            default_deadline: Duration::from_secs(annotations::APPROVAL_DEADLINE_DEFAULT_HOURS * 3600),
            admitted: Mutex::new(Vec::new()),
        }
    }

    /// Deadline for approvals on workloads without their own deadline annotation.
    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = deadline;
        self
    }

    pub fn approvals(&self) -> &Arc<ApprovalManager> {
        &self.approvals
    }

    /// Run the gate for a trigger event now.
    pub fn submit(&self, event: Event) -> GateResult<SubmitReport> {
        self.submit_at(event, Utc::now())
    }

    /// Run the gate for a trigger event as of `now`.
    ///
    /// Workloads are evaluated independently: one failing workload is
    /// reported and logged without stopping the rest.
    pub fn submit_at(&self, event: Event, now: DateTime<Utc>) -> GateResult<SubmitReport> {
        let new_image = event.repository.image()?;
        let superseded_by = self.admit(&new_image);
        let mut outcomes = Vec::new();

        for workload in self.workloads.list()? {
            for (container, current) in workload.images.iter().enumerate() {
                if current.repository() != new_image.repository() {
                    continue;
                }

                let outcome = match &superseded_by {
                    Some(by) => Outcome::Superseded { by: by.clone() },
                    None => match self.evaluate(&workload, container, current, &new_image, &event, now) {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!(workload = %workload.id(), error = %e, "failed to evaluate update");
                            Outcome::Failed {
                                reason: e.to_string(),
                            }
                        }
                    },
                };
                debug!(workload = %workload.id(), container, %outcome, "update evaluated");
                outcomes.push(WorkloadOutcome {
                    workload: workload.id(),
                    container,
                    outcome,
                });
            }
        }

        if outcomes.is_empty() {
            debug!(image = %new_image, "no workload runs this image");
        }
        Ok(SubmitReport {
            image: new_image.to_string(),
            outcomes,
        })
    }

    /// Fold `image` into the admitted set, unless a newer tag on the same
    /// release line is already there. Returns that newer tag if so.
    fn admit(&self, image: &ImageRef) -> Option<String> {
        let mut admitted = self.admitted.lock().unwrap_or_else(PoisonError::into_inner);

        let newer = admitted
            .iter()
            .find(|t| t.is_semver_tracked() && t.image.repository() == image.repository())
            .and_then(|t| newest_available(image.tag(), t.tags.as_deref().unwrap_or_default(), true));
        if let Some(newer) = newer {
            info!(image = %image, %newer, "stale tag, a newer one was already admitted");
            return Some(newer);
        }

        let observed = observe(image.clone(), self.provider.as_str(), "");
        *admitted = merge(std::mem::take(&mut *admitted), observed);
        None
    }

    /// Tags admitted so far, one entry per base image.
    pub fn admitted(&self) -> Vec<TrackedImage> {
        self.admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn evaluate(
        &self,
        workload: &Workload,
        container: usize,
        current: &ImageRef,
        new_image: &ImageRef,
        event: &Event,
        now: DateTime<Utc>,
    ) -> GateResult<Outcome> {
        let policy = policy_from_labels(&workload.labels, &workload.annotations);
        if matches!(policy, UpdatePolicy::Never) {
            return Ok(Outcome::NotTracked);
        }

        match policy.should_update(current.tag(), new_image.tag()) {
            Ok(true) => {}
            Ok(false) => return Ok(Outcome::PolicyDenied),
            Err(e) => {
                debug!(workload = %workload.id(), policy = %policy.name(), error = %e, "policy check failed");
                return Ok(Outcome::PolicyDenied);
            }
        }

        let schedule = match workload.annotations.get(annotations::UPDATE_SCHEDULE) {
            Some(value) => UpdateSchedule::parse(value)?,
            None => None,
        };
        let last_update = workload.last_update().unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        if !is_update_allowed(schedule.as_ref(), last_update, now) {
            return Ok(Outcome::OutsideWindow);
        }

        let votes_required = self.votes_required(workload);
        let identifier = format!("{}:{}", workload.id(), new_image.tag());
        if votes_required > 0 {
            match self.approvals.get(self.provider, &identifier) {
                Ok(approval) => match approval.status() {
                    ApprovalStatus::Approved => {}
                    ApprovalStatus::Rejected => return Ok(Outcome::Rejected { identifier }),
                    ApprovalStatus::Pending => return Ok(Outcome::AwaitingApproval { identifier }),
                },
                Err(e) if e.is_not_found() => {
                    let mut approval = Approval::new(self.provider, identifier.clone(), event.clone())
                        .with_versions(current.tag(), new_image.tag())
                        .with_votes_required(votes_required)
                        .with_deadline(self.deadline(workload))
                        .with_message(format!(
                            "New image is available for {}: {} -> {}",
                            workload.id(),
                            current,
                            new_image
                        ));
                    approval.digest = event.repository.digest.clone();
                    match self.approvals.create(approval) {
                        Ok(_) => {}
                        Err(e) if e.is_already_exists() => {}
                        Err(e) => return Err(e.into()),
                    }
                    return Ok(Outcome::AwaitingApproval { identifier });
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.workloads
            .update_image(&workload.id(), container, new_image, now)?;

        if votes_required > 0 {
            if let Err(e) = self.approvals.delete(self.provider, &identifier) {
                warn!(%identifier, error = %e, "failed to remove fulfilled approval");
            } else {
                debug!(%identifier, "approval removed, update complete");
            }
        }

        info!(
            workload = %workload.id(),
            policy = %policy.name(),
            from = %current.tag(),
            to = %new_image.tag(),
            "update applied"
        );
        Ok(Outcome::Updated {
            from: current.to_string(),
            to: new_image.to_string(),
        })
    }

    fn votes_required(&self, workload: &Workload) -> u32 {
        let Some(value) = workload.annotations.get(annotations::MINIMUM_APPROVALS) else {
            return 0;
        };
        value.trim().parse().unwrap_or_else(|e| {
            warn!(workload = %workload.id(), %value, error = %e, "invalid approvals annotation, ignoring");
            0
        })
    }

    fn deadline(&self, workload: &Workload) -> Duration {
        let Some(value) = workload.annotations.get(annotations::APPROVAL_DEADLINE) else {
            return self.default_deadline;
        };
        match value.trim().parse::<u64>().ok().and_then(|hours| hours.checked_mul(3600)) {
            Some(secs) => Duration::from_secs(secs),
            None => {
                warn!(workload = %workload.id(), %value, "invalid approval deadline annotation, using default");
                self.default_deadline
            }
        }
    }

    /// Every image the gate currently watches, folded per base image.
    pub fn tracked_images(&self) -> GateResult<Vec<TrackedImage>> {
        let mut tracked = Vec::new();
        for workload in self.workloads.list()? {
            let policy = policy_from_labels(&workload.labels, &workload.annotations);
            if matches!(policy, UpdatePolicy::Never) {
                continue;
            }
            let trigger = workload
                .annotations
                .get(annotations::TRIGGER)
                .map(|t| TriggerType::parse(t))
                .unwrap_or_default();
            let poll_schedule = workload.annotations.get(annotations::POLL_SCHEDULE).cloned();

            for image in &workload.images {
                let mut entry = observe(image.clone(), self.provider.as_str(), &workload.namespace);
                entry.trigger = trigger;
                entry.poll_schedule = poll_schedule.clone();
                entry.meta.insert("workload".to_string(), workload.id());
                tracked = merge(tracked, entry);
            }
        }
        Ok(tracked)
    }

    /// Re-run the gate for every event that comes back from an approval,
    /// until the channel closes or `shutdown` flips.
    pub async fn run_resubmissions(
        &self,
        mut events: mpsc::Receiver<Event>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("resubmission loop starting");

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("resubmission channel closed");
                        break;
                    };
                    let repository = event.repository.to_string();
                    match self.submit(event) {
                        Ok(report) => info!(%repository, updated = report.updated(), "resubmitted event processed"),
                        Err(e) => error!(%repository, error = %e, "failed to process resubmitted event"),
                    }
                }
                _ = shutdown.changed() => {
                    debug!("resubmission loop shutting down");
                    break;
                }
            }
        }
    }
}
