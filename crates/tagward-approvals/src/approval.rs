//! The approval record and its external view.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tagward_core::{Event, ProviderType};

/// Derived approval status. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        })
    }
}

/// A persisted voting record, unique per `(provider, identifier)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub provider: ProviderType,
    /// `{namespace}/{workload}:{new_tag}` for workload updates.
    pub identifier: String,
    /// Snapshot of the event that proposed the update; resubmitted on quorum.
    pub event: Event,
    #[serde(default)]
    pub message: String,
    pub current_version: String,
    pub new_version: String,
    #[serde(default)]
    pub digest: Option<String>,
    pub votes_required: u32,
    #[serde(default)]
    pub votes_received: u32,
    /// Voter id → time of the vote.
    #[serde(default)]
    pub voters: BTreeMap<String, DateTime<Utc>>,
    /// Sticky: never cleared once set.
    #[serde(default)]
    pub rejected: bool,
    #[serde(default)]
    pub archived: bool,
    /// How long the record lives after creation.
    pub deadline: Duration,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Approval {
    pub fn new(provider: ProviderType, identifier: impl Into<String>, event: Event) -> Self {
        let now = Utc::now();
        Self {
            provider,
            identifier: identifier.into(),
            event,
            message: String::new(),
            current_version: String::new(),
            new_version: String::new(),
            digest: None,
            votes_required: 1,
            votes_received: 0,
            voters: BTreeMap::new(),
            rejected: false,
            archived: false,
            deadline: Duration::from_secs(24 * 3600),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_versions(mut self, current: impl Into<String>, new: impl Into<String>) -> Self {
        self.current_version = current.into();
        self.new_version = new.into();
        self
    }

    pub fn with_votes_required(mut self, votes: u32) -> Self {
        self.votes_required = votes;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn status(&self) -> ApprovalStatus {
        if self.rejected {
            ApprovalStatus::Rejected
        } else if self.votes_received >= self.votes_required {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Pending
        }
    }

    /// Human-readable change, e.g. `1.0.0 -> 1.1.0`.
    pub fn delta(&self) -> String {
        format!("{} -> {}", self.current_version, self.new_version)
    }

    /// Time left before the deadline passes, zero once it has.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        let elapsed = (now - self.created_at).to_std().unwrap_or(Duration::ZERO);
        self.deadline.saturating_sub(elapsed)
    }

    /// True once the record has outlived its deadline.
    pub fn expired_at(&self, now: DateTime<Utc>) -> bool {
        match TimeDelta::from_std(self.deadline) {
            Ok(deadline) => now - self.created_at > deadline,
            Err(_) => false,
        }
    }
}

/// External representation of an approval, as served by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalView {
    pub identifier: String,
    pub provider: ProviderType,
    pub current_version: String,
    pub new_version: String,
    pub message: String,
    pub votes_required: u32,
    pub votes_received: u32,
    pub voters: Vec<String>,
    pub rejected: bool,
    pub status: ApprovalStatus,
    pub delta: String,
    pub deadline_secs: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Approval> for ApprovalView {
    fn from(a: &Approval) -> Self {
        Self {
            identifier: a.identifier.clone(),
            provider: a.provider,
            current_version: a.current_version.clone(),
            new_version: a.new_version.clone(),
            message: a.message.clone(),
            votes_required: a.votes_required,
            votes_received: a.votes_received,
            voters: a.voters.keys().cloned().collect(),
            rejected: a.rejected,
            status: a.status(),
            delta: a.delta(),
            deadline_secs: a.deadline.as_secs(),
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}
