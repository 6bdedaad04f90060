//! Trigger events, provider kinds, and tracked images.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::image::ImageRef;

// ── Events ─────────────────────────────────────────────────────────

/// The repository fields a trigger reports about a new image.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    pub name: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl Repository {
    /// Parse the repository into an image reference (`[host/]name[:tag]`).
    pub fn image(&self) -> Result<ImageRef, crate::image::ImageError> {
        ImageRef::parse(&self.to_string())
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.host.is_empty() {
            write!(f, "{}/", self.host)?;
        }
        f.write_str(&self.name)?;
        if !self.tag.is_empty() {
            write!(f, ":{}", self.tag)?;
        }
        Ok(())
    }
}

/// A trigger event: "a new tag exists for this repository".
///
/// Events own all their data, so a clone is an independent snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub repository: Repository,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Name of the trigger that produced the event (`poll`, `webhook`, ...).
    #[serde(default)]
    pub trigger_name: String,
}

impl Event {
    pub fn new(repository: Repository, trigger_name: &str) -> Self {
        Self {
            repository,
            created_at: Utc::now(),
            trigger_name: trigger_name.to_string(),
        }
    }
}

// ── Kinds ──────────────────────────────────────────────────────────

/// Which workload provider an approval or tracked image belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Kubernetes,
    Helm,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Kubernetes => "kubernetes",
            ProviderType::Helm => "helm",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kubernetes" | "k8s" => Ok(ProviderType::Kubernetes),
            "helm" => Ok(ProviderType::Helm),
            other => Err(format!("unknown provider type: {other}")),
        }
    }
}

/// How a workload learns about new tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Wait for external triggers (webhooks, pubsub).
    #[default]
    Default,
    /// Poll the registry.
    Poll,
    /// Re-entry of an event whose approval reached quorum.
    Approval,
}

impl TriggerType {
    pub fn parse(s: &str) -> Self {
        match s {
            "poll" => TriggerType::Poll,
            "approval" => TriggerType::Approval,
            _ => TriggerType::Default,
        }
    }
}

// ── Tracked images ─────────────────────────────────────────────────

/// One entry per distinct base image the gate watches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedImage {
    /// Most recent observation; the entry's current head.
    pub image: ImageRef,
    #[serde(default)]
    pub trigger: TriggerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_schedule: Option<String>,
    pub provider: String,
    pub namespace: String,
    /// Pre-release label → latest tag seen on that label.
    #[serde(default)]
    pub channel_tags: HashMap<String, String>,
    /// Every tag merged into this entry, oldest first.
    /// `None` marks a non-semver placeholder that is never a merge target.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Provider-supplied metadata; replaced wholesale on merge.
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl TrackedImage {
    pub fn is_semver_tracked(&self) -> bool {
        self.tags.is_some()
    }

    /// Latest tag seen on a channel, if any.
    pub fn channel_tag(&self, channel: &str) -> Option<&str> {
        self.channel_tags.get(channel).map(String::as_str)
    }
}

impl fmt::Display for TrackedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "namespace:{},image:{},provider:{},trigger:{:?},channels:{:?},tags:{:?}",
            self.namespace, self.image, self.provider, self.trigger, self.channel_tags, self.tags
        )
    }
}
