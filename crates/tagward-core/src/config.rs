//! tagward.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::annotations::APPROVAL_DEADLINE_DEFAULT_HOURS;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub approvals: ApprovalsConfig,
    #[serde(default)]
    pub workloads: Vec<WorkloadConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Keep approvals in memory only (lost on restart).
    #[serde(default)]
    pub in_memory: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            in_memory: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalsConfig {
    /// Seconds between expiry sweeps.
    #[serde(default = "default_expiry_interval")]
    pub expiry_interval_secs: u64,
    /// Deadline for workloads that don't set `tagward.io/approvalDeadline`.
    #[serde(default = "default_deadline_hours")]
    pub default_deadline_hours: u64,
}

impl ApprovalsConfig {
    /// `default_deadline_hours` as a duration, `None` if it overflows.
    pub fn default_deadline(&self) -> Option<Duration> {
        self.default_deadline_hours
            .checked_mul(3600)
            .map(Duration::from_secs)
    }
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self {
            expiry_interval_secs: default_expiry_interval(),
            default_deadline_hours: default_deadline_hours(),
        }
    }
}

/// A statically configured workload for the in-memory workload client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub namespace: String,
    pub name: String,
    /// Container images, in container order.
    pub images: Vec<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/tagward")
}

fn default_expiry_interval() -> u64 {
    3600
}

fn default_deadline_hours() -> u64 {
    APPROVAL_DEADLINE_DEFAULT_HOURS
}

impl GateConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GateConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Path of the redb database inside the data directory.
    pub fn db_path(&self) -> PathBuf {
        self.store.data_dir.join("tagward.redb")
    }
}
