//! Workloads and the client that patches them.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tagward_core::ImageRef;
use tagward_core::annotations;
use tagward_core::config::WorkloadConfig;
use tracing::info;

use crate::error::{GateError, GateResult};

/// A deployable unit running one or more container images.
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    /// Container images, in container order.
    pub images: Vec<ImageRef>,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
}

impl Workload {
    /// `{namespace}/{name}`.
    pub fn id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Time of the last applied update, if the workload records one.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.annotations
            .get(annotations::UPDATE_TIME)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

impl TryFrom<&WorkloadConfig> for Workload {
    type Error = GateError;

    fn try_from(config: &WorkloadConfig) -> GateResult<Self> {
        let images = config
            .images
            .iter()
            .map(|image| ImageRef::parse(image))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            namespace: config.namespace.clone(),
            name: config.name.clone(),
            images,
            labels: config.labels.clone(),
            annotations: config.annotations.clone(),
        })
    }
}

/// Reads and mutates workloads on behalf of the gate.
pub trait WorkloadClient: Send + Sync {
    fn list(&self) -> GateResult<Vec<Workload>>;

    /// Point container `container` of `workload_id` at `image` and record
    /// `updated_at` as the workload's last update time.
    fn update_image(
        &self,
        workload_id: &str,
        container: usize,
        image: &ImageRef,
        updated_at: DateTime<Utc>,
    ) -> GateResult<()>;
}

/// One applied image change.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub workload: String,
    pub container: usize,
    pub from: ImageRef,
    pub to: ImageRef,
    pub at: DateTime<Utc>,
}

/// Workload inventory held in memory, seeded from configuration.
#[derive(Default)]
pub struct InMemoryWorkloads {
    workloads: RwLock<Vec<Workload>>,
    patches: RwLock<Vec<Patch>>,
}

impl InMemoryWorkloads {
    pub fn new(workloads: Vec<Workload>) -> Self {
        Self {
            workloads: RwLock::new(workloads),
            patches: RwLock::new(Vec::new()),
        }
    }

    pub fn from_config(configs: &[WorkloadConfig]) -> GateResult<Self> {
        let workloads = configs
            .iter()
            .map(Workload::try_from)
            .collect::<GateResult<Vec<_>>>()?;
        Ok(Self::new(workloads))
    }

    pub fn get(&self, workload_id: &str) -> Option<Workload> {
        let workloads = self.workloads.read().unwrap_or_else(PoisonError::into_inner);
        workloads.iter().find(|w| w.id() == workload_id).cloned()
    }

    /// Every patch applied so far, oldest first.
    pub fn patches(&self) -> Vec<Patch> {
        self.patches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl WorkloadClient for InMemoryWorkloads {
    fn list(&self) -> GateResult<Vec<Workload>> {
        Ok(self
            .workloads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn update_image(
        &self,
        workload_id: &str,
        container: usize,
        image: &ImageRef,
        updated_at: DateTime<Utc>,
    ) -> GateResult<()> {
        let mut workloads = self.workloads.write().unwrap_or_else(PoisonError::into_inner);
        let workload = workloads
            .iter_mut()
            .find(|w| w.id() == workload_id)
            .ok_or_else(|| GateError::WorkloadNotFound(workload_id.to_string()))?;
        let slot = workload
            .images
            .get_mut(container)
            .ok_or_else(|| GateError::ContainerNotFound {
                workload: workload_id.to_string(),
                container,
            })?;

        let from = std::mem::replace(slot, image.clone());
        workload
            .annotations
            .insert(annotations::UPDATE_TIME.to_string(), updated_at.to_rfc3339());
        info!(workload = %workload_id, container, %from, to = %image, "workload image updated");

        self.patches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Patch {
                workload: workload_id.to_string(),
                container,
                from,
                to: image.clone(),
                at: updated_at,
            });
        Ok(())
    }
}
