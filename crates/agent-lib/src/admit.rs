//! Pod admission binding
//!
//! Admitting an exclusive (`dedicated_cores`) workload with a NUMA hint
//! earmarks the hinted nodes and asks the controller to re-plan early.
//! Every other admission leaves the domain manager alone.

use crate::controller::ControllerHandle;
use crate::domain::DomainManager;
use crate::error::{MbError, Result};
use crate::observability::StructuredLogger;
use crate::task::{QosLevel, Task, TaskManager};
use crate::topology::NodeId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_QOS_LEVEL: &str = "shared_cores";

/// Role of the container being admitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    #[default]
    Main,
    /// Admitted after the main container; never changes bandwidth state
    Sidecar,
    Init,
}

/// Allocation request forwarded by the node's resource manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionRequest {
    pub pod_uid: String,
    #[serde(default)]
    pub pod_namespace: String,
    #[serde(default)]
    pub pod_name: String,
    #[serde(default)]
    pub container_type: ContainerType,
    /// QoS level annotation; `shared_cores` when absent
    #[serde(default)]
    pub qos_level: Option<String>,
    /// NUMA affinity hint; `None` when the pod carries no hint at all
    #[serde(default)]
    pub hint: Option<Vec<NodeId>>,
}

/// What an admission did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdmissionOutcome {
    /// Sidecar containers are ignored
    Skipped,
    /// Admitted without touching bandwidth state
    Admitted,
    /// Hinted nodes were considered for preemption and a re-plan requested
    Preempted {
        newly_preempted: Vec<NodeId>,
        adjust_queued: bool,
    },
}

/// Binds pod admissions to the domain manager and controller
pub struct Admitter {
    domains: Arc<DomainManager>,
    tasks: Arc<TaskManager>,
    controller: ControllerHandle,
    logger: StructuredLogger,
}

impl Admitter {
    pub fn new(
        domains: Arc<DomainManager>,
        tasks: Arc<TaskManager>,
        controller: ControllerHandle,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            domains,
            tasks,
            controller,
            logger,
        }
    }

    pub fn admit(&self, req: &AdmissionRequest) -> Result<AdmissionOutcome> {
        let qos_level = req.qos_level.as_deref().unwrap_or(DEFAULT_QOS_LEVEL);
        let level: QosLevel = qos_level.parse()?;

        if req.container_type == ContainerType::Sidecar {
            debug!(
                pod_uid = %req.pod_uid,
                namespace = %req.pod_namespace,
                pod_name = %req.pod_name,
                "Sidecar container admitted after main container"
            );
            return Ok(AdmissionOutcome::Skipped);
        }

        let outcome = match (level, req.hint.as_deref()) {
            (QosLevel::DedicatedCores, Some([])) => return Err(MbError::EmptyHint),
            (QosLevel::DedicatedCores, Some(hint)) => self.preempt_hinted(req, hint)?,
            _ => AdmissionOutcome::Admitted,
        };

        self.logger.log_pod_admitted(
            &req.pod_uid,
            &req.pod_namespace,
            &req.pod_name,
            qos_level,
            req.hint.as_deref(),
        );
        Ok(outcome)
    }

    /// Preempt hinted nodes no registered task uses yet, then re-plan
    fn preempt_hinted(&self, req: &AdmissionRequest, hint: &[NodeId]) -> Result<AdmissionOutcome> {
        let in_use = self.tasks.numa_nodes_in_use();
        let candidates: Vec<NodeId> = hint
            .iter()
            .copied()
            .filter(|node| !in_use.contains(node))
            .collect();

        let newly_preempted = self.domains.preempt_nodes(&candidates)?;
        if !newly_preempted.is_empty() {
            self.logger.log_nodes_preempted(&req.pod_uid, &newly_preempted);
        }
        debug!(
            pod_uid = %req.pod_uid,
            namespace = %req.pod_namespace,
            pod_name = %req.pod_name,
            "Identified socket pod"
        );

        let adjust_queued = self.controller.req_to_adjust_mb();
        Ok(AdmissionOutcome::Preempted {
            newly_preempted,
            adjust_queued,
        })
    }

    /// Record a pod's CPU binding so its nodes count as in use
    pub fn register_task(&self, task: Task) {
        self.tasks.upsert(task);
    }

    /// Forget a removed pod
    pub fn remove_pod(&self, pod_uid: &str) -> Option<Task> {
        self.tasks.remove(pod_uid)
    }
}
