//! QoS groups, pod tasks and their resctrl bindings
//!
//! A QoS group is the unit of bandwidth allocation. Its legacy string form
//! (`system`, `dedicated`, `shared_30`) is what other components use as map
//! keys; the resctrl control group folder uses `shared-30` for shared pools.

use crate::error::{MbError, Result};
use crate::topology::{CcdId, CpuId, NodeId, Topology};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Default mount point of the resctrl filesystem
pub const RESCTRL_ROOT: &str = "/sys/fs/resctrl";

/// Folder holding per-pod monitoring groups inside a control group
pub const MON_GROUPS_FOLDER: &str = "mon_groups";

const SHARED_KEY_PREFIX: &str = "shared_";
const SHARED_FOLDER_PREFIX: &str = "shared-";
const POD_PREFIX: &str = "pod";

/// Priority tier of workloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum QosGroup {
    System,
    Dedicated,
    /// Shared pool; a larger weight means higher priority
    Shared(u32),
}

impl QosGroup {
    fn rank(&self) -> (u8, u32) {
        match self {
            QosGroup::Shared(weight) => (0, *weight),
            QosGroup::Dedicated => (1, 0),
            QosGroup::System => (2, 0),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, QosGroup::Shared(_))
    }

    pub fn shared_weight(&self) -> Option<u32> {
        match self {
            QosGroup::Shared(weight) => Some(*weight),
            _ => None,
        }
    }

    /// Name of the resctrl control group folder
    pub fn ctrl_group_folder_name(&self) -> String {
        match self {
            QosGroup::System => "system".to_string(),
            QosGroup::Dedicated => "dedicated".to_string(),
            QosGroup::Shared(weight) => format!("{}{:02}", SHARED_FOLDER_PREFIX, weight),
        }
    }

    /// Path of the resctrl control group under `root`
    pub fn ctrl_group_path(&self, root: &Path) -> PathBuf {
        root.join(self.ctrl_group_folder_name())
    }
}

impl Ord for QosGroup {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for QosGroup {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for QosGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QosGroup::System => write!(f, "system"),
            QosGroup::Dedicated => write!(f, "dedicated"),
            QosGroup::Shared(weight) => write!(f, "{}{}", SHARED_KEY_PREFIX, weight),
        }
    }
}

impl FromStr for QosGroup {
    type Err = MbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(QosGroup::System),
            "dedicated" => Ok(QosGroup::Dedicated),
            _ => s
                .strip_prefix(SHARED_KEY_PREFIX)
                .or_else(|| s.strip_prefix(SHARED_FOLDER_PREFIX))
                .and_then(|weight| weight.parse::<u32>().ok())
                .map(QosGroup::Shared)
                .ok_or_else(|| MbError::UnknownQosGroup(s.to_string())),
        }
    }
}

impl TryFrom<String> for QosGroup {
    type Error = MbError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<QosGroup> for String {
    fn from(group: QosGroup) -> Self {
        group.to_string()
    }
}

/// Resolve a QoS group name to its resctrl control group folder
pub fn ctrl_group_folder(root: &Path, name: &str) -> Result<PathBuf> {
    let group: QosGroup = name.parse()?;
    Ok(group.ctrl_group_path(root))
}

/// Pod QoS level as carried by admission requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    SystemCores,
    DedicatedCores,
    SharedCores,
    ReclaimedCores,
}

impl FromStr for QosLevel {
    type Err = MbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system_cores" => Ok(QosLevel::SystemCores),
            "dedicated_cores" => Ok(QosLevel::DedicatedCores),
            "shared_cores" => Ok(QosLevel::SharedCores),
            "reclaimed_cores" => Ok(QosLevel::ReclaimedCores),
            _ => Err(MbError::UnknownQosLevel(s.to_string())),
        }
    }
}

/// A pod's resource-control binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub qos_group: QosGroup,
    /// Pod uid, optionally already carrying the `pod` prefix
    pub pod_uid: String,
    pub cpus: Vec<CpuId>,
}

impl Task {
    pub fn new(qos_group: QosGroup, pod_uid: impl Into<String>, cpus: Vec<CpuId>) -> Self {
        Self {
            qos_group,
            pod_uid: pod_uid.into(),
            cpus,
        }
    }

    pub fn id(&self) -> &str {
        &self.pod_uid
    }

    /// CCDs covered by the task's CPUs, ascending and deduplicated
    ///
    /// CPUs unknown to the topology are skipped.
    pub fn ccds(&self, topology: &Topology) -> Vec<CcdId> {
        let ccds: BTreeSet<CcdId> = self
            .cpus
            .iter()
            .filter_map(|cpu| {
                let ccd = topology.ccd_of_cpu(*cpu);
                if ccd.is_none() {
                    debug!(pod_uid = %self.pod_uid, cpu = cpu, "Cpu not mapped to any ccd");
                }
                ccd
            })
            .collect();
        ccds.into_iter().collect()
    }

    /// NUMA nodes covered by the task's CPUs, ascending
    pub fn numa_nodes(&self, topology: &Topology) -> Vec<NodeId> {
        let nodes: BTreeSet<NodeId> = self
            .ccds(topology)
            .into_iter()
            .filter_map(|ccd| topology.node_of_ccd(ccd))
            .collect();
        nodes.into_iter().collect()
    }

    /// Resctrl control group of the task
    pub fn resctrl_ctrl_group(&self, root: &Path) -> PathBuf {
        self.qos_group.ctrl_group_path(root)
    }

    /// Resctrl monitoring group of the task
    pub fn resctrl_mon_group(&self, root: &Path) -> PathBuf {
        self.resctrl_ctrl_group(root)
            .join(MON_GROUPS_FOLDER)
            .join(self.task_folder())
    }

    fn task_folder(&self) -> String {
        if self.pod_uid.starts_with(POD_PREFIX) {
            self.pod_uid.clone()
        } else {
            format!("{}{}", POD_PREFIX, self.pod_uid)
        }
    }
}

/// Registry of admitted tasks keyed by pod uid
pub struct TaskManager {
    tasks: DashMap<String, Task>,
    topology: Arc<Topology>,
}

impl TaskManager {
    pub fn new(topology: Arc<Topology>) -> Self {
        Self {
            tasks: DashMap::new(),
            topology,
        }
    }

    /// Register a task or replace its CPU assignment
    pub fn upsert(&self, task: Task) {
        debug!(pod_uid = %task.pod_uid, qos_group = %task.qos_group, "Registering task");
        self.tasks.insert(task.pod_uid.clone(), task);
    }

    pub fn remove(&self, pod_uid: &str) -> Option<Task> {
        debug!(pod_uid = %pod_uid, "Removing task");
        self.tasks.remove(pod_uid).map(|(_, task)| task)
    }

    pub fn get(&self, pod_uid: &str) -> Option<Task> {
        self.tasks.get(pod_uid).map(|r| r.clone())
    }

    pub fn list(&self) -> Vec<Task> {
        self.tasks.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// NUMA nodes occupied by any registered task
    pub fn numa_nodes_in_use(&self) -> BTreeSet<NodeId> {
        self.tasks
            .iter()
            .flat_map(|r| r.value().numa_nodes(&self.topology))
            .collect()
    }
}
