//! Error types for the bandwidth allocator core
//!
//! Counter anomalies (overflow, resets, clock skew) are recovered inside the
//! monitor and never show up here. These variants cover precondition
//! violations and missing topology data that the caller must see.

use crate::topology::{CcdId, NodeId};
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the core components
#[derive(Debug, Error)]
pub enum MbError {
    /// A cpulist string (e.g. "0-3,8") could not be parsed
    #[error("invalid cpu list {0:?}")]
    InvalidCpuList(String),

    /// No NUMA node claims a CPU sharing the given L3 cache id
    #[error("no numa node found for l3 cache id {0}")]
    NumaNotFound(u32),

    /// A QoS group name does not map to a known control group folder
    #[error("unknown qos group {0:?}")]
    UnknownQosGroup(String),

    /// A pod QoS level string is not one of the supported levels
    #[error("unknown qos level {0:?}")]
    UnknownQosLevel(String),

    /// A dedicated workload was admitted with an empty NUMA hint
    #[error("hint is empty")]
    EmptyHint,

    /// A NUMA node id is not part of the machine topology
    #[error("numa node {0} is not part of the topology")]
    UnknownNode(NodeId),

    /// A usage snapshot references a CCD the topology does not know
    #[error("qos group {group} reports ccd {ccd} which is not part of the topology")]
    UnknownCcd { group: String, ccd: CcdId },

    /// The topology description is inconsistent
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// A configuration constant is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading a sysfs or resctrl file failed
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MbError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, MbError>;
