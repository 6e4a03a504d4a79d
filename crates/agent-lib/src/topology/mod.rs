//! Machine topology: NUMA nodes, CCDs and memory bandwidth sharing domains
//!
//! The topology is built once at startup (usually from sysfs, see
//! [`discover_topology`]) and shared read-only afterwards.

mod platform;
mod sysfs;


pub use platform::{max_bandwidth_per_ccd, Platform, DEFAULT_MAX_BANDWIDTH_BYTES};
pub use sysfs::{
    cpu_in_list, discover_topology, numa_id_by_l3_cache_id, parse_cpu_list,
    DEFAULT_SYSFS_CPU_DIR, DEFAULT_SYSFS_NODE_DIR,
};

use crate::error::{MbError, Result};
use crate::monitor::GroupSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// CCD id; equals the L3 cache id reported by the kernel
pub type CcdId = u32;
/// NUMA node id
pub type NodeId = u32;
/// Logical CPU id
pub type CpuId = u32;
/// Memory bandwidth sharing domain id
pub type DomainId = u32;

/// A group of CCDs sharing one fixed memory bandwidth budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MbSharingDomain {
    pub id: DomainId,
    pub total_budget_mb: u64,
    pub nodes: BTreeSet<NodeId>,
    pub ccds: BTreeSet<CcdId>,
}

/// A cache/memory-controller affinity domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ccd {
    pub id: CcdId,
    pub node: NodeId,
    pub domain: DomainId,
}

/// Immutable machine topology
#[derive(Debug, Clone)]
pub struct Topology {
    domains: BTreeMap<DomainId, MbSharingDomain>,
    ccds: BTreeMap<CcdId, Ccd>,
    cpu_ccd: BTreeMap<CpuId, CcdId>,
    node_ccds: BTreeMap<NodeId, BTreeSet<CcdId>>,
}

impl Topology {
    /// Start describing a topology
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::new()
    }

    pub fn domains(&self) -> impl Iterator<Item = &MbSharingDomain> {
        self.domains.values()
    }

    pub fn domain(&self, id: DomainId) -> Option<&MbSharingDomain> {
        self.domains.get(&id)
    }

    pub fn ccds(&self) -> impl Iterator<Item = &Ccd> {
        self.ccds.values()
    }

    pub fn ccd(&self, id: CcdId) -> Option<&Ccd> {
        self.ccds.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.node_ccds.keys().copied()
    }

    pub fn has_node(&self, node: NodeId) -> bool {
        self.node_ccds.contains_key(&node)
    }

    pub fn node_of_ccd(&self, ccd: CcdId) -> Option<NodeId> {
        self.ccds.get(&ccd).map(|c| c.node)
    }

    pub fn domain_of_ccd(&self, ccd: CcdId) -> Option<DomainId> {
        self.ccds.get(&ccd).map(|c| c.domain)
    }

    /// Domain owning the given node, if any
    pub fn domain_of_node(&self, node: NodeId) -> Option<DomainId> {
        self.domains
            .values()
            .find(|d| d.nodes.contains(&node))
            .map(|d| d.id)
    }

    pub fn ccds_of_node(&self, node: NodeId) -> Option<&BTreeSet<CcdId>> {
        self.node_ccds.get(&node)
    }

    pub fn ccd_of_cpu(&self, cpu: CpuId) -> Option<CcdId> {
        self.cpu_ccd.get(&cpu).copied()
    }

    /// Reject a usage snapshot that references CCDs outside this machine
    pub fn validate_groups(&self, groups: &GroupSnapshot) -> Result<()> {
        for (group, usage) in groups {
            for ccd in usage.ccds() {
                if !self.ccds.contains_key(&ccd) {
                    return Err(MbError::UnknownCcd {
                        group: group.to_string(),
                        ccd,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Incrementally describes a topology and validates it on [`build`](Self::build)
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    ccd_nodes: BTreeMap<CcdId, NodeId>,
    ccd_cpus: BTreeMap<CcdId, Vec<CpuId>>,
    node_domains: BTreeMap<NodeId, DomainId>,
    domain_budget_mb: Option<u64>,
    errors: Vec<String>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a CCD, the node it belongs to and its CPUs
    pub fn add_ccd(mut self, ccd: CcdId, node: NodeId, cpus: impl IntoIterator<Item = CpuId>) -> Self {
        if self.ccd_nodes.insert(ccd, node).is_some() {
            self.errors.push(format!("ccd {} registered twice", ccd));
        }
        self.ccd_cpus.entry(ccd).or_default().extend(cpus);
        self
    }

    /// Place a node into a sharing domain
    pub fn assign_node(mut self, node: NodeId, domain: DomainId) -> Self {
        if let Some(previous) = self.node_domains.insert(node, domain) {
            if previous != domain {
                self.errors.push(format!(
                    "node {} assigned to domains {} and {}",
                    node, previous, domain
                ));
            }
        }
        self
    }

    /// Budget shared by the CCDs of each domain
    pub fn domain_budget(mut self, mb: u64) -> Self {
        self.domain_budget_mb = Some(mb);
        self
    }

    pub fn build(self) -> Result<Topology> {
        if let Some(first) = self.errors.into_iter().next() {
            return Err(MbError::InvalidTopology(first));
        }

        let budget = self
            .domain_budget_mb
            .unwrap_or(crate::config::DEFAULT_DOMAIN_TOTAL_MB);
        if budget == 0 {
            return Err(MbError::InvalidTopology(
                "domain budget must be greater than zero".to_string(),
            ));
        }

        let mut domains: BTreeMap<DomainId, MbSharingDomain> = BTreeMap::new();
        let mut ccds = BTreeMap::new();
        let mut node_ccds: BTreeMap<NodeId, BTreeSet<CcdId>> = BTreeMap::new();

        for (&ccd, &node) in &self.ccd_nodes {
            let domain_id = *self.node_domains.get(&node).ok_or_else(|| {
                MbError::InvalidTopology(format!("node {} has no sharing domain", node))
            })?;

            let domain = domains.entry(domain_id).or_insert_with(|| MbSharingDomain {
                id: domain_id,
                total_budget_mb: budget,
                nodes: BTreeSet::new(),
                ccds: BTreeSet::new(),
            });
            domain.nodes.insert(node);
            domain.ccds.insert(ccd);

            ccds.insert(
                ccd,
                Ccd {
                    id: ccd,
                    node,
                    domain: domain_id,
                },
            );
            node_ccds.entry(node).or_default().insert(ccd);
        }

        let mut cpu_ccd = BTreeMap::new();
        for (ccd, cpus) in self.ccd_cpus {
            for cpu in cpus {
                if let Some(other) = cpu_ccd.insert(cpu, ccd) {
                    if other != ccd {
                        return Err(MbError::InvalidTopology(format!(
                            "cpu {} claimed by ccds {} and {}",
                            cpu, other, ccd
                        )));
                    }
                }
            }
        }

        Ok(Topology {
            domains,
            ccds,
            cpu_ccd,
            node_ccds,
        })
    }
}
