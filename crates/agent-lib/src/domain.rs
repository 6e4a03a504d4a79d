//! Domain manager: which NUMA nodes are earmarked for exclusive workloads
//!
//! The preemption set is written by the admission path and read by the
//! planning loop through [`DomainManager::snapshot`].

use crate::config::MbConstants;
use crate::error::{MbError, Result};
use crate::topology::{DomainId, NodeId, Topology};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Point-in-time copy of the preempted node set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreemptionSnapshot {
    pub nodes: BTreeSet<NodeId>,
}

impl PreemptionSnapshot {
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Budget of one sharing domain after preemption carve-outs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainBudget {
    pub domain: DomainId,
    pub total_mb: u64,
    pub preempted_nodes: BTreeSet<NodeId>,
    /// Budget left for the policy engine
    pub plannable_mb: u64,
}

/// Authoritative preemption state of the machine's NUMA nodes
pub struct DomainManager {
    topology: Arc<Topology>,
    constants: MbConstants,
    preempted: RwLock<BTreeSet<NodeId>>,
}

impl DomainManager {
    pub fn new(topology: Arc<Topology>, constants: MbConstants) -> Self {
        Self {
            topology,
            constants,
            preempted: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn constants(&self) -> &MbConstants {
        &self.constants
    }

    /// Mark nodes as preempted and return the ones that were not already
    ///
    /// All nodes are checked against the topology before any is marked, so
    /// an unknown node leaves the set untouched.
    pub fn preempt_nodes(&self, nodes: &[NodeId]) -> Result<Vec<NodeId>> {
        if let Some(&unknown) = nodes.iter().find(|n| !self.topology.has_node(**n)) {
            return Err(MbError::UnknownNode(unknown));
        }

        let mut preempted = self
            .preempted
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut added: Vec<NodeId> = nodes
            .iter()
            .copied()
            .filter(|node| preempted.insert(*node))
            .collect();
        added.sort_unstable();

        if added.is_empty() {
            debug!(nodes = ?nodes, "Nodes already preempted");
        } else {
            info!(nodes = ?added, total = preempted.len(), "Preempted numa nodes");
        }
        Ok(added)
    }

    pub fn is_preempted(&self, node: NodeId) -> bool {
        self.preempted
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&node)
    }

    /// Consistent copy of the preempted set for one planning cycle
    pub fn snapshot(&self) -> PreemptionSnapshot {
        let nodes = self
            .preempted
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        PreemptionSnapshot { nodes }
    }

    /// Budget of a domain given a preemption snapshot
    ///
    /// Each preempted node in the domain takes the lounge zone out of the
    /// shared budget. The result never drops below one node's reservation,
    /// and never exceeds the domain total.
    pub fn budget(&self, domain: DomainId, snapshot: &PreemptionSnapshot) -> Option<DomainBudget> {
        let domain = self.topology.domain(domain)?;
        let preempted_nodes: BTreeSet<NodeId> = domain
            .nodes
            .iter()
            .copied()
            .filter(|node| snapshot.contains(*node))
            .collect();

        let carve_out = self.constants.lounge_mb * preempted_nodes.len() as u64;
        let plannable_mb = domain
            .total_budget_mb
            .saturating_sub(carve_out)
            .max(self.constants.reserved_per_numa_mb.min(domain.total_budget_mb));

        Some(DomainBudget {
            domain: domain.id,
            total_mb: domain.total_budget_mb,
            preempted_nodes,
            plannable_mb,
        })
    }

    /// Budgets of every domain from one snapshot
    pub fn budgets(&self, snapshot: &PreemptionSnapshot) -> Vec<DomainBudget> {
        self.topology
            .domains()
            .filter_map(|d| self.budget(d.id, snapshot))
            .collect()
    }
}
