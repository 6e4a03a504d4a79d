//! Policy engine: per-group, per-CCD bandwidth ceilings
//!
//! A policy is a pure function of one usage snapshot and a domain budget.
//! It performs no I/O, so it cannot fail for a snapshot that passed
//! topology validation.

mod qos;

pub use qos::HiPrioDetectedPolicy;

use crate::monitor::GroupSnapshot;
use crate::task::QosGroup;
use crate::topology::CcdId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bandwidth ceiling (MBps) per QoS group per CCD
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub plan: BTreeMap<QosGroup, BTreeMap<CcdId, u64>>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, group: QosGroup, ccd: CcdId, ceiling_mb: u64) {
        self.plan.entry(group).or_default().insert(ccd, ceiling_mb);
    }

    pub fn ceiling(&self, group: QosGroup, ccd: CcdId) -> Option<u64> {
        self.plan.get(&group)?.get(&ccd).copied()
    }

    /// Fold another plan into this one
    ///
    /// Plans of different sharing domains never overlap; if they do, the
    /// lower ceiling wins.
    pub fn merge(&mut self, other: Plan) {
        for (group, ccds) in other.plan {
            let entry = self.plan.entry(group).or_default();
            for (ccd, ceiling) in ccds {
                entry
                    .entry(ccd)
                    .and_modify(|current| *current = (*current).min(ceiling))
                    .or_insert(ceiling);
            }
        }
    }

    /// Number of (group, CCD) entries
    pub fn len(&self) -> usize {
        self.plan.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over (group, CCD, ceiling) in priority then CCD order
    pub fn entries(&self) -> impl Iterator<Item = (QosGroup, CcdId, u64)> + '_ {
        self.plan
            .iter()
            .flat_map(|(group, ccds)| ccds.iter().map(move |(ccd, mb)| (*group, *ccd, *mb)))
    }
}

/// Maps a usage snapshot to a ceiling plan
pub trait MbPolicy: Send + Sync {
    /// Compute ceilings for every (group, CCD) pair in `groups`
    ///
    /// `is_top_most` is true when evaluating a whole sharing domain rather
    /// than a nested scope inside it.
    fn get_plan(&self, total_mb: u64, groups: &GroupSnapshot, is_top_most: bool) -> Plan;
}
