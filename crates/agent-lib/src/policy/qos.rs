//! Priority-tiered policy with contention detection
//!
//! Every group gets a guaranteed floor on each CCD it occupies, whatever
//! its measured demand. The lowest shared pool (the lounge tier) is cut
//! back to a reduced ceiling while a higher-weighted shared pool is active
//! in the same domain.

use super::{MbPolicy, Plan};
use crate::config::MbConstants;
use crate::monitor::GroupSnapshot;
use crate::task::QosGroup;
use tracing::debug;

/// Policy that degrades the lounge tier once higher shared demand shows up
#[derive(Debug, Clone)]
pub struct HiPrioDetectedPolicy {
    floor_mb: u64,
    lounge_contended_mb: u64,
    max_mb_per_ccd: u64,
}

impl HiPrioDetectedPolicy {
    pub fn new(constants: &MbConstants) -> Self {
        Self {
            floor_mb: constants.reserved_per_numa_mb,
            lounge_contended_mb: constants.lounge_contended_mb,
            max_mb_per_ccd: constants.max_mb_per_ccd,
        }
    }

    /// The shared pool to degrade, if a higher shared pool is present
    fn contended_lounge(groups: &GroupSnapshot) -> Option<QosGroup> {
        let mut shared = groups
            .iter()
            .filter(|(_, usage)| !usage.ccd_mb.is_empty())
            .filter_map(|(group, _)| group.shared_weight().map(|w| (w, *group)));

        let (lowest_weight, lounge) = shared.next()?;
        // Keys are ordered by weight, so any further entry is a higher pool
        shared
            .any(|(weight, _)| weight > lowest_weight)
            .then_some(lounge)
    }
}

impl MbPolicy for HiPrioDetectedPolicy {
    fn get_plan(&self, total_mb: u64, groups: &GroupSnapshot, is_top_most: bool) -> Plan {
        let cap = total_mb.min(self.max_mb_per_ccd);
        let floor = self.floor_mb.min(cap);
        let lounge = if is_top_most {
            Self::contended_lounge(groups)
        } else {
            None
        };

        let mut plan = Plan::new();
        for (group, usage) in groups {
            let ceiling = if Some(*group) == lounge {
                self.lounge_contended_mb.min(cap)
            } else {
                floor
            };
            for ccd in usage.ccds() {
                plan.set(*group, ccd, ceiling);
            }
        }

        if let Some(lounge) = lounge {
            debug!(
                lounge = %lounge,
                ceiling_mb = self.lounge_contended_mb.min(cap),
                "Higher priority shared pool detected, limiting lounge tier"
            );
        }
        plan
    }
}
