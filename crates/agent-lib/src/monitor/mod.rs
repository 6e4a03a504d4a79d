//! Memory bandwidth monitor
//!
//! Turns cumulative per-group, per-CCD bandwidth counters into a validated
//! usage snapshot in MBps. The rolling counter state lives behind a single
//! lock so a snapshot is always built from one consistent set of readings.

mod rate;
mod resctrl;

#[cfg(test)]
mod tests;

pub use rate::{calc_bytes_per_sec, clamp_mbm_delta};
pub use resctrl::ResctrlCounterSource;

use crate::config::{BYTES_PER_GB, BYTES_PER_MB};
use crate::task::QosGroup;
use crate::topology::{max_bandwidth_per_ccd, CcdId, NodeId, Topology};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rate::{advance, CounterState, DeltaLimits};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Measured bandwidth of one QoS group, per CCD
///
/// The map is the only record of which CCDs the group occupies, so the CCD
/// set can never drift from the measurements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MbQosGroup {
    /// MBps per CCD
    pub ccd_mb: BTreeMap<CcdId, u64>,
}

impl MbQosGroup {
    pub fn new(ccd_mb: BTreeMap<CcdId, u64>) -> Self {
        Self { ccd_mb }
    }

    /// CCDs occupied by the group, ascending
    pub fn ccds(&self) -> impl Iterator<Item = CcdId> + '_ {
        self.ccd_mb.keys().copied()
    }

    pub fn total_mb(&self) -> u64 {
        self.ccd_mb.values().sum()
    }
}

/// Usage of every QoS group at one point in time
pub type GroupSnapshot = BTreeMap<QosGroup, MbQosGroup>;

/// Total MBps consumed by all groups
pub fn sum_mb(groups: &GroupSnapshot) -> u64 {
    groups.values().map(MbQosGroup::total_mb).sum()
}

/// Raw cumulative counters read at one instant
///
/// CCDs missing from a group's map are treated as "no data".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSample {
    pub timestamp: DateTime<Utc>,
    /// Cumulative bytes per group per CCD
    pub counters: HashMap<QosGroup, BTreeMap<CcdId, u64>>,
}

/// Snapshot produced by one monitor update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub timestamp: Option<DateTime<Utc>>,
    pub groups: GroupSnapshot,
}

/// Source of raw bandwidth counters
#[async_trait]
pub trait CounterSource: Send + Sync {
    /// Read the current cumulative counters
    async fn sample(&self) -> Result<CounterSample>;
}

/// Configuration for counter validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Advance treated as counter overflow (default: 4000 GB)
    #[serde(default = "default_max_mbm_diff_bytes")]
    pub max_mbm_diff_bytes: u64,
    /// Largest credible advance within one interval (default: 300 GB)
    #[serde(default = "default_max_mbm_step_bytes")]
    pub max_mbm_step_bytes: u64,
    /// Forget counters not sampled for this long (default: 5 minutes)
    #[serde(default = "default_stale_after", with = "duration_secs")]
    pub stale_after: Duration,
}

fn default_max_mbm_diff_bytes() -> u64 {
    4_000 * BYTES_PER_GB
}

fn default_max_mbm_step_bytes() -> u64 {
    300 * BYTES_PER_GB
}

fn default_stale_after() -> Duration {
    Duration::from_secs(5 * 60)
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_mbm_diff_bytes: default_max_mbm_diff_bytes(),
            max_mbm_step_bytes: default_max_mbm_step_bytes(),
            stale_after: default_stale_after(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    counters: HashMap<(QosGroup, CcdId), CounterState>,
    latest: UsageSnapshot,
}

/// Bandwidth monitor holding the rolling counter state
#[derive(Debug)]
pub struct Monitor {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MonitorState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fold a new sample into the rolling state and build a snapshot
    pub fn update(&self, sample: &CounterSample) -> UsageSnapshot {
        let limits = DeltaLimits {
            max_diff: self.config.max_mbm_diff_bytes,
            max_step: self.config.max_mbm_step_bytes,
        };

        let mut state = self.lock();
        let mut counters = state.counters.clone();
        let mut groups = GroupSnapshot::new();

        for (group, ccd_counters) in &sample.counters {
            for (&ccd, &counter) in ccd_counters {
                let key = (*group, ccd);
                let (next, rate) = advance(counters.get(&key), counter, sample.timestamp, limits);
                counters.insert(key, next);

                if let Some(bytes_per_sec) = rate {
                    groups
                        .entry(*group)
                        .or_default()
                        .ccd_mb
                        .insert(ccd, bytes_per_sec / BYTES_PER_MB);
                }
            }
        }

        let stale_after = self.config.stale_after;
        counters.retain(|(group, ccd), counter| {
            let stale = (sample.timestamp - counter.timestamp)
                .to_std()
                .map(|age| age > stale_after)
                .unwrap_or(false);
            if stale {
                debug!(qos_group = %group, ccd = ccd, "Dropping stale counter");
            }
            !stale
        });

        let snapshot = UsageSnapshot {
            timestamp: Some(sample.timestamp),
            groups,
        };
        state.counters = counters;
        state.latest = snapshot.clone();
        snapshot
    }

    /// Last snapshot built by [`update`](Self::update)
    pub fn latest(&self) -> UsageSnapshot {
        self.lock().latest.clone()
    }

    /// Number of (group, CCD) counters currently tracked
    pub fn tracked_counters(&self) -> usize {
        self.lock().counters.len()
    }
}

/// MBps per NUMA node; CCDs outside the topology are ignored
pub fn node_totals(groups: &GroupSnapshot, topology: &Topology) -> BTreeMap<NodeId, u64> {
    let mut totals = BTreeMap::new();
    for usage in groups.values() {
        for (&ccd, &mb) in &usage.ccd_mb {
            if let Some(node) = topology.node_of_ccd(ccd) {
                *totals.entry(node).or_insert(0) += mb;
            }
        }
    }
    totals
}

/// Fraction of each CCD's platform maximum currently in use
pub fn ccd_utilization(groups: &GroupSnapshot, cpu_code_name: &str) -> BTreeMap<CcdId, f64> {
    let max_bytes = max_bandwidth_per_ccd(cpu_code_name) as f64;
    let mut per_ccd: BTreeMap<CcdId, u64> = BTreeMap::new();
    for usage in groups.values() {
        for (&ccd, &mb) in &usage.ccd_mb {
            *per_ccd.entry(ccd).or_insert(0) += mb;
        }
    }
    per_ccd
        .into_iter()
        .map(|(ccd, mb)| (ccd, (mb * BYTES_PER_MB) as f64 / max_bytes))
        .collect()
}
