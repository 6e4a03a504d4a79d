//! Counter source backed by the resctrl filesystem
//!
//! Reads `mbm_total_bytes` of every top-level control group whose folder
//! name is a QoS group:
//! - `<root>/<group>/mon_data/mon_L3_<NN>/mbm_total_bytes`
//!
//! `NN` is the L3 cache id, which is the CCD id. Counters the kernel reports
//! as `Unavailable` are left out of the sample.

use super::{CounterSample, CounterSource};
use crate::task::QosGroup;
use crate::topology::CcdId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const MON_DATA_FOLDER: &str = "mon_data";
const MON_L3_PREFIX: &str = "mon_L3_";
const MBM_TOTAL_FILE: &str = "mbm_total_bytes";

/// Reads cumulative bandwidth counters from resctrl
pub struct ResctrlCounterSource {
    root: PathBuf,
}

impl ResctrlCounterSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Check if resctrl is mounted with monitoring support
    pub async fn is_available(&self) -> bool {
        fs::metadata(self.root.join(MON_DATA_FOLDER)).await.is_ok()
    }

    /// Parse an `mbm_total_bytes` file; `None` for "Unavailable" or garbage
    pub fn parse_counter(content: &str) -> Option<u64> {
        content.trim().parse().ok()
    }

    /// Extract the CCD id from a `mon_L3_NN` folder name
    pub fn parse_mon_l3_id(name: &str) -> Option<CcdId> {
        name.strip_prefix(MON_L3_PREFIX)?.parse().ok()
    }

    /// Read all CCD counters of one control group
    async fn read_group(&self, group_path: &Path) -> Result<BTreeMap<CcdId, u64>> {
        let mon_data = group_path.join(MON_DATA_FOLDER);
        let mut entries = fs::read_dir(&mon_data)
            .await
            .with_context(|| format!("Failed to list {}", mon_data.display()))?;
        let mut counters = BTreeMap::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(ccd) = Self::parse_mon_l3_id(&name) else {
                continue;
            };

            let file = entry.path().join(MBM_TOTAL_FILE);
            match fs::read_to_string(&file).await {
                Ok(content) => match Self::parse_counter(&content) {
                    Some(value) => {
                        counters.insert(ccd, value);
                    }
                    None => debug!(path = %file.display(), "Counter unavailable"),
                },
                Err(e) => debug!(path = %file.display(), error = %e, "Failed to read counter"),
            }
        }

        Ok(counters)
    }
}

#[async_trait]
impl CounterSource for ResctrlCounterSource {
    async fn sample(&self) -> Result<CounterSample> {
        let timestamp = chrono::Utc::now();
        let mut entries = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to list {}", self.root.display()))?;
        let mut counters = HashMap::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();

            let name = entry.file_name().to_string_lossy().to_string();
            let Ok(group) = name.parse::<QosGroup>() else {
                continue;
            };

            match self.read_group(&path).await {
                Ok(ccd_counters) if !ccd_counters.is_empty() => {
                    counters.insert(group, ccd_counters);
                }
                Ok(_) => debug!(qos_group = %group, "No counters for group"),
                Err(e) => debug!(qos_group = %group, error = %e, "Failed to read group counters"),
            }
        }

        Ok(CounterSample {
            timestamp,
            counters,
        })
    }
}
