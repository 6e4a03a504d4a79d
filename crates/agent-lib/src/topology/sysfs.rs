//! Topology discovery from sysfs
//!
//! Reads:
//! - `cpu/cpuN/cache/index3/id` for the L3 cache (CCD) of each CPU
//! - `cpu/cpuN/topology/physical_package_id` for the socket of each CPU
//! - `node/nodeM/cpulist` for the CPUs of each NUMA node

use super::{CcdId, CpuId, NodeId, Topology};
use crate::error::{MbError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

pub const DEFAULT_SYSFS_CPU_DIR: &str = "/sys/devices/system/cpu";
pub const DEFAULT_SYSFS_NODE_DIR: &str = "/sys/devices/system/node";

/// Widest range a cpulist may expand to
pub const MAX_CPU_RANGE: u32 = 65_536;

/// Parse a kernel cpulist such as `0-3,8,10-11`
pub fn parse_cpu_list(list: &str) -> Result<Vec<CpuId>> {
    let mut cpus = Vec::new();
    for (start, end) in cpu_ranges(list)? {
        if end - start >= MAX_CPU_RANGE {
            return Err(MbError::InvalidCpuList(list.to_string()));
        }
        cpus.extend(start..=end);
    }
    Ok(cpus)
}

/// Whether `cpu` appears in a cpulist; malformed lists never match
pub fn cpu_in_list(cpu: CpuId, list: &str) -> bool {
    cpu_ranges(list)
        .map(|ranges| ranges.iter().any(|&(start, end)| (start..=end).contains(&cpu)))
        .unwrap_or(false)
}

/// Inclusive ranges of a cpulist, without expanding them
fn cpu_ranges(list: &str) -> Result<Vec<(CpuId, CpuId)>> {
    let invalid = || MbError::InvalidCpuList(list.to_string());
    let mut ranges = Vec::new();

    for part in list.trim().split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        match part.split_once('-') {
            Some((start, end)) => {
                let start: CpuId = start.trim().parse().map_err(|_| invalid())?;
                let end: CpuId = end.trim().parse().map_err(|_| invalid())?;
                if start > end {
                    return Err(invalid());
                }
                ranges.push((start, end));
            }
            None => {
                let cpu: CpuId = part.parse().map_err(|_| invalid())?;
                ranges.push((cpu, cpu));
            }
        }
    }

    Ok(ranges)
}

/// Find the NUMA node that owns a CPU sharing the given L3 cache id
pub async fn numa_id_by_l3_cache_id(
    l3_id: u32,
    cpu_dir: &Path,
    node_dir: &Path,
) -> Result<NodeId> {
    let mut representative = None;
    for (cpu, path) in indexed_entries(cpu_dir, "cpu").await? {
        match read_u32(&path.join("cache/index3/id")).await {
            Ok(id) if id == l3_id => {
                representative = Some(cpu);
                break;
            }
            Ok(_) => {}
            Err(e) => debug!(cpu = cpu, error = %e, "Skipping cpu without l3 cache id"),
        }
    }

    let cpu = representative.ok_or(MbError::NumaNotFound(l3_id))?;

    for (node, path) in indexed_entries(node_dir, "node").await? {
        let cpulist = read_trimmed(&path.join("cpulist")).await?;
        if cpu_in_list(cpu, &cpulist) {
            return Ok(node);
        }
    }

    Err(MbError::NumaNotFound(l3_id))
}

/// Build the machine topology from sysfs
///
/// Nodes are grouped into sharing domains by socket. When any node's socket
/// cannot be determined every node becomes its own domain.
pub async fn discover_topology(cpu_dir: &Path, node_dir: &Path, domain_budget_mb: u64) -> Result<Topology> {
    let mut ccd_cpus: BTreeMap<CcdId, Vec<CpuId>> = BTreeMap::new();
    let mut cpu_package: BTreeMap<CpuId, u32> = BTreeMap::new();

    for (cpu, path) in indexed_entries(cpu_dir, "cpu").await? {
        match read_u32(&path.join("cache/index3/id")).await {
            Ok(l3_id) => ccd_cpus.entry(l3_id).or_default().push(cpu),
            Err(_) => {
                debug!(cpu = cpu, "Cpu has no l3 cache id, probably offline");
                continue;
            }
        }
        if let Ok(package) = read_u32(&path.join("topology/physical_package_id")).await {
            cpu_package.insert(cpu, package);
        }
    }

    if ccd_cpus.is_empty() {
        return Err(MbError::InvalidTopology(format!(
            "no l3 cache ids found under {}",
            cpu_dir.display()
        )));
    }

    let mut builder = Topology::builder().domain_budget(domain_budget_mb);
    let mut node_package: BTreeMap<NodeId, Option<u32>> = BTreeMap::new();

    for (ccd, cpus) in ccd_cpus {
        let node = numa_id_by_l3_cache_id(ccd, cpu_dir, node_dir).await?;
        let package = cpus.iter().find_map(|cpu| cpu_package.get(cpu).copied());
        node_package.entry(node).or_insert(package);
        builder = builder.add_ccd(ccd, node, cpus);
    }

    let by_socket = node_package.values().all(Option::is_some);
    if !by_socket {
        warn!("Socket of some numa nodes unknown, using one sharing domain per node");
    }
    for (node, package) in node_package {
        let domain = match package {
            Some(package) if by_socket => package,
            _ => node,
        };
        builder = builder.assign_node(node, domain);
    }

    builder.build()
}

/// List `<prefix><N>` entries of a sysfs directory sorted by N
async fn indexed_entries(dir: &Path, prefix: &str) -> Result<Vec<(u32, PathBuf)>> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| MbError::io(dir, e))?;
    let mut result = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(|e| MbError::io(dir, e))? {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(index) = name
            .strip_prefix(prefix)
            .and_then(|suffix| suffix.parse::<u32>().ok())
        {
            result.push((index, entry.path()));
        }
    }

    result.sort_by_key(|(index, _)| *index);
    Ok(result)
}

async fn read_trimmed(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .map(|content| content.trim().to_string())
        .map_err(|e| MbError::io(path, e))
}

async fn read_u32(path: &Path) -> Result<u32> {
    let content = read_trimmed(path).await?;
    content.parse().map_err(|_| {
        MbError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, content.clone()),
        )
    })
}
