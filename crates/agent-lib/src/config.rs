//! Bandwidth constants injected at process start
//!
//! All values are in MBps (1 MB = 1,000,000 bytes) unless noted. They are
//! validated once and never mutated afterwards.

use crate::error::{MbError, Result};
use serde::{Deserialize, Serialize};

/// Budget of one memory bandwidth sharing domain (120 GBps)
pub const DEFAULT_DOMAIN_TOTAL_MB: u64 = 120_000;

/// Floor reserved per node for protected tiers (25 GBps)
pub const DEFAULT_RESERVED_PER_NUMA_MB: u64 = 25_000;

/// Max bandwidth of a dedicated workload pinned to one node (60 GBps)
pub const DEFAULT_MAX_MB_DEDICATED_PER_NUMA: u64 = 60_000;

/// Lounge zone earmarked to the dedicated tier per preempted node (6 GBps)
pub const DEFAULT_LOUNGE_MB: u64 = 6_000;

/// Lounge tier ceiling per CCD while a higher shared pool is active (10 GBps)
pub const DEFAULT_LOUNGE_CONTENDED_MB: u64 = 10_000;

/// Largest value the hardware schemata accepts per CCD
pub const DEFAULT_MAX_MB_PER_CCD: u64 = 2048 / 8 * 1_000;

/// Bytes in one decimal megabyte
pub const BYTES_PER_MB: u64 = 1_000_000;

/// Bytes in one decimal gigabyte
pub const BYTES_PER_GB: u64 = 1_000_000_000;

/// Named bandwidth constants consumed by the domain manager and policy engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MbConstants {
    #[serde(default = "default_domain_total_mb")]
    pub domain_total_mb: u64,

    #[serde(default = "default_reserved_per_numa_mb")]
    pub reserved_per_numa_mb: u64,

    #[serde(default = "default_max_mb_dedicated_per_numa")]
    pub max_mb_dedicated_per_numa: u64,

    #[serde(default = "default_lounge_mb")]
    pub lounge_mb: u64,

    #[serde(default = "default_lounge_contended_mb")]
    pub lounge_contended_mb: u64,

    #[serde(default = "default_max_mb_per_ccd")]
    pub max_mb_per_ccd: u64,
}

fn default_domain_total_mb() -> u64 {
    DEFAULT_DOMAIN_TOTAL_MB
}

fn default_reserved_per_numa_mb() -> u64 {
    DEFAULT_RESERVED_PER_NUMA_MB
}

fn default_max_mb_dedicated_per_numa() -> u64 {
    DEFAULT_MAX_MB_DEDICATED_PER_NUMA
}

fn default_lounge_mb() -> u64 {
    DEFAULT_LOUNGE_MB
}

fn default_lounge_contended_mb() -> u64 {
    DEFAULT_LOUNGE_CONTENDED_MB
}

fn default_max_mb_per_ccd() -> u64 {
    DEFAULT_MAX_MB_PER_CCD
}

impl Default for MbConstants {
    fn default() -> Self {
        Self {
            domain_total_mb: DEFAULT_DOMAIN_TOTAL_MB,
            reserved_per_numa_mb: DEFAULT_RESERVED_PER_NUMA_MB,
            max_mb_dedicated_per_numa: DEFAULT_MAX_MB_DEDICATED_PER_NUMA,
            lounge_mb: DEFAULT_LOUNGE_MB,
            lounge_contended_mb: DEFAULT_LOUNGE_CONTENDED_MB,
            max_mb_per_ccd: DEFAULT_MAX_MB_PER_CCD,
        }
    }
}

impl MbConstants {
    /// Check that the constants can serve as budgets, floors and divisors
    pub fn validate(&self) -> Result<()> {
        if self.domain_total_mb == 0 {
            return Err(MbError::InvalidConfig(
                "domain_total_mb must be greater than zero".to_string(),
            ));
        }
        if self.reserved_per_numa_mb == 0 {
            return Err(MbError::InvalidConfig(
                "reserved_per_numa_mb must be greater than zero".to_string(),
            ));
        }
        if self.max_mb_per_ccd == 0 {
            return Err(MbError::InvalidConfig(
                "max_mb_per_ccd must be greater than zero".to_string(),
            ));
        }
        if self.domain_total_mb < self.reserved_per_numa_mb {
            return Err(MbError::InvalidConfig(format!(
                "domain_total_mb ({}) must cover reserved_per_numa_mb ({})",
                self.domain_total_mb, self.reserved_per_numa_mb
            )));
        }
        if self.lounge_contended_mb > self.reserved_per_numa_mb {
            return Err(MbError::InvalidConfig(format!(
                "lounge_contended_mb ({}) must not exceed reserved_per_numa_mb ({})",
                self.lounge_contended_mb, self.reserved_per_numa_mb
            )));
        }
        if self.reserved_per_numa_mb > self.max_mb_dedicated_per_numa {
            return Err(MbError::InvalidConfig(format!(
                "reserved_per_numa_mb ({}) must not exceed max_mb_dedicated_per_numa ({})",
                self.reserved_per_numa_mb, self.max_mb_dedicated_per_numa
            )));
        }
        Ok(())
    }
}
