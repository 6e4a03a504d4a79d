//! Per-platform memory bandwidth limits
//!
//! Practical socket bandwidth is the vendor's logical maximum derated to
//! roughly 70%, which is what sustained traffic actually reaches.

use crate::config::BYTES_PER_GB;

/// Per-CCD maximum used when the CPU model is not recognized; never zero
pub const DEFAULT_MAX_BANDWIDTH_BYTES: u64 = 100 * BYTES_PER_GB;

/// CPU platforms with a known bandwidth profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// AMD Zen4
    Genoa,
    /// AMD Zen3
    Milan,
    /// AMD Zen2
    Rome,
    /// Intel Sapphire Rapids
    SapphireRapids,
    /// Intel Skylake, Cascade Lake and Ice Lake
    Lake,
    Unknown,
}

impl Platform {
    /// Resolve a detected micro-architecture code name
    pub fn from_code_name(code_name: &str) -> Self {
        match code_name {
            "Zen4" => Platform::Genoa,
            "Zen3" => Platform::Milan,
            "Zen2" => Platform::Rome,
            "Rapids" => Platform::SapphireRapids,
            "Lake" => Platform::Lake,
            _ => Platform::Unknown,
        }
    }

    /// Number of CCDs per socket
    pub fn ccds_per_socket(&self) -> u64 {
        match self {
            Platform::Genoa => 12,
            Platform::Milan | Platform::Rome => 8,
            Platform::SapphireRapids | Platform::Lake | Platform::Unknown => 1,
        }
    }

    /// Practical socket bandwidth in bytes/sec, `None` when unknown
    pub fn socket_max_bandwidth(&self) -> Option<u64> {
        match self {
            Platform::Genoa => Some(322 * BYTES_PER_GB),
            Platform::Milan | Platform::Rome => Some(142 * BYTES_PER_GB),
            Platform::SapphireRapids => Some(215 * BYTES_PER_GB),
            Platform::Lake => Some(98 * BYTES_PER_GB),
            Platform::Unknown => None,
        }
    }
}

/// Maximum bandwidth of one CCD in bytes/sec for the given code name
pub fn max_bandwidth_per_ccd(code_name: &str) -> u64 {
    let platform = Platform::from_code_name(code_name);
    match platform.socket_max_bandwidth() {
        Some(socket) => socket / platform.ccds_per_socket(),
        None => DEFAULT_MAX_BANDWIDTH_BYTES,
    }
}
