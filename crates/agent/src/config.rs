//! Agent configuration
//!
//! Loaded once at startup from an optional file and `MBA_*` environment
//! variables, e.g. `MBA_CONSTANTS__RESERVED_PER_NUMA_MB=25000`.

use anyhow::{Context, Result};
use mba_lib::{
    topology::{DEFAULT_SYSFS_CPU_DIR, DEFAULT_SYSFS_NODE_DIR},
    MbConstants, MonitorConfig,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "/etc/mba/agent";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics and plan queries
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Mount point of the resctrl filesystem
    #[serde(default = "default_resctrl_root")]
    pub resctrl_root: PathBuf,

    #[serde(default = "default_sysfs_cpu_dir")]
    pub sysfs_cpu_dir: PathBuf,

    #[serde(default = "default_sysfs_node_dir")]
    pub sysfs_node_dir: PathBuf,

    /// CPU microarchitecture code name (e.g. "Zen4"); unknown names use a
    /// default platform maximum
    #[serde(default)]
    pub cpu_code_name: String,

    /// Planning interval in seconds
    #[serde(default = "default_plan_interval")]
    pub plan_interval_secs: u64,

    /// Window in which adjust requests are merged, in milliseconds
    #[serde(default = "default_coalesce_window")]
    pub coalesce_window_ms: u64,

    #[serde(default)]
    pub constants: MbConstants,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_resctrl_root() -> PathBuf {
    PathBuf::from(mba_lib::task::RESCTRL_ROOT)
}

fn default_sysfs_cpu_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SYSFS_CPU_DIR)
}

fn default_sysfs_node_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SYSFS_NODE_DIR)
}

fn default_plan_interval() -> u64 {
    10
}

fn default_coalesce_window() -> u64 {
    500
}

impl AgentConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let file = std::env::var("MBA_CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&file)
    }

    fn load_from(file: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix("MBA")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("Failed to read agent configuration")?;

        let agent: AgentConfig = config
            .try_deserialize()
            .context("Invalid agent configuration")?;
        agent.validate()?;
        Ok(agent)
    }

    fn validate(&self) -> Result<()> {
        self.constants
            .validate()
            .context("Invalid bandwidth constants")?;
        if self.plan_interval_secs == 0 {
            anyhow::bail!("plan_interval_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn plan_interval(&self) -> Duration {
        Duration::from_secs(self.plan_interval_secs)
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = AgentConfig::load_from("/nonexistent/mba-agent").unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.plan_interval(), Duration::from_secs(10));
        assert_eq!(config.coalesce_window(), Duration::from_millis(500));
        assert_eq!(config.constants, MbConstants::default());
        assert_eq!(config.resctrl_root, PathBuf::from("/sys/fs/resctrl"));
    }

    #[test]
    fn test_file_overrides_nested_constants() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "api_port = 9100\ncpu_code_name = \"Zen4\"\n\n[constants]\nreserved_per_numa_mb = 20000\n"
        )
        .unwrap();

        let path = file.path().with_extension("");
        let config = AgentConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.cpu_code_name, "Zen4");
        assert_eq!(config.constants.reserved_per_numa_mb, 20_000);
        assert_eq!(config.constants.domain_total_mb, 120_000);
    }

    #[test]
    fn test_invalid_constants_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[constants]\ndomain_total_mb = 0\n").unwrap();

        let path = file.path().with_extension("");
        assert!(AgentConfig::load_from(path.to_str().unwrap()).is_err());
    }
}
