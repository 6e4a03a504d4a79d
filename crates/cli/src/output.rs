//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl OutputFormat {
    /// Parse a format name from the config file, ignoring case
    pub fn parse(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Print a value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as a rounded table
pub fn print_rows<T: Tabled>(rows: Vec<T>, empty_message: &str) {
    if rows.is_empty() {
        print_warning(empty_message);
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format decimal MBps as a human-readable rate
pub fn format_mbps(mbps: u64) -> String {
    if mbps >= 1000 {
        format!("{:.1} GB/s", mbps as f64 / 1000.0)
    } else {
        format!("{} MB/s", mbps)
    }
}

/// Format a share of a budget as a percentage
pub fn format_share(used: u64, total: u64) -> String {
    if total == 0 {
        return "-".to_string();
    }
    format!("{:.0}%", used as f64 * 100.0 / total as f64)
}

/// Format node ids as a comma-separated list
pub fn format_ids(ids: &[u32]) -> String {
    if ids.is_empty() {
        return "-".to_string();
    }
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Format an RFC 3339 timestamp for display
pub fn format_timestamp(ts: &str) -> String {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(ts) {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        ts.to_string()
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "ready" | "written" => status.green().to_string(),
        "degraded" | "pending" => status.yellow().to_string(),
        "unhealthy" | "not ready" | "failed" => status.red().to_string(),
        _ => status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mbps() {
        assert_eq!(format_mbps(0), "0 MB/s");
        assert_eq!(format_mbps(999), "999 MB/s");
        assert_eq!(format_mbps(25_000), "25.0 GB/s");
        assert_eq!(format_mbps(10_500), "10.5 GB/s");
    }

    #[test]
    fn test_format_share() {
        assert_eq!(format_share(30_000, 120_000), "25%");
        assert_eq!(format_share(1, 0), "-");
    }

    #[test]
    fn test_format_ids() {
        assert_eq!(format_ids(&[]), "-");
        assert_eq!(format_ids(&[0, 2, 3]), "0,2,3");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp("2024-05-01T10:00:00Z"), "2024-05-01 10:00:00");
        assert_eq!(format_timestamp("garbage"), "garbage");
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::parse("yaml"), None);
    }
}
