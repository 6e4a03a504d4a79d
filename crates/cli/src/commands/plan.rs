//! Plan and usage CLI commands

use anyhow::Result;
use colored::Colorize;
use std::collections::BTreeSet;
use tabled::Tabled;

use crate::client::{ApiClient, PlanReport};
use crate::output::{
    color_status, format_ids, format_mbps, format_timestamp, print_json, print_rows, OutputFormat,
};

/// Row for the plan table
#[derive(Tabled)]
struct CeilingRow {
    #[tabled(rename = "QoS Group")]
    group: String,
    #[tabled(rename = "CCD")]
    ccd: u32,
    #[tabled(rename = "Ceiling")]
    ceiling: String,
    #[tabled(rename = "Usage")]
    usage: String,
}

/// Row for the usage table
#[derive(Tabled)]
struct UsageRow {
    #[tabled(rename = "QoS Group")]
    group: String,
    #[tabled(rename = "CCD")]
    ccd: u32,
    #[tabled(rename = "Usage")]
    usage: String,
}

#[derive(Tabled)]
struct NodeUsageRow {
    #[tabled(rename = "NUMA Node")]
    node: u32,
    #[tabled(rename = "Usage")]
    usage: String,
    #[tabled(rename = "Preempted")]
    preempted: String,
}

fn ceiling_rows(report: &PlanReport) -> Vec<CeilingRow> {
    report
        .plan
        .plan
        .iter()
        .flat_map(|(group, ccds)| {
            ccds.iter().map(move |(ccd, ceiling)| {
                let usage = report
                    .usage
                    .groups
                    .get(group)
                    .and_then(|g| g.ccd_mb.get(ccd))
                    .map(|mb| format_mbps(*mb))
                    .unwrap_or_else(|| "-".to_string());
                CeilingRow {
                    group: group.clone(),
                    ccd: *ccd,
                    ceiling: format_mbps(*ceiling),
                    usage,
                }
            })
        })
        .collect()
}

/// Show the most recent bandwidth plan
pub async fn show_plan(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report = client.plan().await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            println!("{}", "Bandwidth Plan".bold());
            println!("{}", "=".repeat(50));
            println!("Generated: {}", format_timestamp(&report.generated_at));
            let written = if report.written { "written" } else { "failed" };
            println!("Applied:   {}", color_status(written));
            println!("Preempted: {}", format_ids(&report.preempted_nodes));
            println!();

            print_rows(ceiling_rows(&report), "Plan has no entries");
        }
    }

    Ok(())
}

/// Show measured usage per QoS group and NUMA node
pub async fn show_usage(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report = client.plan().await?;

    match format {
        OutputFormat::Json => print_json(&report.usage)?,
        OutputFormat::Table => {
            println!("{}", "Bandwidth Usage".bold());
            println!("{}", "=".repeat(50));
            if let Some(ts) = &report.usage.timestamp {
                println!("Sampled: {}", format_timestamp(ts));
            }
            println!();

            let rows: Vec<UsageRow> = report
                .usage
                .groups
                .iter()
                .flat_map(|(group, usage)| {
                    usage.ccd_mb.iter().map(move |(ccd, mb)| UsageRow {
                        group: group.clone(),
                        ccd: *ccd,
                        usage: format_mbps(*mb),
                    })
                })
                .collect();
            print_rows(rows, "No bandwidth measured yet");

            let preempted: BTreeSet<u32> = report.preempted_nodes.iter().copied().collect();
            let nodes: Vec<NodeUsageRow> = report
                .node_usage_mb
                .iter()
                .map(|(node, mb)| NodeUsageRow {
                    node: *node,
                    usage: format_mbps(*mb),
                    preempted: if preempted.contains(node) { "yes" } else { "no" }.to_string(),
                })
                .collect();
            if !nodes.is_empty() {
                println!();
                print_rows(nodes, "");
            }
        }
    }

    Ok(())
}
