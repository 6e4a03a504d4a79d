//! Sharing domain CLI commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, DomainView};
use crate::output::{format_ids, format_mbps, format_share, print_json, print_rows, OutputFormat};

#[derive(Tabled)]
struct DomainRow {
    #[tabled(rename = "Domain")]
    id: u32,
    #[tabled(rename = "NUMA Nodes")]
    nodes: String,
    #[tabled(rename = "CCDs")]
    ccds: String,
    #[tabled(rename = "Total")]
    total: String,
    #[tabled(rename = "Plannable")]
    plannable: String,
    #[tabled(rename = "Share")]
    share: String,
    #[tabled(rename = "Preempted")]
    preempted: String,
}

impl From<&DomainView> for DomainRow {
    fn from(view: &DomainView) -> Self {
        Self {
            id: view.id,
            nodes: format_ids(&view.nodes),
            ccds: format_ids(&view.ccds),
            total: format_mbps(view.budget.total_mb),
            plannable: format_mbps(view.budget.plannable_mb),
            share: format_share(view.budget.plannable_mb, view.budget.total_mb),
            preempted: format_ids(&view.budget.preempted_nodes),
        }
    }
}

/// List sharing domains with their current budgets
pub async fn list_domains(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let domains = client.domains().await?;

    match format {
        OutputFormat::Json => print_json(&domains)?,
        OutputFormat::Table => {
            let rows: Vec<DomainRow> = domains.iter().map(DomainRow::from).collect();
            print_rows(rows, "No sharing domains discovered");
        }
    }

    Ok(())
}
