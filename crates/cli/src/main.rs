//! Memory bandwidth allocator CLI
//!
//! Inspects plans, usage and sharing domains of a node's bandwidth agent,
//! and can nudge it to re-plan or admit a pod by hand.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{domains, plan, pods, status};

/// Memory bandwidth allocator CLI
#[derive(Parser)]
#[command(name = "mbactl")]
#[command(author, version, about = "CLI for the Memory Bandwidth Allocator agent", long_about = None)]
pub struct Cli {
    /// Agent API URL (can also be set via MBACTL_API_URL env var)
    #[arg(long, env = "MBACTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the most recent bandwidth plan
    Plan,

    /// Show measured bandwidth per QoS group and NUMA node
    Usage,

    /// List sharing domains and their budgets
    Domains,

    /// Show agent health and readiness
    Status,

    /// Ask the agent to re-plan soon
    Adjust,

    /// Admit a pod container through the agent
    Admit {
        /// Pod UID
        pod_uid: String,

        #[arg(long, default_value = "default")]
        namespace: String,

        #[arg(long, default_value = "")]
        name: String,

        /// Container type (main, sidecar, init)
        #[arg(long, default_value = "main")]
        container_type: String,

        /// QoS level annotation (e.g. dedicated_cores)
        #[arg(long)]
        qos_level: Option<String>,

        /// NUMA affinity hint, comma-separated node ids
        #[arg(long, value_delimiter = ',', num_args = 0..)]
        hint: Option<Vec<u32>>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    let format = cli
        .format
        .or_else(|| {
            config
                .default_format
                .as_deref()
                .and_then(output::OutputFormat::parse)
        })
        .unwrap_or_default();

    let client = client::ApiClient::new(&config.resolve_api_url(cli.api_url.as_deref()))?;

    match cli.command {
        Commands::Plan => plan::show_plan(&client, format).await?,
        Commands::Usage => plan::show_usage(&client, format).await?,
        Commands::Domains => domains::list_domains(&client, format).await?,
        Commands::Status => status::show_status(&client, format).await?,
        Commands::Adjust => pods::request_adjust(&client, format).await?,
        Commands::Admit {
            pod_uid,
            namespace,
            name,
            container_type,
            qos_level,
            hint,
        } => {
            let request = client::AdmissionRequest {
                pod_uid,
                pod_namespace: namespace,
                pod_name: name,
                container_type,
                qos_level,
                hint,
            };
            pods::admit_pod(&client, request, format).await?;
        }
    }

    Ok(())
}
