//! Memory bandwidth agent
//!
//! This binary runs as a DaemonSet on each Kubernetes node. It discovers
//! the CCD/NUMA topology, samples resctrl bandwidth counters and plans
//! per-group bandwidth ceilings for every sharing domain.

use anyhow::{Context, Result};
use mba_lib::{
    health::{components, HealthRegistry},
    topology::discover_topology,
    Admitter, Controller, DomainManager, LoggingPlanWriter, ResctrlCounterSource,
    StructuredLogger, TaskManager,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting mba-agent");

    let config = config::AgentConfig::load()?;
    info!(
        node_name = %config.node_name,
        cpu_code_name = %config.cpu_code_name,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    for component in [
        components::MONITOR,
        components::POLICY,
        components::WRITER,
        components::ADMISSION,
    ] {
        health_registry.register(component).await;
    }

    let topology = discover_topology(
        &config.sysfs_cpu_dir,
        &config.sysfs_node_dir,
        config.constants.domain_total_mb,
    )
    .await
    .context("Failed to discover memory bandwidth topology")?;
    let topology = Arc::new(topology);

    let domains = Arc::new(DomainManager::new(topology.clone(), config.constants.clone()));
    let tasks = Arc::new(TaskManager::new(topology.clone()));

    let source = ResctrlCounterSource::new(&config.resctrl_root);
    if !source.is_available().await {
        warn!(root = %config.resctrl_root.display(), "Resctrl monitoring not available");
        health_registry
            .set_degraded(components::MONITOR, "resctrl monitoring not available")
            .await;
    }

    let controller = Controller::builder()
        .source(Arc::new(source))
        .writer(Arc::new(LoggingPlanWriter::new()))
        .domains(domains.clone())
        .health(health_registry.clone())
        .monitor_config(config.monitor.clone())
        .interval(config.plan_interval())
        .coalesce_window(config.coalesce_window())
        .cpu_code_name(&config.cpu_code_name)
        .node_name(&config.node_name)
        .build()?;
    let handle = controller.handle();

    let logger = StructuredLogger::new(&config.node_name);
    let admitter = Arc::new(Admitter::new(
        domains.clone(),
        tasks,
        handle.clone(),
        logger.clone(),
    ));
    logger.log_startup(AGENT_VERSION, topology.domains().count(), topology.ccds().count());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let controller_handle = tokio::spawn(controller.run(shutdown_rx));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        domains,
        handle,
        admitter,
    ));

    // Readiness still waits for the first plan
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            let reason = match result {
                Ok(Ok(())) => "API server stopped".to_string(),
                Ok(Err(e)) => format!("API server failed: {:#}", e),
                Err(e) => format!("API server task failed: {}", e),
            };
            logger.log_shutdown(&reason);
        }
    }

    let _ = shutdown_tx.send(());
    if let Err(e) = controller_handle.await {
        warn!(error = %e, "Planning loop did not stop cleanly");
    }
    info!("Shutdown complete");

    Ok(())
}
