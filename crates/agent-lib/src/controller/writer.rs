//! Sinks for computed plans
//!
//! Translating ceilings into the hardware throttling representation is the
//! writer's job; the controller only hands plans over.

use crate::policy::Plan;
use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

/// Persists a plan into the OS bandwidth throttling interface
#[async_trait]
pub trait PlanWriter: Send + Sync {
    async fn write(&self, plan: &Plan) -> Result<()>;
}

/// Dry-run writer that only logs the plan
#[derive(Debug, Default)]
pub struct LoggingPlanWriter;

impl LoggingPlanWriter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PlanWriter for LoggingPlanWriter {
    async fn write(&self, plan: &Plan) -> Result<()> {
        for (group, ccd, ceiling_mb) in plan.entries() {
            debug!(qos_group = %group, ccd = ccd, ceiling_mb = ceiling_mb, "Planned ceiling");
        }
        info!(entries = plan.len(), "Dry run, plan not written");
        Ok(())
    }
}
