//! Planning controller
//!
//! One cycle is: sample counters, fold them into the monitor, validate the
//! snapshot against the topology, plan each sharing domain, then hand the
//! merged plan to the writer. Cycles run on a fixed interval and early on
//! request; bursts of requests coalesce into a single extra cycle.

mod writer;


pub use writer::{LoggingPlanWriter, PlanWriter};

use crate::domain::{DomainBudget, DomainManager};
use crate::health::{components, HealthRegistry};
use crate::monitor::{
    ccd_utilization, node_totals, sum_mb, CounterSource, GroupSnapshot, MbQosGroup, Monitor,
    MonitorConfig, UsageSnapshot,
};
use crate::observability::{MbMetrics, StructuredLogger};
use crate::policy::{HiPrioDetectedPolicy, MbPolicy, Plan};
use crate::topology::{MbSharingDomain, NodeId};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Timing of the planning loop
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Periodic planning interval (default: 10 seconds)
    pub interval: Duration,
    /// Window in which adjust requests are merged (default: 500 ms)
    pub coalesce_window: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            coalesce_window: Duration::from_millis(500),
        }
    }
}

/// Outcome of one planning cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanReport {
    pub plan: Plan,
    pub usage: UsageSnapshot,
    pub node_usage_mb: BTreeMap<NodeId, u64>,
    pub budgets: Vec<DomainBudget>,
    pub preempted_nodes: BTreeSet<NodeId>,
    pub generated_at: DateTime<Utc>,
    /// False when the writer failed; the plan is retried next cycle
    pub written: bool,
}

#[derive(Debug, Default)]
struct AdjustTrigger {
    pending: AtomicBool,
    notify: Notify,
}

type LatestReport = Arc<RwLock<Option<PlanReport>>>;

/// Cheap, cloneable access to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    trigger: Arc<AdjustTrigger>,
    latest: LatestReport,
    metrics: MbMetrics,
}

impl ControllerHandle {
    /// Ask for an early planning cycle
    ///
    /// Returns false when a request is already pending; the pending cycle
    /// will cover this one too.
    pub fn req_to_adjust_mb(&self) -> bool {
        self.metrics.inc_adjust_requests();
        if self.trigger.pending.swap(true, Ordering::AcqRel) {
            debug!("Adjust request coalesced into pending cycle");
            return false;
        }
        self.trigger.notify.notify_one();
        true
    }

    pub fn is_adjust_pending(&self) -> bool {
        self.trigger.pending.load(Ordering::Acquire)
    }

    /// Report of the most recent cycle
    pub fn latest_report(&self) -> Option<PlanReport> {
        self.latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Drives the monitor, policy and writer
pub struct Controller {
    source: Arc<dyn CounterSource>,
    writer: Arc<dyn PlanWriter>,
    policy: Arc<dyn MbPolicy>,
    monitor: Monitor,
    domains: Arc<DomainManager>,
    health: HealthRegistry,
    metrics: MbMetrics,
    logger: StructuredLogger,
    config: ControllerConfig,
    cpu_code_name: String,
    trigger: Arc<AdjustTrigger>,
    latest: LatestReport,
}

impl Controller {
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::new()
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            trigger: self.trigger.clone(),
            latest: self.latest.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Run one planning cycle
    ///
    /// Collection and validation failures abort the cycle. A write failure
    /// does not: the report is kept with `written == false`.
    pub async fn run_cycle(&self) -> Result<PlanReport> {
        let start = Instant::now();
        self.metrics.inc_planning_cycles();

        let sample = match self.source.sample().await {
            Ok(sample) => sample,
            Err(e) => {
                self.metrics.inc_collection_errors();
                self.health
                    .set_degraded(components::MONITOR, format!("collection failed: {:#}", e))
                    .await;
                return Err(e.context("Failed to sample bandwidth counters"));
            }
        };
        let usage = self.monitor.update(&sample);
        self.health.set_healthy(components::MONITOR).await;

        let topology = self.domains.topology().clone();
        if let Err(e) = topology.validate_groups(&usage.groups) {
            self.health
                .set_degraded(components::POLICY, e.to_string())
                .await;
            return Err(e).context("Usage snapshot does not match topology");
        }

        let preemption = self.domains.snapshot();
        self.metrics.set_preempted_nodes(preemption.nodes.len());

        let mut plan = Plan::new();
        let mut budgets = Vec::new();
        for domain in topology.domains() {
            let Some(budget) = self.domains.budget(domain.id, &preemption) else {
                continue;
            };

            let groups = partition(&usage.groups, domain);
            let measured_mb = sum_mb(&groups);
            self.metrics.set_domain_usage(domain.id, measured_mb);
            if measured_mb > budget.total_mb {
                self.logger
                    .log_domain_over_budget(domain.id, measured_mb, budget.total_mb);
            }

            plan.merge(self.policy.get_plan(budget.plannable_mb, &groups, true));
            budgets.push(budget);
        }
        self.health.set_healthy(components::POLICY).await;

        self.metrics.set_plan(&plan);
        self.metrics
            .set_ccd_utilization(&ccd_utilization(&usage.groups, &self.cpu_code_name));

        let written = match self.writer.write(&plan).await {
            Ok(()) => {
                self.health.set_healthy(components::WRITER).await;
                self.logger
                    .log_plan_applied(&plan, budgets.len(), start.elapsed().as_millis() as u64);
                true
            }
            Err(e) => {
                let message = format!("{:#}", e);
                self.metrics.inc_write_errors();
                self.health
                    .set_degraded(components::WRITER, message.clone())
                    .await;
                self.logger.log_plan_write_failed(&message);
                false
            }
        };

        let report = PlanReport {
            node_usage_mb: node_totals(&usage.groups, &topology),
            plan,
            usage,
            budgets,
            preempted_nodes: preemption.nodes,
            generated_at: Utc::now(),
            written,
        };

        *self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(report.clone());
        self.health.mark_plan_produced().await;
        self.metrics
            .observe_planning_latency(start.elapsed().as_secs_f64());

        Ok(report)
    }

    async fn run_logged_cycle(&self, trigger: &str) {
        match self.run_cycle().await {
            Ok(report) => debug!(
                trigger = trigger,
                entries = report.plan.len(),
                written = report.written,
                "Planning cycle complete"
            ),
            Err(e) => warn!(trigger = trigger, error = %format!("{:#}", e), "Planning cycle failed"),
        }
    }

    /// Run the planning loop until shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            coalesce_window_ms = self.config.coalesce_window.as_millis() as u64,
            "Starting memory bandwidth planning loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_logged_cycle("interval").await;
                }
                _ = self.trigger.notify.notified() => {
                    // Let a burst of admissions settle before planning
                    tokio::select! {
                        _ = sleep(self.config.coalesce_window) => {}
                        _ = shutdown.recv() => {
                            info!("Shutting down planning loop");
                            break;
                        }
                    }
                    self.trigger.pending.store(false, Ordering::Release);
                    self.run_logged_cycle("adjust").await;
                    ticker.reset();
                }
                _ = shutdown.recv() => {
                    info!("Shutting down planning loop");
                    break;
                }
            }
        }
    }
}

/// Restrict a snapshot to the CCDs of one sharing domain
fn partition(groups: &GroupSnapshot, domain: &MbSharingDomain) -> GroupSnapshot {
    groups
        .iter()
        .filter_map(|(group, usage)| {
            let ccd_mb: BTreeMap<_, _> = usage
                .ccd_mb
                .iter()
                .filter(|(ccd, _)| domain.ccds.contains(ccd))
                .map(|(ccd, mb)| (*ccd, *mb))
                .collect();
            (!ccd_mb.is_empty()).then(|| (*group, MbQosGroup::new(ccd_mb)))
        })
        .collect()
}

/// Builder for a [`Controller`]
pub struct ControllerBuilder {
    source: Option<Arc<dyn CounterSource>>,
    writer: Option<Arc<dyn PlanWriter>>,
    policy: Option<Arc<dyn MbPolicy>>,
    domains: Option<Arc<DomainManager>>,
    health: Option<HealthRegistry>,
    monitor_config: MonitorConfig,
    config: ControllerConfig,
    cpu_code_name: String,
    node_name: String,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            writer: None,
            policy: None,
            domains: None,
            health: None,
            monitor_config: MonitorConfig::default(),
            config: ControllerConfig::default(),
            cpu_code_name: String::new(),
            node_name: String::new(),
        }
    }

    pub fn source(mut self, source: Arc<dyn CounterSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the plan writer (default: [`LoggingPlanWriter`])
    pub fn writer(mut self, writer: Arc<dyn PlanWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Set the policy (default: [`HiPrioDetectedPolicy`] over the domain constants)
    pub fn policy(mut self, policy: Arc<dyn MbPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn domains(mut self, domains: Arc<DomainManager>) -> Self {
        self.domains = Some(domains);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn monitor_config(mut self, config: MonitorConfig) -> Self {
        self.monitor_config = config;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn coalesce_window(mut self, window: Duration) -> Self {
        self.config.coalesce_window = window;
        self
    }

    /// CPU code name used for the per-CCD utilization divisor
    pub fn cpu_code_name(mut self, code_name: impl Into<String>) -> Self {
        self.cpu_code_name = code_name.into();
        self
    }

    pub fn node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = node_name.into();
        self
    }

    pub fn build(self) -> Result<Controller> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Counter source is required"))?;
        let domains = self
            .domains
            .ok_or_else(|| anyhow::anyhow!("Domain manager is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Planning interval must be greater than zero");
        }

        let policy = self
            .policy
            .unwrap_or_else(|| Arc::new(HiPrioDetectedPolicy::new(domains.constants())));
        let writer = self
            .writer
            .unwrap_or_else(|| Arc::new(LoggingPlanWriter::new()));

        Ok(Controller {
            source,
            writer,
            policy,
            monitor: Monitor::new(self.monitor_config),
            domains,
            health: self.health.unwrap_or_default(),
            metrics: MbMetrics::new(),
            logger: StructuredLogger::new(self.node_name),
            config: self.config,
            cpu_code_name: self.cpu_code_name,
            trigger: Arc::new(AdjustTrigger::default()),
            latest: Arc::new(RwLock::new(None)),
        })
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
