//! Observability for the bandwidth agent
//!
//! Provides:
//! - Prometheus metrics (planning latency, cycle and error counts, per-domain
//!   usage, plan ceilings, preemption, CCD utilization)
//! - Event-tagged structured logging with tracing

use crate::policy::Plan;
use crate::topology::{CcdId, DomainId, NodeId};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_gauge,
    register_int_gauge_vec, GaugeVec, Histogram, IntCounter, IntGauge, IntGaugeVec,
};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for planning latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MbMetricsInner> = OnceLock::new();

struct MbMetricsInner {
    planning_latency_seconds: Histogram,
    planning_cycles: IntCounter,
    collection_errors: IntCounter,
    write_errors: IntCounter,
    adjust_requests: IntCounter,
    domain_usage_mb: IntGaugeVec,
    plan_ceiling_mb: IntGaugeVec,
    preempted_nodes: IntGauge,
    ccd_utilization_ratio: GaugeVec,
}

impl MbMetricsInner {
    fn new() -> Self {
        Self {
            planning_latency_seconds: register_histogram!(
                "mba_agent_planning_latency_seconds",
                "Time spent in one sample, plan and write cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register planning_latency_seconds"),

            planning_cycles: register_int_counter!(
                "mba_agent_planning_cycles_total",
                "Total number of planning cycles run"
            )
            .expect("Failed to register planning_cycles"),

            collection_errors: register_int_counter!(
                "mba_agent_collection_errors_total",
                "Total number of failed bandwidth counter collections"
            )
            .expect("Failed to register collection_errors"),

            write_errors: register_int_counter!(
                "mba_agent_write_errors_total",
                "Total number of failed plan writes"
            )
            .expect("Failed to register write_errors"),

            adjust_requests: register_int_counter!(
                "mba_agent_adjust_requests_total",
                "Total number of out-of-band re-planning requests"
            )
            .expect("Failed to register adjust_requests"),

            domain_usage_mb: register_int_gauge_vec!(
                "mba_agent_domain_usage_mbps",
                "Measured memory bandwidth per sharing domain in MBps",
                &["domain"]
            )
            .expect("Failed to register domain_usage_mb"),

            plan_ceiling_mb: register_int_gauge_vec!(
                "mba_agent_plan_ceiling_mbps",
                "Planned bandwidth ceiling per QoS group and CCD in MBps",
                &["qos_group", "ccd"]
            )
            .expect("Failed to register plan_ceiling_mb"),

            preempted_nodes: register_int_gauge!(
                "mba_agent_preempted_nodes",
                "Number of NUMA nodes preempted by dedicated workloads"
            )
            .expect("Failed to register preempted_nodes"),

            ccd_utilization_ratio: register_gauge_vec!(
                "mba_agent_ccd_utilization_ratio",
                "Measured bandwidth per CCD as a fraction of the platform maximum",
                &["ccd"]
            )
            .expect("Failed to register ccd_utilization_ratio"),
        }
    }
}

/// Handle to the process-wide bandwidth metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct MbMetrics {
    _private: (),
}

impl Default for MbMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MbMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MbMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MbMetricsInner {
        GLOBAL_METRICS.get_or_init(MbMetricsInner::new)
    }

    pub fn observe_planning_latency(&self, duration_secs: f64) {
        self.inner().planning_latency_seconds.observe(duration_secs);
    }

    pub fn inc_planning_cycles(&self) {
        self.inner().planning_cycles.inc();
    }

    pub fn inc_collection_errors(&self) {
        self.inner().collection_errors.inc();
    }

    pub fn inc_write_errors(&self) {
        self.inner().write_errors.inc();
    }

    pub fn inc_adjust_requests(&self) {
        self.inner().adjust_requests.inc();
    }

    pub fn set_domain_usage(&self, domain: DomainId, mb: u64) {
        self.inner()
            .domain_usage_mb
            .with_label_values(&[&domain.to_string()])
            .set(mb as i64);
    }

    /// Replace the published ceilings with the given plan
    pub fn set_plan(&self, plan: &Plan) {
        let gauge = &self.inner().plan_ceiling_mb;
        // Groups leave CCDs between cycles; stale series must go
        gauge.reset();
        for (group, ccd, mb) in plan.entries() {
            gauge
                .with_label_values(&[&group.to_string(), &ccd.to_string()])
                .set(mb as i64);
        }
    }

    pub fn set_preempted_nodes(&self, count: usize) {
        self.inner().preempted_nodes.set(count as i64);
    }

    pub fn set_ccd_utilization(&self, utilization: &BTreeMap<CcdId, f64>) {
        let gauge = &self.inner().ccd_utilization_ratio;
        gauge.reset();
        for (ccd, ratio) in utilization {
            gauge.with_label_values(&[&ccd.to_string()]).set(*ratio);
        }
    }
}

/// Structured logger for agent events
///
/// Every record carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log a plan handed to the writer
    pub fn log_plan_applied(&self, plan: &Plan, domains: usize, elapsed_ms: u64) {
        info!(
            event = "plan_applied",
            node = %self.node_name,
            groups = plan.plan.len(),
            entries = plan.len(),
            domains = domains,
            elapsed_ms = elapsed_ms,
            "Applied memory bandwidth plan"
        );
    }

    /// Log a plan the writer refused
    pub fn log_plan_write_failed(&self, error: &str) {
        warn!(
            event = "plan_write_failed",
            node = %self.node_name,
            error = %error,
            "Failed to write memory bandwidth plan, retrying next cycle"
        );
    }

    /// Log a domain whose measured usage exceeds its budget
    pub fn log_domain_over_budget(&self, domain: DomainId, measured_mb: u64, budget_mb: u64) {
        warn!(
            event = "domain_over_budget",
            node = %self.node_name,
            domain = domain,
            measured_mb = measured_mb,
            budget_mb = budget_mb,
            "Measured bandwidth exceeds domain budget"
        );
    }

    /// Log nodes newly earmarked for a dedicated workload
    pub fn log_nodes_preempted(&self, pod_uid: &str, nodes: &[NodeId]) {
        info!(
            event = "nodes_preempted",
            node = %self.node_name,
            pod_uid = %pod_uid,
            numa_nodes = ?nodes,
            "Preempted numa nodes for dedicated workload"
        );
    }

    /// Log an admission decision
    pub fn log_pod_admitted(
        &self,
        pod_uid: &str,
        namespace: &str,
        pod_name: &str,
        qos_level: &str,
        hint: Option<&[NodeId]>,
    ) {
        info!(
            event = "pod_admitted",
            node = %self.node_name,
            pod_uid = %pod_uid,
            namespace = %namespace,
            pod_name = %pod_name,
            qos_level = %qos_level,
            hint = ?hint,
            "Admitted pod"
        );
    }

    pub fn log_startup(&self, version: &str, domains: usize, ccds: usize) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            domains = domains,
            ccds = ccds,
            "Memory bandwidth agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Memory bandwidth agent shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::QosGroup;

    #[test]
    fn test_mb_metrics_updates() {
        let metrics = MbMetrics::new();
        let mut plan = Plan::new();
        plan.set(QosGroup::Shared(30), 2, 10_000);

        metrics.observe_planning_latency(0.001);
        metrics.inc_planning_cycles();
        metrics.inc_adjust_requests();
        metrics.set_domain_usage(0, 42_000);
        metrics.set_plan(&plan);
        metrics.set_preempted_nodes(2);
        metrics.set_ccd_utilization(&BTreeMap::from([(2, 0.25)]));

        let families = prometheus::gather();
        let cycles = families
            .iter()
            .find(|f| f.get_name() == "mba_agent_planning_cycles_total")
            .unwrap();
        assert!(cycles.get_metric()[0].get_counter().get_value() >= 1.0);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name, "test-node");
    }
}
