//! Memory bandwidth allocation core
//!
//! This crate provides:
//! - Machine topology (NUMA nodes, CCDs, sharing domains) and sysfs discovery
//! - The QoS group and task model with resctrl path derivation
//! - A bandwidth monitor turning raw counters into per-group usage
//! - Domain preemption state and a priority-tiered policy engine
//! - The planning controller and pod admission binding
//! - Health checks and observability

pub mod admit;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod health;
pub mod monitor;
pub mod observability;
pub mod policy;
pub mod task;
pub mod topology;

pub use admit::{AdmissionOutcome, AdmissionRequest, Admitter, ContainerType};
pub use config::MbConstants;
pub use controller::{
    Controller, ControllerBuilder, ControllerConfig, ControllerHandle, LoggingPlanWriter,
    PlanReport, PlanWriter,
};
pub use domain::{DomainBudget, DomainManager, PreemptionSnapshot};
pub use error::{MbError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use monitor::{
    CounterSample, CounterSource, GroupSnapshot, MbQosGroup, Monitor, MonitorConfig,
    ResctrlCounterSource, UsageSnapshot,
};
pub use observability::{MbMetrics, StructuredLogger};
pub use policy::{HiPrioDetectedPolicy, MbPolicy, Plan};
pub use task::{QosGroup, QosLevel, Task, TaskManager};
pub use topology::{MbSharingDomain, Topology};
