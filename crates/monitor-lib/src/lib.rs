//! Core library for the autonomous Kubernetes investigation monitor
//!
//! This crate provides:
//! - Periodic cluster snapshotting and issue classification
//! - Investigation scheduling with deduplication and concurrency bounds
//! - Deterministic and knowledge-augmented investigators
//! - Report construction, persistence and retrieval
//! - A single-process event bus for logs, status and report streams
//! - Boundary adapters for the cluster, analyzer, LLM and filesystem

pub mod adapters;
pub mod bus;
pub mod cancel;
pub mod detector;
pub mod error;
pub mod health;
pub mod investigator;
pub mod knowledge;
pub mod models;
pub mod observability;
pub mod report;
pub mod scheduler;
pub mod snapshot;
pub mod state;

pub use bus::{EventBus, ReportEvent, ReportEventKind};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::MonitorMetrics;
pub use report::ReportStore;
pub use scheduler::{
    CancelOutcome, DispatchError, InvestigationRequest, InvestigationScheduler, RequestedMode,
    SchedulerConfig, SchedulerHandle,
};
pub use snapshot::Snapshotter;
pub use state::MonitorState;
