//! Core data models for the investigation monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable observation of the cluster at one instant.
///
/// Snapshots are value copies of the API server state, never live handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub taken_at: DateTime<Utc>,
    pub nodes: Vec<NodeInfo>,
    pub pods: Vec<PodInfo>,
    pub events: Vec<EventInfo>,
    pub deployments: Vec<DeploymentInfo>,
    pub services: Vec<ServiceInfo>,
    pub namespaces: Vec<String>,
    /// Per-node utilization, empty when the metrics pipeline is unavailable
    #[serde(default)]
    pub node_usage: Vec<NodeUsage>,
}

impl ClusterSnapshot {
    /// Empty snapshot at the given instant, used as a neutral starting point
    pub fn empty(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            nodes: Vec::new(),
            pods: Vec::new(),
            events: Vec::new(),
            deployments: Vec::new(),
            services: Vec::new(),
            namespaces: Vec::new(),
            node_usage: Vec::new(),
        }
    }

    pub fn summary(&self) -> ClusterSummary {
        let pods_running = self.pods.iter().filter(|p| p.phase == PodPhase::Running).count();
        let pods_failed = self.pods.iter().filter(|p| p.phase == PodPhase::Failed).count();
        let pods_pending = self.pods.iter().filter(|p| p.phase == PodPhase::Pending).count();
        ClusterSummary {
            nodes_total: self.nodes.len(),
            nodes_ready: self.nodes.iter().filter(|n| n.ready).count(),
            pods_total: self.pods.len(),
            pods_running,
            pods_failed,
            pods_pending,
            deployments: self.deployments.len(),
            events_warning: self
                .events
                .iter()
                .filter(|e| e.kind == EventKind::Warning)
                .count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub ready: bool,
    /// Active pressure conditions (MemoryPressure, DiskPressure, PIDPressure)
    #[serde(default)]
    pub pressure: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUsage {
    pub node: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Running,
    Pending,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    pub namespace: String,
    pub name: String,
    /// Owning controller, e.g. `ReplicaSet/frontend-7b9f8c6d5`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,
    pub phase: PodPhase,
    pub containers: Vec<ContainerStatusInfo>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub age_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatusInfo {
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub restart_count: u32,
    /// True for init containers, which fail before the main containers start
    #[serde(default)]
    pub init: bool,
}

/// Container runtime state as reported by the kubelet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Waiting {
        reason: String,
        #[serde(default)]
        message: String,
    },
    Terminated {
        reason: String,
        exit_code: i32,
        #[serde(default)]
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventInfo {
    pub kind: EventKind,
    pub reason: String,
    pub object: ObjectRef,
    pub message: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub namespace: String,
    pub name: String,
    pub desired_replicas: i32,
    pub available_replicas: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    pub has_endpoints: bool,
}

/// Anomaly kinds the detector can classify.
///
/// The serialized names match the Kubernetes status/event reasons they are
/// derived from so that operators can grep reports against `kubectl` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueKind {
    ImagePullBackOff,
    ErrImagePull,
    CrashLoopBackOff,
    #[serde(rename = "OOMKilled")]
    OomKilled,
    PendingUnschedulable,
    NodeNotReady,
    HighRestart,
    EvictedPod,
    FailedMount,
    Unknown,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::ImagePullBackOff => "ImagePullBackOff",
            IssueKind::ErrImagePull => "ErrImagePull",
            IssueKind::CrashLoopBackOff => "CrashLoopBackOff",
            IssueKind::OomKilled => "OOMKilled",
            IssueKind::PendingUnschedulable => "PendingUnschedulable",
            IssueKind::NodeNotReady => "NodeNotReady",
            IssueKind::HighRestart => "HighRestart",
            IssueKind::EvictedPod => "EvictedPod",
            IssueKind::FailedMount => "FailedMount",
            IssueKind::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Dispatch priority; lower ranks first
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        };
        write!(f, "{s}")
    }
}

/// The resource an issue points at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueTarget {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

/// One anomaly extracted from a snapshot.
///
/// The fingerprint identifies the *kind* of issue, not a specific occurrence:
/// timestamps, counts and pod UIDs are excluded so recurrences collapse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub target: IssueTarget,
    /// Short verbatim snippets from status fields or events
    pub evidence: Vec<String>,
    pub primary_reason: String,
    pub fingerprint: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    PodFailures,
    NodeHealth,
    ResourcePressure,
    ImagePolicy,
    Network,
    Storage,
    Events,
    KnowledgeGap,
}

impl FindingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingCategory::PodFailures => "pod_failures",
            FindingCategory::NodeHealth => "node_health",
            FindingCategory::ResourcePressure => "resource_pressure",
            FindingCategory::ImagePolicy => "image_policy",
            FindingCategory::Network => "network",
            FindingCategory::Storage => "storage",
            FindingCategory::Events => "events",
            FindingCategory::KnowledgeGap => "knowledge_gap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTool {
    Cluster,
    Analyzer,
    Knowledge,
    Llm,
    Internal,
}

/// Atomic output of one investigation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub category: FindingCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub affected_resources: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<String>,
    pub source_tool: SourceTool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvestigationMode {
    Deterministic,
    Agentic,
}

impl InvestigationMode {
    /// Report id prefix (`det_…` / `agt_…`)
    pub fn prefix(&self) -> &'static str {
        match self {
            InvestigationMode::Deterministic => "det",
            InvestigationMode::Agentic => "agt",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvestigationMode::Deterministic => "deterministic",
            InvestigationMode::Agentic => "agentic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl ReportStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReportStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::InProgress => "in_progress",
            ReportStatus::Completed => "completed",
            ReportStatus::Failed => "failed",
            ReportStatus::Cancelled => "cancelled",
            ReportStatus::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub nodes_total: usize,
    pub nodes_ready: usize,
    pub pods_total: usize,
    pub pods_running: usize,
    pub pods_failed: usize,
    pub pods_pending: usize,
    pub deployments: usize,
    pub events_warning: usize,
}

/// One investigation run.
///
/// Created by the scheduler on dispatch, mutated only by the owning
/// investigator, sealed (immutable) once a terminal status is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationReport {
    pub id: String,
    pub mode: InvestigationMode,
    #[serde(default)]
    pub triggering_fingerprints: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub cluster_summary: ClusterSummary,
    pub findings: Vec<Finding>,
    pub executive_summary: String,
    pub recommendations: Vec<String>,
    pub steps: Vec<StepRecord>,
    pub status: ReportStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One line of operator-visible activity, streamed over the event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    IssuesDetected,
    HighIssues,
    CriticalIssues,
    AdapterUnavailable,
}

/// Periodic heartbeat derived from each snapshot tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub timestamp: DateTime<Utc>,
    pub nodes_ready: usize,
    pub nodes_total: usize,
    pub pods_running: usize,
    pub pods_pending: usize,
    pub pods_total: usize,
    pub issues_count: usize,
    pub status: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_investigation_id: Option<String>,
}

/// Single diagnostic returned by the external analyzer tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}
