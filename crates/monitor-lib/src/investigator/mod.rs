//! Investigation executors
//!
//! Both investigators work against the same context: the triggering issues,
//! the latest snapshot, and the boundary adapters. They append findings and
//! step records to a shared report builder so the scheduler can seal a
//! partial report if the run is cancelled or times out.

mod agentic;
mod deterministic;

pub use agentic::AgenticInvestigator;
pub use deterministic::DeterministicInvestigator;

use crate::adapters::{AnalyzerAdapter, ClusterAdapter, LlmAdapter};
use crate::bus::EventBus;
use crate::cancel::CancelToken;
use crate::knowledge::KnowledgeIndex;
use crate::models::{ClusterSnapshot, InvestigationMode, Issue, LogLevel, ReportStatus, StepStatus};
use crate::report::SharedReport;
use std::sync::Arc;
use std::time::Duration;

pub use async_trait::async_trait;

/// Everything an investigator may touch during one run
pub struct InvestigationContext {
    pub issues: Vec<Issue>,
    pub namespace: Option<String>,
    pub snapshot: ClusterSnapshot,
    pub cluster: Arc<dyn ClusterAdapter>,
    pub analyzer: Arc<dyn AnalyzerAdapter>,
    pub llm: Arc<dyn LlmAdapter>,
    pub knowledge: Arc<KnowledgeIndex>,
    pub bus: EventBus,
    pub cancel: CancelToken,
    pub adapter_timeout: Duration,
    /// Overall investigation deadline
    pub deadline: tokio::time::Instant,
    pub max_iterations: usize,
}

impl InvestigationContext {
    pub fn deadline_passed(&self) -> bool {
        tokio::time::Instant::now() >= self.deadline
    }

    /// Time left before the investigation deadline
    pub fn remaining(&self) -> Duration {
        self.deadline
            .saturating_duration_since(tokio::time::Instant::now())
    }

    /// Per-call budget: the adapter timeout, clamped by what is left of the
    /// investigation deadline.
    pub fn call_budget(&self) -> Duration {
        let remaining = self
            .deadline
            .saturating_duration_since(tokio::time::Instant::now());
        self.adapter_timeout.min(remaining)
    }

    /// Emit a per-step log event, ordered after `investigation_started`
    pub fn log_step(&self, report_id: &str, index: usize, name: &str, status: StepStatus) {
        let level = match status {
            StepStatus::Failed => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        self.bus.log(
            level,
            "investigator",
            "investigation_step",
            Some(serde_json::json!({
                "report_id": report_id,
                "step_index": index,
                "step": name,
                "status": match status {
                    StepStatus::Completed => "completed",
                    StepStatus::Skipped => "skipped",
                    StepStatus::Failed => "failed",
                },
            })),
        );
    }
}

/// An investigation strategy.
///
/// `investigate` returns the terminal status the run earned on its own;
/// the scheduler may override it with `cancelled` or `timed_out`.
#[async_trait]
pub trait Investigator: Send + Sync {
    fn mode(&self) -> InvestigationMode;

    async fn investigate(&self, ctx: &InvestigationContext, report: &SharedReport) -> ReportStatus;
}
