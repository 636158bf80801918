//! Report construction, persistence and retrieval

mod render;
mod store;

pub use render::render_text;
pub use store::{ReportStore, SealOutcome};

use crate::models::{
    ClusterSummary, Finding, InvestigationMode, InvestigationReport, ReportStatus, Severity,
    StepRecord, StepStatus,
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// Mutable accumulation of one investigation run.
///
/// Shared between the investigator (which appends findings and steps) and
/// the scheduler (which can seal a partial report on timeout or cancel).
pub struct ReportBuilder {
    id: String,
    mode: InvestigationMode,
    started_at: DateTime<Utc>,
    triggering_fingerprints: Vec<String>,
    cluster_summary: ClusterSummary,
    findings: Vec<Finding>,
    steps: Vec<StepRecord>,
    executive_summary: String,
}

pub type SharedReport = Arc<Mutex<ReportBuilder>>;

impl ReportBuilder {
    pub fn new(
        id: String,
        mode: InvestigationMode,
        started_at: DateTime<Utc>,
        triggering_fingerprints: Vec<String>,
    ) -> SharedReport {
        Arc::new(Mutex::new(Self {
            id,
            mode,
            started_at,
            triggering_fingerprints,
            cluster_summary: ClusterSummary::default(),
            findings: Vec::new(),
            steps: Vec::new(),
            executive_summary: String::new(),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> InvestigationMode {
        self.mode
    }

    pub fn add_finding(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    pub fn record_step(
        &mut self,
        name: &str,
        status: StepStatus,
        duration_ms: u64,
        error: Option<String>,
    ) -> usize {
        let index = self.steps.len() + 1;
        self.steps.push(StepRecord {
            index,
            name: name.to_string(),
            status,
            duration_ms,
            error,
        });
        index
    }

    pub fn set_cluster_summary(&mut self, summary: ClusterSummary) {
        self.cluster_summary = summary;
    }

    pub fn set_executive_summary(&mut self, summary: String) {
        self.executive_summary = summary;
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn severity_counts(&self) -> (usize, usize) {
        let critical = self
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Critical)
            .count();
        let high = self
            .findings
            .iter()
            .filter(|f| f.severity == Severity::High)
            .count();
        (critical, high)
    }

    /// Deduplicated recommendations, ordered by finding severity and then by
    /// how often the same `(category, title)` pair occurred.
    pub fn prioritized_recommendations(&self) -> Vec<String> {
        use std::collections::HashMap;

        let mut occurrences: HashMap<(&str, &str), usize> = HashMap::new();
        for finding in &self.findings {
            *occurrences
                .entry((finding.category.as_str(), finding.title.as_str()))
                .or_default() += 1;
        }

        let mut ranked: Vec<&Finding> = {
            let mut seen = std::collections::HashSet::new();
            self.findings
                .iter()
                .filter(|f| seen.insert((f.category, f.title.clone())))
                .collect()
        };
        ranked.sort_by(|a, b| {
            a.severity.rank().cmp(&b.severity.rank()).then_with(|| {
                let count_a = occurrences[&(a.category.as_str(), a.title.as_str())];
                let count_b = occurrences[&(b.category.as_str(), b.title.as_str())];
                count_b.cmp(&count_a)
            })
        });

        let mut recommendations = Vec::new();
        for finding in ranked {
            for recommendation in &finding.recommendations {
                if !recommendations.contains(recommendation) {
                    recommendations.push(recommendation.clone());
                }
            }
        }
        recommendations
    }

    /// Produce the outcome used to seal this run
    pub fn outcome(&self, status: ReportStatus, finished_at: DateTime<Utc>) -> SealOutcome {
        SealOutcome {
            status,
            finished_at,
            cluster_summary: self.cluster_summary.clone(),
            findings: self.findings.clone(),
            executive_summary: self.executive_summary.clone(),
            recommendations: self.prioritized_recommendations(),
            steps: self.steps.clone(),
        }
    }

    /// The in-progress report as stored at dispatch time
    pub fn initial_report(&self) -> InvestigationReport {
        InvestigationReport {
            id: self.id.clone(),
            mode: self.mode,
            triggering_fingerprints: self.triggering_fingerprints.clone(),
            started_at: self.started_at,
            finished_at: None,
            duration_ms: 0,
            cluster_summary: self.cluster_summary.clone(),
            findings: Vec::new(),
            executive_summary: String::new(),
            recommendations: Vec::new(),
            steps: Vec::new(),
            status: ReportStatus::InProgress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FindingCategory, SourceTool};

    fn finding(severity: Severity, title: &str, recommendation: &str) -> Finding {
        Finding {
            category: FindingCategory::PodFailures,
            severity,
            title: title.to_string(),
            description: String::new(),
            affected_resources: vec![],
            recommendations: vec![recommendation.to_string()],
            evidence: vec![],
            source_tool: SourceTool::Cluster,
        }
    }

    #[test]
    fn test_steps_are_indexed_in_order() {
        let shared = ReportBuilder::new(
            "det_000001".to_string(),
            InvestigationMode::Deterministic,
            Utc::now(),
            vec![],
        );
        let mut builder = shared.lock().unwrap();
        builder.record_step("cluster_overview", StepStatus::Completed, 5, None);
        builder.record_step("node_analysis", StepStatus::Failed, 9, Some("boom".to_string()));

        let outcome = builder.outcome(ReportStatus::Completed, Utc::now());
        assert_eq!(outcome.steps[0].index, 1);
        assert_eq!(outcome.steps[1].index, 2);
        assert_eq!(outcome.steps[1].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_recommendations_deduped_and_ordered_by_severity() {
        let shared = ReportBuilder::new(
            "det_000001".to_string(),
            InvestigationMode::Deterministic,
            Utc::now(),
            vec![],
        );
        let mut builder = shared.lock().unwrap();
        builder.add_finding(finding(Severity::Medium, "medium issue", "fix medium"));
        builder.add_finding(finding(Severity::Critical, "critical issue", "fix critical"));
        builder.add_finding(finding(Severity::Critical, "critical issue", "fix critical"));

        let recommendations = builder.prioritized_recommendations();
        assert_eq!(recommendations, vec!["fix critical".to_string(), "fix medium".to_string()]);
    }

    #[test]
    fn test_severity_counts() {
        let shared = ReportBuilder::new(
            "agt_000001".to_string(),
            InvestigationMode::Agentic,
            Utc::now(),
            vec![],
        );
        let mut builder = shared.lock().unwrap();
        builder.add_finding(finding(Severity::Critical, "a", "r"));
        builder.add_finding(finding(Severity::High, "b", "r"));
        builder.add_finding(finding(Severity::High, "c", "r"));

        assert_eq!(builder.severity_counts(), (1, 2));
    }
}
