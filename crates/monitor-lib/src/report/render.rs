//! Human-readable projection of a sealed report
//!
//! The JSON file is canonical; this rendering is a derived view and must
//! stay a pure function of the report.

use crate::models::{InvestigationReport, Severity, StepStatus};
use std::fmt::Write;

pub fn render_text(report: &InvestigationReport) -> String {
    let mut out = String::new();

    writeln!(out, "=== CLUSTER INVESTIGATION REPORT ===").unwrap();
    writeln!(out, "Id:      {}", report.id).unwrap();
    writeln!(out, "Mode:    {}", report.mode.as_str()).unwrap();
    writeln!(out, "Status:  {}", report.status.as_str()).unwrap();
    writeln!(out, "Started: {}", report.started_at.to_rfc3339()).unwrap();
    if let Some(finished) = report.finished_at {
        writeln!(out, "Finished: {} ({} ms)", finished.to_rfc3339(), report.duration_ms).unwrap();
    }
    if !report.triggering_fingerprints.is_empty() {
        writeln!(
            out,
            "Triggered by: {}",
            report.triggering_fingerprints.join(", ")
        )
        .unwrap();
    }
    writeln!(out).unwrap();

    if !report.executive_summary.is_empty() {
        writeln!(out, "{}", report.executive_summary).unwrap();
        writeln!(out).unwrap();
    }

    let summary = &report.cluster_summary;
    writeln!(out, "Cluster summary:").unwrap();
    writeln!(
        out,
        "  nodes {}/{} ready | pods {} running, {} pending, {} failed of {} | {} deployments | {} warning events",
        summary.nodes_ready,
        summary.nodes_total,
        summary.pods_running,
        summary.pods_pending,
        summary.pods_failed,
        summary.pods_total,
        summary.deployments,
        summary.events_warning,
    )
    .unwrap();
    writeln!(out).unwrap();

    writeln!(out, "Findings ({}):", report.findings.len()).unwrap();
    if report.findings.is_empty() {
        writeln!(out, "  none").unwrap();
    }
    for finding in &report.findings {
        let marker = match finding.severity {
            Severity::Critical => "!!",
            Severity::High => " !",
            _ => "  ",
        };
        writeln!(
            out,
            "{} [{}] {} ({})",
            marker,
            finding.severity,
            finding.title,
            finding.category.as_str()
        )
        .unwrap();
        if !finding.description.is_empty() {
            writeln!(out, "     {}", finding.description).unwrap();
        }
        for resource in finding.affected_resources.iter().take(5) {
            writeln!(out, "     affected: {resource}").unwrap();
        }
        for evidence in finding.evidence.iter().take(3) {
            writeln!(out, "     evidence: {evidence}").unwrap();
        }
    }
    writeln!(out).unwrap();

    if !report.recommendations.is_empty() {
        writeln!(out, "Recommendations:").unwrap();
        for (index, recommendation) in report.recommendations.iter().enumerate() {
            writeln!(out, "  {}. {}", index + 1, recommendation).unwrap();
        }
        writeln!(out).unwrap();
    }

    writeln!(out, "Steps:").unwrap();
    for step in &report.steps {
        let status = match step.status {
            StepStatus::Completed => "completed",
            StepStatus::Skipped => "skipped",
            StepStatus::Failed => "failed",
        };
        match &step.error {
            Some(error) => writeln!(
                out,
                "  {}. {} - {} in {} ms ({})",
                step.index, step.name, status, step.duration_ms, error
            )
            .unwrap(),
            None => writeln!(
                out,
                "  {}. {} - {} in {} ms",
                step.index, step.name, status, step.duration_ms
            )
            .unwrap(),
        }
    }

    writeln!(out, "=== END OF REPORT ===").unwrap();
    out
}
