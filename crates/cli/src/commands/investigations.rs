//! Investigation commands: list, show, start, cancel

use crate::client::{ApiClient, ReportView, StartInvestigationBody, StartedView};
use crate::output::{self, OutputFormat};
use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

#[derive(Tabled, Serialize)]
struct InvestigationRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "MODE")]
    mode: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "STARTED")]
    started: String,
    #[tabled(rename = "DURATION")]
    duration: String,
    #[tabled(rename = "FINDINGS")]
    findings: usize,
}

pub async fn list(client: &ApiClient, limit: usize, format: OutputFormat) -> Result<()> {
    let reports: Vec<ReportView> = client
        .get(&format!("/api/investigations?limit={limit}"))
        .await?;

    let rows: Vec<InvestigationRow> = reports
        .into_iter()
        .map(|report| InvestigationRow {
            id: report.id,
            mode: report.mode,
            status: output::colored_status(&report.status),
            started: report.started_at,
            duration: output::format_duration_ms(report.duration_ms),
            findings: report.findings.len(),
        })
        .collect();

    output::print_table(&rows, format);
    Ok(())
}

pub async fn show(client: &ApiClient, id: &str, format: OutputFormat) -> Result<()> {
    let report: ReportView = client.get(&format!("/api/investigations/{id}")).await?;

    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{} [{}] {}",
        report.id,
        report.mode,
        output::colored_status(&report.status)
    );
    if !report.executive_summary.is_empty() {
        println!("{}", report.executive_summary);
    }
    println!();

    if report.findings.is_empty() {
        println!("No findings.");
    } else {
        println!("Findings:");
        for finding in &report.findings {
            println!(
                "  [{}] {} ({})",
                output::colored_severity(&finding.severity),
                finding.title,
                finding.category
            );
        }
    }

    if !report.recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for (index, recommendation) in report.recommendations.iter().enumerate() {
            println!("  {}. {}", index + 1, recommendation);
        }
    }

    println!();
    println!("Steps:");
    for step in &report.steps {
        let line = format!(
            "  {}. {} - {} in {}",
            step.index,
            step.name,
            step.status,
            output::format_duration_ms(step.duration_ms)
        );
        match &step.error {
            Some(error) => println!("{line} ({error})"),
            None => println!("{line}"),
        }
    }

    Ok(())
}

pub async fn start(
    client: &ApiClient,
    agentic: bool,
    namespace: Option<String>,
    fingerprint: Option<String>,
    timeout_sec: Option<u64>,
) -> Result<()> {
    let path = if agentic {
        "/api/investigations/agentic"
    } else {
        "/api/investigations/deterministic"
    };
    let body = StartInvestigationBody {
        namespace,
        issue_fingerprint: fingerprint,
        timeout_sec,
    };

    let started: StartedView = client.post(path, &body).await?;
    output::print_success(&format!("Investigation {} is {}", started.id, started.status));
    Ok(())
}

pub async fn cancel(client: &ApiClient, id: &str) -> Result<()> {
    client
        .post_empty(&format!("/api/investigations/{id}/cancel"))
        .await?;
    output::print_success(&format!("Cancelled {id}"));
    Ok(())
}
