//! Cluster status command

use crate::client::{ApiClient, MonitorStatusView};
use crate::output::{self, OutputFormat};
use anyhow::Result;

pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: MonitorStatusView = client.get("/api/monitoring/status").await?;

    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!(
        "Cluster status: {}  ({} issue(s) tracked)",
        output::colored_status(&status.status),
        status.issues_count
    );
    println!(
        "  nodes: {}/{} ready | pods: {} running, {} pending of {}",
        status.nodes_ready,
        status.nodes_total,
        status.pods_running,
        status.pods_pending,
        status.pods_total
    );
    if let Some(id) = &status.last_investigation_id {
        println!("  last investigation: {id}");
    }

    Ok(())
}
