//! Report projection commands

use crate::client::ApiClient;
use anyhow::Result;

/// Print the rendered text projection of a persisted report
pub async fn show(client: &ApiClient, filename: &str) -> Result<()> {
    let text = client.get_text(&format!("/api/reports/{filename}")).await?;
    print!("{text}");
    Ok(())
}
