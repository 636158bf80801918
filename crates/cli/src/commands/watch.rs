//! Live stream commands

use crate::client::ApiClient;
use anyhow::Result;

/// Follow one of the monitor streams, printing a JSON line per event.
/// Runs until the connection drops or the user interrupts.
pub async fn follow(client: &ApiClient, stream: &str) -> Result<()> {
    let path = match stream {
        "logs" => "/stream/logs",
        "status" => "/stream/status",
        "reports" => "/stream/reports",
        other => anyhow::bail!("unknown stream {other}, expected logs|status|reports"),
    };

    let mut response = client.stream(path).await?;
    let mut pending = Vec::new();

    while let Some(chunk) = response.chunk().await? {
        pending.extend_from_slice(&chunk);
        while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if !line.is_empty() {
                println!("{line}");
            }
        }
    }

    Ok(())
}
