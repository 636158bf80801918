//! Kubernetes Investigation Monitor CLI
//!
//! A command-line tool for checking cluster status, driving investigations
//! and reading reports from a running investigation monitor.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{investigations, reports, status, watch};

/// Kubernetes Investigation Monitor CLI
#[derive(Parser)]
#[command(name = "kim")]
#[command(author, version, about = "CLI for the Kubernetes Investigation Monitor", long_about = None)]
pub struct Cli {
    /// Monitor API URL (can also be set via KIM_API_URL env var)
    #[arg(long, env = "KIM_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the current cluster status heartbeat
    Status,

    /// Work with investigations
    #[command(subcommand)]
    Investigations(InvestigationCommands),

    /// Print the text projection of a persisted report
    Report {
        /// Persisted report file name, e.g. deterministic_20250601_101500_det_000001.txt
        filename: String,
    },

    /// Follow a live stream (logs, status or reports)
    Watch {
        /// Stream name: logs, status or reports
        #[arg(default_value = "logs")]
        stream: String,
    },
}

#[derive(Subcommand)]
pub enum InvestigationCommands {
    /// List recent investigations, newest first
    List {
        /// Maximum number of investigations to show
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },

    /// Show one investigation in detail
    Show {
        /// Investigation id, e.g. det_000042
        id: String,
    },

    /// Start a new investigation
    Start {
        /// Use the knowledge-augmented agentic investigator
        #[arg(long)]
        agentic: bool,

        /// Restrict the investigation to one namespace
        #[arg(long, short)]
        namespace: Option<String>,

        /// Target a known issue fingerprint
        #[arg(long)]
        fingerprint: Option<String>,

        /// Override the investigation timeout in seconds
        #[arg(long)]
        timeout_sec: Option<u64>,
    },

    /// Cancel a running investigation
    Cancel {
        /// Investigation id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Status => {
            status::show_status(&client, cli.format).await?;
        }
        Commands::Investigations(command) => match command {
            InvestigationCommands::List { limit } => {
                investigations::list(&client, limit, cli.format).await?;
            }
            InvestigationCommands::Show { id } => {
                investigations::show(&client, &id, cli.format).await?;
            }
            InvestigationCommands::Start {
                agentic,
                namespace,
                fingerprint,
                timeout_sec,
            } => {
                investigations::start(&client, agentic, namespace, fingerprint, timeout_sec)
                    .await?;
            }
            InvestigationCommands::Cancel { id } => {
                investigations::cancel(&client, &id).await?;
            }
        },
        Commands::Report { filename } => {
            reports::show(&client, &filename).await?;
        }
        Commands::Watch { stream } => {
            watch::follow(&client, &stream).await?;
        }
    }

    Ok(())
}
