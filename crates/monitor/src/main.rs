//! Autonomous Kubernetes investigation monitor
//!
//! Observes a cluster, classifies anomalies, runs bounded investigations
//! and serves reports plus live streams over HTTP.

use anyhow::{Context, Result};
use monitor::api::{self, AppState};
use monitor::config::MonitorConfig;
use monitor_lib::adapters::{
    DisabledLlm, HttpLlm, K8sgptAnalyzer, KubectlCluster, LlmAdapter, LlmConfig, LocalFilesystem,
    SystemClock,
};
use monitor_lib::detector::IssueDetector;
use monitor_lib::health::components;
use monitor_lib::knowledge::KnowledgeIndex;
use monitor_lib::{
    EventBus, HealthRegistry, InvestigationScheduler, MonitorMetrics, MonitorState, ReportStore,
    Snapshotter,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = MONITOR_VERSION, "starting investigation monitor");

    let config = MonitorConfig::load()?;
    info!(
        check_interval_secs = config.check_interval_secs,
        safe_mode = config.safe_mode,
        "monitor configured"
    );

    let bus = EventBus::new();
    let _metrics = MonitorMetrics::new();
    let state = Arc::new(MonitorState::new());
    let fs = Arc::new(LocalFilesystem);

    let health = HealthRegistry::new();
    health.register(components::SNAPSHOTTER).await;
    health.register(components::DETECTOR).await;
    health.register(components::SCHEDULER).await;
    health.register(components::REPORT_STORE).await;
    health.register(components::BUS).await;
    health.register(components::KNOWLEDGE).await;

    // The advisory lock makes a second monitor on the same reports
    // directory a startup failure.
    let store = Arc::new(
        ReportStore::open(
            config.reports_dir.clone(),
            config.report_archive_size,
            fs.clone(),
            bus.clone(),
        )
        .context("opening report store")?,
    );

    let knowledge = Arc::new(
        KnowledgeIndex::load(&config.knowledge_dir, fs.as_ref())
            .context("loading knowledge corpus")?,
    );
    info!(
        documents = knowledge.document_count(),
        "knowledge corpus loaded"
    );
    if knowledge.is_empty() {
        // Agentic runs still work but can only produce knowledge gaps
        health
            .set_degraded(components::KNOWLEDGE, "knowledge corpus is empty")
            .await;
    }

    let cluster = Arc::new(KubectlCluster::new(
        config.kubectl_path.clone(),
        config.adapter_timeout(),
    ));
    let analyzer = Arc::new(K8sgptAnalyzer::new(
        config.k8sgpt_path.clone(),
        config.adapter_timeout(),
    ));
    let llm: Arc<dyn LlmAdapter> = if config.safe_mode {
        Arc::new(DisabledLlm)
    } else {
        Arc::new(HttpLlm::new(
            std::env::var("MONITOR_LLM_API_KEY").ok(),
            LlmConfig {
                call_timeout: config.llm_timeout(),
                ..LlmConfig::default()
            },
        ))
    };

    let (shutdown_tx, _) = broadcast::channel(1);

    let clock = Arc::new(SystemClock);
    let (scheduler, issue_tx, scheduler_handle) = InvestigationScheduler::new(
        config.scheduler_config(),
        cluster.clone(),
        analyzer,
        llm,
        knowledge,
        store.clone(),
        bus.clone(),
        state.clone(),
        clock.clone(),
        health.clone(),
    );
    tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    let detector = IssueDetector::new(
        config.debounce_k,
        chrono::Duration::seconds(config.cooldown_secs as i64),
    );
    let snapshotter = Snapshotter::new(
        cluster,
        detector,
        bus.clone(),
        state.clone(),
        health.clone(),
        clock,
        issue_tx,
        config.check_interval(),
    );
    tokio::spawn(snapshotter.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(AppState {
        store,
        bus,
        monitor: state,
        scheduler: scheduler_handle,
        health: health.clone(),
        safe_mode: config.safe_mode,
    });
    health.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    info!("SIGINT received, shutting down");
    let _ = shutdown_tx.send(());
    api_handle.abort();

    Ok(())
}
