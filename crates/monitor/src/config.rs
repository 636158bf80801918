//! Monitor configuration
//!
//! Every key can be set through the environment with the `MONITOR_` prefix,
//! e.g. `MONITOR_CHECK_INTERVAL_SECS=10`.

use anyhow::{Context, Result};
use monitor_lib::scheduler::SchedulerConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// API server port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Snapshotter period in seconds (floor of 5)
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Per-fingerprint suppression after an emission, in seconds
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Consecutive snapshots required before a non-critical issue emits
    #[serde(default = "default_debounce_k")]
    pub debounce_k: u32,

    /// Global cap on concurrently running investigations
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_investigations: usize,

    /// Per-investigation deadline in seconds
    #[serde(default = "default_investigation_timeout")]
    pub investigation_timeout_secs: u64,

    /// Per-adapter-call deadline in seconds
    #[serde(default = "default_adapter_timeout")]
    pub adapter_timeout_secs: u64,

    /// Per-LLM-call deadline in seconds
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_secs: u64,

    /// Iteration cap for the agentic plan-act loop
    #[serde(default = "default_agentic_max_iterations")]
    pub agentic_max_iterations: usize,

    /// Disables the LLM adapter entirely; agentic requests are rejected
    #[serde(default = "default_safe_mode")]
    pub safe_mode: bool,

    /// In-memory report archive cap
    #[serde(default = "default_report_archive_size")]
    pub report_archive_size: usize,

    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,

    #[serde(default = "default_knowledge_dir")]
    pub knowledge_dir: PathBuf,

    #[serde(default = "default_kubectl_path")]
    pub kubectl_path: String,

    #[serde(default = "default_k8sgpt_path")]
    pub k8sgpt_path: String,
}

fn default_api_port() -> u16 {
    8080
}

fn default_check_interval() -> u64 {
    30
}

fn default_cooldown() -> u64 {
    300
}

fn default_debounce_k() -> u32 {
    2
}

fn default_max_concurrent() -> usize {
    2
}

fn default_investigation_timeout() -> u64 {
    120
}

fn default_adapter_timeout() -> u64 {
    10
}

fn default_llm_timeout() -> u64 {
    20
}

fn default_agentic_max_iterations() -> usize {
    6
}

fn default_safe_mode() -> bool {
    true
}

fn default_report_archive_size() -> usize {
    500
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("./reports")
}

fn default_knowledge_dir() -> PathBuf {
    PathBuf::from("./knowledge")
}

fn default_kubectl_path() -> String {
    "kubectl".to_string()
}

fn default_k8sgpt_path() -> String {
    "k8sgpt".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        // serde fills every field from its default fn
        serde_json::from_value(serde_json::json!({}))
            .expect("default configuration must deserialize")
    }
}

impl MonitorConfig {
    /// Load configuration from the environment. A malformed value is a
    /// fatal configuration error.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("MONITOR"))
            .build()
            .context("building configuration")?;

        config
            .try_deserialize()
            .context("invalid monitor configuration")
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: self.max_concurrent_investigations,
            investigation_timeout: Duration::from_secs(self.investigation_timeout_secs),
            grace: Duration::from_secs(2),
            cooldown: self.cooldown(),
            safe_mode: self.safe_mode,
            adapter_timeout: self.adapter_timeout(),
            agentic_max_iterations: self.agentic_max_iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = MonitorConfig::default();
        assert_eq!(config.check_interval_secs, 30);
        assert_eq!(config.cooldown_secs, 300);
        assert_eq!(config.debounce_k, 2);
        assert_eq!(config.max_concurrent_investigations, 2);
        assert_eq!(config.investigation_timeout_secs, 120);
        assert_eq!(config.adapter_timeout_secs, 10);
        assert_eq!(config.llm_timeout_secs, 20);
        assert_eq!(config.agentic_max_iterations, 6);
        assert!(config.safe_mode);
        assert_eq!(config.report_archive_size, 500);
        assert_eq!(config.reports_dir, PathBuf::from("./reports"));
        assert_eq!(config.knowledge_dir, PathBuf::from("./knowledge"));
    }

    #[test]
    fn test_scheduler_config_mirrors_settings() {
        let mut config = MonitorConfig::default();
        config.max_concurrent_investigations = 4;
        config.safe_mode = false;

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.max_concurrent, 4);
        assert!(!scheduler.safe_mode);
        assert_eq!(scheduler.investigation_timeout, Duration::from_secs(120));
    }
}
