//! In-memory report archive with filesystem persistence
//!
//! The store holds at most `capacity` reports; overflow evicts the oldest
//! sealed report, never one that is still in progress. Sealed reports are
//! also written as canonical JSON plus a text projection under the reports
//! directory, which is protected by an advisory process lock.

use super::render::render_text;
use crate::adapters::{FilesystemAdapter, ProcessLock};
use crate::bus::{EventBus, ReportEventKind};
use crate::models::{
    ClusterSummary, Finding, InvestigationMode, InvestigationReport, ReportStatus, StepRecord,
};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Terminal state handed to [`ReportStore::seal`]
#[derive(Debug, Clone)]
pub struct SealOutcome {
    pub status: ReportStatus,
    pub finished_at: DateTime<Utc>,
    pub cluster_summary: ClusterSummary,
    pub findings: Vec<Finding>,
    pub executive_summary: String,
    pub recommendations: Vec<String>,
    pub steps: Vec<StepRecord>,
}

struct StoreInner {
    // Creation order; listing walks it backwards
    reports: Vec<InvestigationReport>,
    next_seq: u64,
}

pub struct ReportStore {
    inner: Mutex<StoreInner>,
    fs: Arc<dyn FilesystemAdapter>,
    dir: PathBuf,
    capacity: usize,
    bus: EventBus,
    /// False while the last persistence attempt failed; surfaced in /healthz
    persist_ok: AtomicBool,
    _lock: ProcessLock,
}

impl ReportStore {
    /// Open the store, taking the advisory lock on the reports directory.
    /// A held lock means another monitor process owns this directory and is
    /// a fatal configuration error.
    pub fn open(
        dir: PathBuf,
        capacity: usize,
        fs: Arc<dyn FilesystemAdapter>,
        bus: EventBus,
    ) -> Result<Self> {
        let lock = fs
            .acquire_lock(&dir)
            .with_context(|| format!("acquiring reports lock in {}", dir.display()))?;

        Ok(Self {
            inner: Mutex::new(StoreInner {
                reports: Vec::new(),
                next_seq: 0,
            }),
            fs,
            dir,
            capacity: capacity.max(1),
            bus,
            persist_ok: AtomicBool::new(true),
            _lock: lock,
        })
    }

    /// True while reports are reaching disk; a write failure flips this
    /// until the next successful seal.
    pub fn persist_healthy(&self) -> bool {
        self.persist_ok.load(Ordering::Relaxed)
    }

    /// Allocate the next report id, e.g. `det_000007`
    pub fn next_id(&self, mode: InvestigationMode) -> String {
        let mut inner = self.inner.lock().unwrap();
        inner.next_seq += 1;
        format!("{}_{:06}", mode.prefix(), inner.next_seq)
    }

    /// Register an in-progress report at dispatch time
    pub fn create(&self, report: InvestigationReport) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.reports.push(report.clone());
            self.evict_overflow(&mut inner);
        }
        self.bus.publish_report(ReportEventKind::Created, report);
    }

    /// Atomically transition a report to a terminal status.
    ///
    /// Idempotent: sealing an already-sealed report is a no-op that returns
    /// the original terminal status.
    pub fn seal(&self, id: &str, outcome: SealOutcome) -> Result<ReportStatus> {
        if !outcome.status.is_terminal() {
            bail!("seal requires a terminal status, got {:?}", outcome.status);
        }

        let sealed = {
            let mut inner = self.inner.lock().unwrap();
            let Some(report) = inner.reports.iter_mut().find(|r| r.id == id) else {
                bail!("unknown report id {id}");
            };
            if report.status.is_terminal() {
                return Ok(report.status);
            }

            report.status = outcome.status;
            report.finished_at = Some(outcome.finished_at);
            report.duration_ms = (outcome.finished_at - report.started_at)
                .num_milliseconds()
                .max(0) as u64;
            report.cluster_summary = outcome.cluster_summary;
            report.findings = outcome.findings;
            report.executive_summary = outcome.executive_summary;
            report.recommendations = outcome.recommendations;
            report.steps = outcome.steps;
            report.clone()
        };

        self.persist(&sealed);
        self.bus.publish_report(ReportEventKind::Sealed, sealed.clone());
        {
            let mut inner = self.inner.lock().unwrap();
            self.evict_overflow(&mut inner);
        }
        Ok(sealed.status)
    }

    /// Copy-on-read lookup
    pub fn get(&self, id: &str) -> Option<InvestigationReport> {
        let inner = self.inner.lock().unwrap();
        inner.reports.iter().find(|r| r.id == id).cloned()
    }

    /// Newest first, optionally filtered by mode
    pub fn list(&self, limit: usize, mode: Option<InvestigationMode>) -> Vec<InvestigationReport> {
        let inner = self.inner.lock().unwrap();
        inner
            .reports
            .iter()
            .rev()
            .filter(|r| mode.is_none_or(|m| r.mode == m))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// File stem for a sealed report, `{mode}_{yyyymmdd_hhmmss}_{id}`
    pub fn file_stem(report: &InvestigationReport) -> String {
        let stamp = report
            .finished_at
            .unwrap_or(report.started_at)
            .format("%Y%m%d_%H%M%S");
        format!("{}_{}_{}", report.mode.as_str(), stamp, report.id)
    }

    /// Read a persisted projection or report by file name
    pub fn read_file(&self, file_name: &str) -> Option<Vec<u8>> {
        // Reject path traversal outright
        if file_name.contains('/') || file_name.contains("..") {
            return None;
        }
        self.fs.read(&self.dir.join(file_name)).ok()
    }

    fn persist(&self, report: &InvestigationReport) {
        let stem = Self::file_stem(report);
        let mut ok = true;

        match serde_json::to_vec_pretty(report) {
            Ok(bytes) => {
                let path = self.dir.join(format!("{stem}.json"));
                if let Err(e) = self.fs.write_atomic(&path, &bytes) {
                    warn!(id = %report.id, error = %e, "failed to persist report json");
                    ok = false;
                }
            }
            Err(e) => {
                warn!(id = %report.id, error = %e, "failed to serialize report");
                ok = false;
            }
        }

        let text = render_text(report);
        let path = self.dir.join(format!("{stem}.txt"));
        if let Err(e) = self.fs.write_atomic(&path, text.as_bytes()) {
            warn!(id = %report.id, error = %e, "failed to persist report text");
            ok = false;
        }

        self.persist_ok.store(ok, Ordering::Relaxed);
    }

    fn evict_overflow(&self, inner: &mut StoreInner) {
        while inner.reports.len() > self.capacity {
            let Some(position) = inner.reports.iter().position(|r| r.status.is_terminal()) else {
                // Only in-progress reports left; never evict those.
                break;
            };
            let evicted = inner.reports.remove(position);
            info!(id = %evicted.id, "evicted oldest sealed report from archive");
            self.bus.log_info(
                "report_store",
                "report_evicted",
                Some(json!({"report_id": evicted.id})),
            );
        }
    }
}
