//! Investigation scheduler
//!
//! Owns the per-fingerprint state machine
//! (`idle → pending → running → cooldown → idle`), the global concurrency
//! cap, manual request queueing, cancellation and timeout enforcement. One
//! loop consumes issue batches from the detector, commands from the API,
//! and completion notices from investigation workers.

use crate::adapters::{AnalyzerAdapter, Clock, ClusterAdapter, LlmAdapter};
use crate::bus::EventBus;
use crate::cancel::{cancel_pair, CancelHandle};
use crate::health::{components, HealthRegistry};
use crate::investigator::{
    AgenticInvestigator, DeterministicInvestigator, InvestigationContext, Investigator,
};
use crate::knowledge::KnowledgeIndex;
use crate::models::{ClusterSnapshot, InvestigationMode, Issue, LogLevel, ReportStatus};
use crate::observability::MonitorMetrics;
use crate::report::{ReportBuilder, ReportStore, SharedReport};
use crate::state::MonitorState;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{info, warn};

/// Cap on the rate-limit cooldown multiplier
const MAX_COOLDOWN_MULTIPLIER: u32 = 8;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Global cap on concurrently running investigations
    pub max_concurrent: usize,
    pub investigation_timeout: Duration,
    /// Extra time an investigator gets to seal after cancel or timeout
    pub grace: Duration,
    /// Post-terminal suppression per fingerprint
    pub cooldown: Duration,
    pub safe_mode: bool,
    pub adapter_timeout: Duration,
    pub agentic_max_iterations: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            investigation_timeout: Duration::from_secs(120),
            grace: Duration::from_secs(2),
            cooldown: Duration::from_secs(300),
            safe_mode: true,
            adapter_timeout: Duration::from_secs(10),
            agentic_max_iterations: 6,
        }
    }
}

/// Mode requested over the API; `Auto` lets the scheduler decide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedMode {
    Auto,
    Deterministic,
    Agentic,
}

#[derive(Debug, Clone)]
pub struct InvestigationRequest {
    pub mode: RequestedMode,
    pub namespace: Option<String>,
    pub issue_fingerprint: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DispatchError {
    /// Agentic requested while `safeMode` is on
    SafeMode,
    /// Scheduler loop is gone
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Cancellation was delivered (or the run was dequeued)
    Accepted,
    /// The report already reached a terminal status; cancelling is a no-op
    AlreadyTerminal,
    NotFound,
}

enum SchedulerCommand {
    Investigate {
        request: InvestigationRequest,
        reply: oneshot::Sender<Result<String, DispatchError>>,
    },
    Cancel {
        id: String,
        reply: oneshot::Sender<CancelOutcome>,
    },
}

/// Cloneable API-side handle to the scheduler loop
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub async fn investigate(&self, request: InvestigationRequest) -> Result<String, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SchedulerCommand::Investigate { request, reply })
            .await
            .map_err(|_| DispatchError::Unavailable)?;
        rx.await.map_err(|_| DispatchError::Unavailable)?
    }

    pub async fn cancel(&self, id: &str) -> CancelOutcome {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(SchedulerCommand::Cancel {
                id: id.to_string(),
                reply,
            })
            .await
            .is_err()
        {
            return CancelOutcome::NotFound;
        }
        rx.await.unwrap_or(CancelOutcome::NotFound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Running,
    Cooldown,
}

struct FingerprintState {
    phase: Phase,
    issue: Issue,
    first_seen: DateTime<Utc>,
    cooldown_until: Option<DateTime<Utc>>,
    /// Set when new trigger events arrive while running or cooling down
    requeue: bool,
    cooldown_multiplier: u32,
}

struct RunningInvestigation {
    fingerprint: Option<String>,
    cancel: CancelHandle,
    report: SharedReport,
    abort: AbortHandle,
}

struct QueuedManual {
    id: String,
    mode: InvestigationMode,
    namespace: Option<String>,
    issues: Vec<Issue>,
    timeout: Duration,
    report: SharedReport,
}

struct WorkerDone {
    id: String,
    status: ReportStatus,
    /// True when the investigator task panicked rather than returning
    panicked: bool,
}

pub struct InvestigationScheduler {
    config: SchedulerConfig,
    cluster: Arc<dyn ClusterAdapter>,
    analyzer: Arc<dyn AnalyzerAdapter>,
    llm: Arc<dyn LlmAdapter>,
    knowledge: Arc<KnowledgeIndex>,
    store: Arc<ReportStore>,
    bus: EventBus,
    state: Arc<MonitorState>,
    clock: Arc<dyn Clock>,
    health: HealthRegistry,
    metrics: MonitorMetrics,

    issue_rx: mpsc::Receiver<Vec<Issue>>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    done_tx: mpsc::Sender<WorkerDone>,
    done_rx: mpsc::Receiver<WorkerDone>,

    fingerprints: HashMap<String, FingerprintState>,
    running: HashMap<String, RunningInvestigation>,
    manual_queue: VecDeque<QueuedManual>,
}

#[allow(clippy::too_many_arguments)]
impl InvestigationScheduler {
    /// Build the scheduler plus the issue-batch sender (for the snapshotter)
    /// and the command handle (for the API).
    pub fn new(
        config: SchedulerConfig,
        cluster: Arc<dyn ClusterAdapter>,
        analyzer: Arc<dyn AnalyzerAdapter>,
        llm: Arc<dyn LlmAdapter>,
        knowledge: Arc<KnowledgeIndex>,
        store: Arc<ReportStore>,
        bus: EventBus,
        state: Arc<MonitorState>,
        clock: Arc<dyn Clock>,
        health: HealthRegistry,
    ) -> (Self, mpsc::Sender<Vec<Issue>>, SchedulerHandle) {
        let (issue_tx, issue_rx) = mpsc::channel(64);
        let (command_tx, command_rx) = mpsc::channel(16);
        let (done_tx, done_rx) = mpsc::channel(16);

        let scheduler = Self {
            config,
            cluster,
            analyzer,
            llm,
            knowledge,
            store,
            bus,
            state,
            clock,
            health,
            metrics: MonitorMetrics::new(),
            issue_rx,
            command_rx,
            done_tx,
            done_rx,
            fingerprints: HashMap::new(),
            running: HashMap::new(),
            manual_queue: VecDeque::new(),
        };

        (scheduler, issue_tx, SchedulerHandle { tx: command_tx })
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            max_concurrent = self.config.max_concurrent,
            safe_mode = self.config.safe_mode,
            "starting investigation scheduler"
        );

        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                Some(batch) = self.issue_rx.recv() => self.handle_batch(batch),
                Some(command) = self.command_rx.recv() => self.handle_command(command),
                Some(done) = self.done_rx.recv() => self.handle_done(done).await,
                _ = tick.tick() => {}
                _ = shutdown.recv() => {
                    info!("shutting down investigation scheduler");
                    for (_, run) in self.running.iter() {
                        run.cancel.cancel();
                    }
                    break;
                }
            }

            self.expire_cooldowns();
            self.dispatch_ready();
        }
    }

    fn handle_batch(&mut self, batch: Vec<Issue>) {
        let now = self.clock.now();
        for issue in batch {
            match self.fingerprints.get_mut(&issue.fingerprint) {
                None => {
                    self.fingerprints.insert(
                        issue.fingerprint.clone(),
                        FingerprintState {
                            phase: Phase::Pending,
                            first_seen: now,
                            issue,
                            cooldown_until: None,
                            requeue: false,
                            cooldown_multiplier: 1,
                        },
                    );
                }
                Some(state) => {
                    state.issue = issue;
                    match state.phase {
                        Phase::Pending => {}
                        // Honored once the current run and cooldown finish
                        Phase::Running | Phase::Cooldown => state.requeue = true,
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::Investigate { request, reply } => {
                let result = self.enqueue_manual(request);
                let _ = reply.send(result);
            }
            SchedulerCommand::Cancel { id, reply } => {
                let _ = reply.send(self.cancel_by_id(&id));
            }
        }
    }

    fn enqueue_manual(&mut self, request: InvestigationRequest) -> Result<String, DispatchError> {
        if request.mode == RequestedMode::Agentic && self.config.safe_mode {
            return Err(DispatchError::SafeMode);
        }

        let issues: Vec<Issue> = request
            .issue_fingerprint
            .as_deref()
            .and_then(|fp| self.fingerprints.get(fp))
            .map(|state| vec![state.issue.clone()])
            .unwrap_or_default();

        let mode = self.resolve_mode(request.mode, &issues);
        let id = self.store.next_id(mode);
        let fingerprints = issues.iter().map(|i| i.fingerprint.clone()).collect();
        let report = ReportBuilder::new(id.clone(), mode, self.clock.now(), fingerprints);
        self.store
            .create(report.lock().unwrap().initial_report());

        self.bus.log_info(
            "scheduler",
            "investigation_queued",
            Some(json!({"report_id": id, "mode": mode.as_str()})),
        );

        // Manual requests bypass debouncing but still respect the global
        // cap by queueing FIFO.
        self.manual_queue.push_back(QueuedManual {
            id: id.clone(),
            mode,
            namespace: request.namespace,
            issues,
            timeout: request.timeout.unwrap_or(self.config.investigation_timeout),
            report,
        });

        Ok(id)
    }

    fn cancel_by_id(&mut self, id: &str) -> CancelOutcome {
        if let Some(run) = self.running.get(id) {
            run.cancel.cancel();
            // Forcible stop if the investigator misses the grace period
            let abort = run.abort.clone();
            let grace = self.config.grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                abort.abort();
            });
            return CancelOutcome::Accepted;
        }

        if let Some(position) = self.manual_queue.iter().position(|q| q.id == id) {
            let queued = self.manual_queue.remove(position).unwrap();
            let outcome = queued
                .report
                .lock()
                .unwrap()
                .outcome(ReportStatus::Cancelled, self.clock.now());
            if let Err(e) = self.store.seal(id, outcome) {
                warn!(id, error = %e, "failed to seal dequeued investigation");
            }
            return CancelOutcome::Accepted;
        }

        match self.store.get(id) {
            Some(report) if report.status.is_terminal() => CancelOutcome::AlreadyTerminal,
            Some(_) => CancelOutcome::Accepted,
            None => CancelOutcome::NotFound,
        }
    }

    /// Auto mode picks agentic only when the LLM is usable and the corpus
    /// has something to say about the issue.
    fn resolve_mode(&self, requested: RequestedMode, issues: &[Issue]) -> InvestigationMode {
        match requested {
            RequestedMode::Deterministic => InvestigationMode::Deterministic,
            RequestedMode::Agentic => InvestigationMode::Agentic,
            RequestedMode::Auto => {
                if self.config.safe_mode || !self.llm.enabled() {
                    return InvestigationMode::Deterministic;
                }
                let has_knowledge = match issues.first() {
                    Some(issue) => !self
                        .knowledge
                        .query(issue.kind.as_str(), 1)
                        .is_empty(),
                    None => !self.knowledge.is_empty(),
                };
                if has_knowledge {
                    InvestigationMode::Agentic
                } else {
                    InvestigationMode::Deterministic
                }
            }
        }
    }

    fn expire_cooldowns(&mut self) {
        let now = self.clock.now();
        self.fingerprints.retain(|_, state| {
            if state.phase != Phase::Cooldown {
                return true;
            }
            let expired = state.cooldown_until.is_none_or(|until| now >= until);
            if !expired {
                return true;
            }
            if state.requeue {
                state.phase = Phase::Pending;
                state.requeue = false;
                state.first_seen = now;
                true
            } else {
                // Back to idle
                false
            }
        });
    }

    fn dispatch_ready(&mut self) {
        while self.running.len() < self.config.max_concurrent {
            if let Some(manual) = self.manual_queue.pop_front() {
                self.spawn_manual(manual);
                continue;
            }

            // Highest severity first, ties by earliest first_seen
            let candidate = self
                .fingerprints
                .iter()
                .filter(|(_, state)| state.phase == Phase::Pending)
                .min_by(|(_, a), (_, b)| {
                    a.issue
                        .severity
                        .rank()
                        .cmp(&b.issue.severity.rank())
                        .then_with(|| a.first_seen.cmp(&b.first_seen))
                })
                .map(|(fingerprint, _)| fingerprint.clone());

            match candidate {
                Some(fingerprint) => self.spawn_for_fingerprint(&fingerprint),
                None => break,
            }
        }
    }

    fn spawn_for_fingerprint(&mut self, fingerprint: &str) {
        let Some(state) = self.fingerprints.get_mut(fingerprint) else {
            return;
        };
        state.phase = Phase::Running;
        let issue = state.issue.clone();

        let mode = self.resolve_mode(RequestedMode::Auto, std::slice::from_ref(&issue));
        let id = self.store.next_id(mode);
        let report = ReportBuilder::new(
            id.clone(),
            mode,
            self.clock.now(),
            vec![fingerprint.to_string()],
        );
        self.store.create(report.lock().unwrap().initial_report());

        let namespace = issue.target.namespace.clone();
        self.spawn_worker(
            id,
            mode,
            Some(fingerprint.to_string()),
            vec![issue],
            namespace,
            self.config.investigation_timeout,
            report,
        );
    }

    fn spawn_manual(&mut self, manual: QueuedManual) {
        let fingerprint = manual.issues.first().map(|i| i.fingerprint.clone());
        if let Some(fp) = &fingerprint {
            if let Some(state) = self.fingerprints.get_mut(fp) {
                if state.phase == Phase::Running {
                    // Fingerprint already has a running investigation; keep
                    // the single-run invariant and requeue instead.
                    state.requeue = true;
                    let outcome = manual
                        .report
                        .lock()
                        .unwrap()
                        .outcome(ReportStatus::Cancelled, self.clock.now());
                    if let Err(e) = self.store.seal(&manual.id, outcome) {
                        warn!(id = %manual.id, error = %e, "failed to seal duplicate manual run");
                    }
                    return;
                }
                state.phase = Phase::Running;
            }
        }

        self.spawn_worker(
            manual.id,
            manual.mode,
            fingerprint,
            manual.issues,
            manual.namespace,
            manual.timeout,
            manual.report,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_worker(
        &mut self,
        id: String,
        mode: InvestigationMode,
        fingerprint: Option<String>,
        issues: Vec<Issue>,
        namespace: Option<String>,
        timeout: Duration,
        report: SharedReport,
    ) {
        let (cancel_handle, cancel_token) = cancel_pair();
        let fingerprints: Vec<String> = issues.iter().map(|i| i.fingerprint.clone()).collect();

        self.bus.log_info(
            "scheduler",
            "investigation_started",
            Some(json!({
                "report_id": id,
                "mode": mode.as_str(),
                "issue_fingerprints": fingerprints,
            })),
        );

        let snapshot = self
            .state
            .snapshot()
            .unwrap_or_else(|| ClusterSnapshot::empty(self.clock.now()));

        let ctx = InvestigationContext {
            issues,
            namespace,
            snapshot,
            cluster: Arc::clone(&self.cluster),
            analyzer: Arc::clone(&self.analyzer),
            llm: Arc::clone(&self.llm),
            knowledge: Arc::clone(&self.knowledge),
            bus: self.bus.clone(),
            cancel: cancel_token,
            adapter_timeout: self.config.adapter_timeout,
            deadline: tokio::time::Instant::now() + timeout,
            max_iterations: self.config.agentic_max_iterations,
        };

        let investigator: Arc<dyn Investigator> = match mode {
            InvestigationMode::Deterministic => Arc::new(DeterministicInvestigator),
            InvestigationMode::Agentic => Arc::new(AgenticInvestigator),
        };

        let worker_report = Arc::clone(&report);
        let handle = tokio::spawn(async move {
            investigator.investigate(&ctx, &worker_report).await
        });
        let abort = handle.abort_handle();

        // Watcher: the investigator is expected to respect its deadline;
        // timeout + grace is the forcible backstop.
        let done_tx = self.done_tx.clone();
        let watcher_id = id.clone();
        let hard_stop = timeout + self.config.grace;
        tokio::spawn(async move {
            let mut handle = handle;
            let (status, panicked) = match tokio::time::timeout(hard_stop, &mut handle).await {
                Ok(Ok(status)) => (status, false),
                Ok(Err(join_error)) if join_error.is_cancelled() => {
                    (ReportStatus::Cancelled, false)
                }
                Ok(Err(_)) => (ReportStatus::Failed, true),
                Err(_) => {
                    handle.abort();
                    (ReportStatus::TimedOut, false)
                }
            };
            let _ = done_tx
                .send(WorkerDone {
                    id: watcher_id,
                    status,
                    panicked,
                })
                .await;
        });

        self.running.insert(
            id,
            RunningInvestigation {
                fingerprint,
                cancel: cancel_handle,
                report,
                abort,
            },
        );
        self.metrics
            .set_active_investigations(self.running.len() as i64);
    }

    async fn handle_done(&mut self, done: WorkerDone) {
        let Some(run) = self.running.remove(&done.id) else {
            return;
        };

        // A panicking investigator is a scheduler defect worth surfacing,
        // not just a failed report.
        if done.panicked {
            self.health
                .set_degraded(components::SCHEDULER, format!("investigator {} panicked", done.id))
                .await;
        } else {
            self.health.set_healthy(components::SCHEDULER).await;
        }

        // The worker may have been cancelled via the token without the
        // investigator noticing; prefer the explicit cancel status.
        let status = if run.cancel.is_cancelled() && done.status != ReportStatus::Failed {
            ReportStatus::Cancelled
        } else {
            done.status
        };

        let outcome = run.report.lock().unwrap().outcome(status, self.clock.now());
        let rate_limited = outcome
            .steps
            .iter()
            .any(|step| step.error.as_deref() == Some("rate_limited"));

        let sealed_status = match self.store.seal(&done.id, outcome) {
            Ok(status) => status,
            Err(e) => {
                warn!(id = %done.id, error = %e, "failed to seal report");
                status
            }
        };
        if self.store.persist_healthy() {
            self.health.set_healthy(components::REPORT_STORE).await;
        } else {
            self.health
                .set_unhealthy(components::REPORT_STORE, "report persistence is failing")
                .await;
        }

        let level = match sealed_status {
            ReportStatus::Failed | ReportStatus::TimedOut => LogLevel::Error,
            _ => LogLevel::Info,
        };
        self.bus.log(
            level,
            "scheduler",
            "investigation_finished",
            Some(json!({
                "report_id": done.id,
                "status": sealed_status.as_str(),
            })),
        );
        self.state.set_last_investigation(done.id.clone());
        self.metrics
            .set_active_investigations(self.running.len() as i64);
        if let Some(sealed) = self.store.get(&done.id) {
            self.metrics.observe_investigation(
                sealed.mode.as_str(),
                sealed.status.as_str(),
                sealed.duration_ms as f64 / 1000.0,
            );
        }

        if let Some(fingerprint) = run.fingerprint {
            if let Some(state) = self.fingerprints.get_mut(&fingerprint) {
                if rate_limited {
                    state.cooldown_multiplier =
                        (state.cooldown_multiplier * 2).min(MAX_COOLDOWN_MULTIPLIER);
                }
                let cooldown = self.config.cooldown * state.cooldown_multiplier;
                state.phase = Phase::Cooldown;
                state.cooldown_until = Some(
                    self.clock.now()
                        + chrono::Duration::from_std(cooldown)
                            .unwrap_or_else(|_| chrono::Duration::seconds(300)),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{async_trait, DisabledLlm};
    use crate::adapters::LocalFilesystem;
    use crate::cancel::CancelToken;
    use crate::error::{AdapterError, AdapterResult};
    use crate::models::{
        ContainerState, ContainerStatusInfo, Diagnostic, EventInfo, IssueKind, IssueTarget,
        NodeInfo, ObjectRef, PodInfo, PodPhase, Severity,
    };
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    struct StaticCluster;

    #[async_trait]
    impl ClusterAdapter for StaticCluster {
        async fn snapshot(&self, _cancel: &CancelToken) -> AdapterResult<ClusterSnapshot> {
            Ok(test_snapshot())
        }

        async fn pod_logs(
            &self,
            _cancel: &CancelToken,
            _namespace: &str,
            _name: &str,
            _tail_lines: usize,
        ) -> AdapterResult<String> {
            Ok(String::new())
        }

        async fn events(
            &self,
            _cancel: &CancelToken,
            _target: Option<&ObjectRef>,
        ) -> AdapterResult<Vec<EventInfo>> {
            Ok(vec![])
        }
    }

    /// Analyzer that sleeps, to keep investigations running for a while
    struct SlowAnalyzer {
        delay: Duration,
    }

    #[async_trait]
    impl AnalyzerAdapter for SlowAnalyzer {
        async fn scan(
            &self,
            cancel: &CancelToken,
            _namespace: Option<&str>,
        ) -> AdapterResult<Vec<Diagnostic>> {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => Ok(vec![]),
                _ = cancel.cancelled() => Err(AdapterError::Cancelled),
            }
        }
    }

    fn test_snapshot() -> ClusterSnapshot {
        ClusterSnapshot {
            nodes: vec![NodeInfo {
                name: "node-1".to_string(),
                ready: true,
                pressure: vec![],
            }],
            pods: vec![PodInfo {
                namespace: "frontend".to_string(),
                name: "broken-image-app-x".to_string(),
                controller: None,
                phase: PodPhase::Pending,
                containers: vec![ContainerStatusInfo {
                    name: "app".to_string(),
                    image: "nginx:nonexistent-tag".to_string(),
                    state: ContainerState::Waiting {
                        reason: "ImagePullBackOff".to_string(),
                        message: "Back-off pulling image".to_string(),
                    },
                    restart_count: 0,
                    init: false,
                }],
                labels: BTreeMap::new(),
                age_seconds: 300,
            }],
            ..ClusterSnapshot::empty(Utc::now())
        }
    }

    fn critical_issue(name: &str) -> Issue {
        let target = IssueTarget {
            kind: "Node".to_string(),
            namespace: None,
            name: name.to_string(),
            container: None,
        };
        Issue {
            kind: IssueKind::NodeNotReady,
            severity: Severity::Critical,
            fingerprint: crate::detector::fingerprint(IssueKind::NodeNotReady, &target, "NotReady"),
            target,
            evidence: vec![format!("node {name} not ready")],
            primary_reason: "NotReady".to_string(),
            observed_at: Utc::now(),
        }
    }

    struct Harness {
        issue_tx: mpsc::Sender<Vec<Issue>>,
        handle: SchedulerHandle,
        store: Arc<ReportStore>,
        health: HealthRegistry,
        _shutdown_tx: broadcast::Sender<()>,
        _dir: tempfile::TempDir,
    }

    fn start_scheduler(config: SchedulerConfig, analyzer_delay: Duration) -> Harness {
        let dir = tempdir().unwrap();
        let bus = EventBus::new();
        let store = Arc::new(
            ReportStore::open(
                dir.path().to_path_buf(),
                100,
                Arc::new(LocalFilesystem),
                bus.clone(),
            )
            .unwrap(),
        );
        let state = Arc::new(MonitorState::new());
        state.set_snapshot(test_snapshot());
        let health = HealthRegistry::new();

        let (scheduler, issue_tx, handle) = InvestigationScheduler::new(
            config,
            Arc::new(StaticCluster),
            Arc::new(SlowAnalyzer {
                delay: analyzer_delay,
            }),
            Arc::new(DisabledLlm),
            Arc::new(KnowledgeIndex::empty()),
            Arc::clone(&store),
            bus,
            state,
            Arc::new(crate::adapters::SystemClock),
            health.clone(),
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(scheduler.run(shutdown_rx));

        Harness {
            issue_tx,
            handle,
            store,
            health,
            _shutdown_tx: shutdown_tx,
            _dir: dir,
        }
    }

    async fn wait_until<F>(deadline: Duration, mut check: F)
    where
        F: FnMut() -> bool,
    {
        let start = tokio::time::Instant::now();
        while !check() {
            assert!(
                start.elapsed() < deadline,
                "condition not reached within {deadline:?}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrency_cap_holds_with_three_critical_issues() {
        let config = SchedulerConfig {
            max_concurrent: 2,
            cooldown: Duration::from_secs(600),
            ..SchedulerConfig::default()
        };
        let harness = start_scheduler(config, Duration::from_millis(300));

        let issues = vec![
            critical_issue("node-a"),
            critical_issue("node-b"),
            critical_issue("node-c"),
        ];
        harness.issue_tx.send(issues).await.unwrap();

        // While runs are in flight the cap must hold
        wait_until(Duration::from_secs(5), || harness.store.len() >= 2).await;
        for _ in 0..10 {
            let in_progress = harness
                .store
                .list(100, None)
                .into_iter()
                .filter(|r| r.status == ReportStatus::InProgress)
                .count();
            assert!(in_progress <= 2, "cap violated: {in_progress} running");
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        // Eventually all three complete, each exactly once
        wait_until(Duration::from_secs(10), || {
            harness
                .store
                .list(100, None)
                .iter()
                .filter(|r| r.status == ReportStatus::Completed)
                .count()
                == 3
        })
        .await;

        let reports = harness.store.list(100, None);
        assert_eq!(reports.len(), 3);
        let mut fingerprints: Vec<String> = reports
            .iter()
            .flat_map(|r| r.triggering_fingerprints.clone())
            .collect();
        fingerprints.sort();
        fingerprints.dedup();
        assert_eq!(fingerprints.len(), 3, "a fingerprint ran twice");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_one_running_investigation_per_fingerprint() {
        let config = SchedulerConfig {
            max_concurrent: 4,
            cooldown: Duration::from_secs(600),
            ..SchedulerConfig::default()
        };
        let harness = start_scheduler(config, Duration::from_millis(300));

        let issue = critical_issue("node-a");
        harness.issue_tx.send(vec![issue.clone()]).await.unwrap();
        harness.issue_tx.send(vec![issue.clone()]).await.unwrap();
        harness.issue_tx.send(vec![issue]).await.unwrap();

        wait_until(Duration::from_secs(5), || !harness.store.is_empty()).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Repeated triggers for the same fingerprint set the requeue flag
        // instead of dispatching a second run.
        assert_eq!(harness.store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_seals_timed_out_with_partial_steps() {
        let config = SchedulerConfig {
            max_concurrent: 2,
            investigation_timeout: Duration::from_millis(200),
            grace: Duration::from_millis(200),
            ..SchedulerConfig::default()
        };
        let harness = start_scheduler(config, Duration::from_secs(5));

        harness
            .issue_tx
            .send(vec![critical_issue("node-a")])
            .await
            .unwrap();

        wait_until(Duration::from_secs(5), || {
            harness
                .store
                .list(10, None)
                .first()
                .map(|r| r.status == ReportStatus::TimedOut)
                .unwrap_or(false)
        })
        .await;

        let report = harness.store.list(10, None).remove(0);
        let analyzer_step = report
            .steps
            .iter()
            .find(|s| s.name == "analyzer_scan")
            .expect("analyzer step recorded before sealing");
        assert_eq!(analyzer_step.error.as_deref(), Some("adapter_timeout"));
        assert!(report
            .steps
            .iter()
            .take_while(|s| s.name != "analyzer_scan")
            .all(|s| s.status != crate::models::StepStatus::Failed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_running_investigation() {
        let config = SchedulerConfig {
            max_concurrent: 2,
            investigation_timeout: Duration::from_secs(30),
            ..SchedulerConfig::default()
        };
        let harness = start_scheduler(config, Duration::from_secs(10));

        let id = harness
            .handle
            .investigate(InvestigationRequest {
                mode: RequestedMode::Deterministic,
                namespace: None,
                issue_fingerprint: None,
                timeout: None,
            })
            .await
            .unwrap();

        wait_until(Duration::from_secs(5), || harness.store.get(&id).is_some()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = harness.handle.cancel(&id).await;
        assert_eq!(outcome, CancelOutcome::Accepted);

        wait_until(Duration::from_secs(5), || {
            harness.store.get(&id).unwrap().status == ReportStatus::Cancelled
        })
        .await;

        // Cancelling a terminal run is a no-op
        let again = harness.handle.cancel(&id).await;
        assert_eq!(again, CancelOutcome::AlreadyTerminal);
    }

    #[tokio::test]
    async fn test_cancel_unknown_id_is_not_found() {
        let harness = start_scheduler(SchedulerConfig::default(), Duration::from_millis(10));
        assert_eq!(
            harness.handle.cancel("det_999999").await,
            CancelOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_safe_mode_rejects_agentic_requests() {
        let harness = start_scheduler(SchedulerConfig::default(), Duration::from_millis(10));

        let result = harness
            .handle
            .investigate(InvestigationRequest {
                mode: RequestedMode::Agentic,
                namespace: None,
                issue_fingerprint: None,
                timeout: None,
            })
            .await;
        assert_eq!(result.unwrap_err(), DispatchError::SafeMode);
        assert!(harness.store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_auto_mode_falls_back_to_deterministic_in_safe_mode() {
        let harness = start_scheduler(SchedulerConfig::default(), Duration::from_millis(10));

        let id = harness
            .handle
            .investigate(InvestigationRequest {
                mode: RequestedMode::Auto,
                namespace: None,
                issue_fingerprint: None,
                timeout: None,
            })
            .await
            .unwrap();
        assert!(id.starts_with("det_"));

        wait_until(Duration::from_secs(5), || {
            harness.store.get(&id).unwrap().status == ReportStatus::Completed
        })
        .await;

        // A clean completion refreshes the scheduler and store health
        let health = harness.health.health().await;
        assert_eq!(
            health.components[components::SCHEDULER].status,
            crate::health::ComponentStatus::Healthy
        );
        assert_eq!(
            health.components[components::REPORT_STORE].status,
            crate::health::ComponentStatus::Healthy
        );
    }
}
