//! Cluster snapshot loop
//!
//! Periodically pulls a snapshot through the cluster adapter, feeds the
//! issue detector, publishes a status heartbeat, and forwards debounced
//! issues to the scheduler. A failed tick is skipped without backoff
//! catch-up; two consecutive failures degrade the published status to
//! `adapter_unavailable` until the next successful snapshot.

use crate::adapters::{Clock, ClusterAdapter};
use crate::bus::EventBus;
use crate::cancel::CancelToken;
use crate::detector::IssueDetector;
use crate::health::{components, HealthRegistry};
use crate::models::{ClusterSnapshot, HealthState, Issue, MonitorStatus, Severity};
use crate::observability::MonitorMetrics;
use crate::state::MonitorState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Floor for the configured check interval
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Consecutive failures before the status degrades
const FAILURES_BEFORE_DEGRADED: u32 = 2;

pub struct Snapshotter {
    cluster: Arc<dyn ClusterAdapter>,
    detector: IssueDetector,
    bus: EventBus,
    state: Arc<MonitorState>,
    health: HealthRegistry,
    clock: Arc<dyn Clock>,
    metrics: MonitorMetrics,
    issue_tx: mpsc::Sender<Vec<Issue>>,
    check_interval: Duration,
    consecutive_failures: u32,
    /// Bus drop total at the previous tick, for the bus health check
    last_bus_drops: u64,
}

#[allow(clippy::too_many_arguments)]
impl Snapshotter {
    pub fn new(
        cluster: Arc<dyn ClusterAdapter>,
        detector: IssueDetector,
        bus: EventBus,
        state: Arc<MonitorState>,
        health: HealthRegistry,
        clock: Arc<dyn Clock>,
        issue_tx: mpsc::Sender<Vec<Issue>>,
        check_interval: Duration,
    ) -> Self {
        Self {
            cluster,
            detector,
            bus,
            state,
            health,
            clock,
            metrics: MonitorMetrics::new(),
            issue_tx,
            check_interval: check_interval.max(MIN_CHECK_INTERVAL),
            consecutive_failures: 0,
            last_bus_drops: 0,
        }
    }

    pub async fn run(mut self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_secs = self.check_interval.as_secs(),
            "starting snapshot loop"
        );

        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.recv() => {
                    info!("shutting down snapshot loop");
                    break;
                }
            }
        }
    }

    /// One observation cycle, also driveable directly from tests
    pub async fn tick(&mut self) {
        self.update_bus_health().await;

        let started = Instant::now();
        let snapshot = match self.cluster.snapshot(&CancelToken::never()).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                self.metrics.inc_snapshot_failures();
                self.consecutive_failures += 1;
                warn!(
                    error = %error,
                    failures = self.consecutive_failures,
                    "cluster snapshot failed, skipping tick"
                );
                self.bus.log_warn(
                    "snapshotter",
                    "snapshot_failed",
                    Some(serde_json::json!({
                        "error": error.to_string(),
                        "consecutive_failures": self.consecutive_failures,
                    })),
                );

                if self.consecutive_failures >= FAILURES_BEFORE_DEGRADED {
                    self.health
                        .set_degraded(components::SNAPSHOTTER, "cluster adapter unavailable")
                        .await;
                    self.publish_degraded_status();
                }
                return;
            }
        };

        if self.consecutive_failures > 0 {
            info!("cluster adapter recovered");
        }
        self.consecutive_failures = 0;
        self.metrics
            .observe_snapshot_latency(started.elapsed().as_secs_f64());
        self.health.set_healthy(components::SNAPSHOTTER).await;

        let detection = self.detector.observe(&snapshot);
        self.health.set_healthy(components::DETECTOR).await;
        debug!(
            issues = detection.issues.len(),
            emitted = detection.emitted.len(),
            pods = snapshot.pods.len(),
            "snapshot processed"
        );

        let status = self.derive_status(&snapshot, &detection.issues);
        self.state.set_snapshot(snapshot);
        self.state.set_status(status.clone());
        self.bus.publish_status(status);

        if !detection.emitted.is_empty() {
            for issue in &detection.emitted {
                self.metrics.inc_issue(issue.kind.as_str());
            }
            self.bus.log_info(
                "snapshotter",
                "issues_detected",
                Some(serde_json::json!({
                    "count": detection.emitted.len(),
                    "issue_fingerprints": detection
                        .emitted
                        .iter()
                        .map(|i| i.fingerprint.clone())
                        .collect::<Vec<_>>(),
                })),
            );
            if self.issue_tx.send(detection.emitted).await.is_err() {
                warn!("scheduler is gone, dropping issue batch");
                self.health
                    .set_unhealthy(components::DETECTOR, "issue channel to scheduler closed")
                    .await;
            }
        }
    }

    /// Reflect bus backpressure in component health: new drops since the
    /// last tick mark the bus degraded.
    async fn update_bus_health(&mut self) {
        let drops = self.metrics.bus_dropped_total();
        if drops > self.last_bus_drops {
            self.health
                .set_degraded(
                    components::BUS,
                    format!(
                        "{} events dropped for lagging subscribers",
                        drops - self.last_bus_drops
                    ),
                )
                .await;
        } else {
            self.health.set_healthy(components::BUS).await;
        }
        self.last_bus_drops = drops;
    }

    fn derive_status(&self, snapshot: &ClusterSnapshot, issues: &[Issue]) -> MonitorStatus {
        let summary = snapshot.summary();
        let critical = issues.iter().filter(|i| i.severity == Severity::Critical).count();
        let high = issues.iter().filter(|i| i.severity == Severity::High).count();

        let health_state = if critical > 0 {
            HealthState::CriticalIssues
        } else if high > 0 {
            HealthState::HighIssues
        } else if !issues.is_empty() {
            HealthState::IssuesDetected
        } else {
            HealthState::Healthy
        };

        MonitorStatus {
            timestamp: snapshot.taken_at,
            nodes_ready: summary.nodes_ready,
            nodes_total: summary.nodes_total,
            pods_running: summary.pods_running,
            pods_pending: summary.pods_pending,
            pods_total: summary.pods_total,
            issues_count: issues.len(),
            status: health_state,
            last_investigation_id: self.state.last_investigation(),
        }
    }

    fn publish_degraded_status(&self) {
        let status = MonitorStatus {
            timestamp: self.clock.now(),
            nodes_ready: 0,
            nodes_total: 0,
            pods_running: 0,
            pods_pending: 0,
            pods_total: 0,
            issues_count: 0,
            status: HealthState::AdapterUnavailable,
            last_investigation_id: self.state.last_investigation(),
        };
        self.state.set_status(status.clone());
        self.bus.publish_status(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::async_trait;
    use crate::error::{AdapterError, AdapterResult};
    use crate::models::{
        ContainerState, ContainerStatusInfo, EventInfo, NodeInfo, ObjectRef, PodInfo, PodPhase,
    };
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Cluster fake replaying a scripted sequence of snapshot results
    struct ScriptedCluster {
        results: Mutex<Vec<AdapterResult<ClusterSnapshot>>>,
    }

    #[async_trait]
    impl ClusterAdapter for ScriptedCluster {
        async fn snapshot(&self, _cancel: &CancelToken) -> AdapterResult<ClusterSnapshot> {
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                return Ok(healthy_snapshot());
            }
            results.remove(0)
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

    fn healthy_snapshot() -> ClusterSnapshot {
        ClusterSnapshot {
            nodes: vec![NodeInfo {
                name: "node-1".to_string(),
                ready: true,
                pressure: vec![],
            }],
            ..ClusterSnapshot::empty(Utc::now())
        }
    }

    fn broken_node_snapshot() -> ClusterSnapshot {
        ClusterSnapshot {
            nodes: vec![
                NodeInfo {
                    name: "node-1".to_string(),
                    ready: true,
                    pressure: vec![],
                },
                NodeInfo {
                    name: "node-2".to_string(),
                    ready: false,
                    pressure: vec![],
                },
            ],
            ..ClusterSnapshot::empty(Utc::now())
        }
    }

    fn image_pull_snapshot() -> ClusterSnapshot {
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

    struct TestRig {
        snapshotter: Snapshotter,
        issue_rx: mpsc::Receiver<Vec<Issue>>,
        bus: EventBus,
        state: Arc<MonitorState>,
        health: HealthRegistry,
        clock: Arc<crate::adapters::ManualClock>,
    }

    async fn rig(results: Vec<AdapterResult<ClusterSnapshot>>) -> TestRig {
        let bus = EventBus::new();
        let state = Arc::new(MonitorState::new());
        let health = HealthRegistry::new();
        health.register(components::SNAPSHOTTER).await;
        health.register(components::DETECTOR).await;
        health.register(components::BUS).await;
        let (issue_tx, issue_rx) = mpsc::channel(8);
        let clock = Arc::new(crate::adapters::ManualClock::new(Utc::now()));

        let snapshotter = Snapshotter::new(
            Arc::new(ScriptedCluster {
                results: Mutex::new(results),
            }),
            IssueDetector::new(2, chrono::Duration::minutes(5)),
            bus.clone(),
            Arc::clone(&state),
            health.clone(),
            clock.clone(),
            issue_tx,
            Duration::from_secs(30),
        );

        TestRig {
            snapshotter,
            issue_rx,
            bus,
            state,
            health,
            clock,
        }
    }

    #[tokio::test]
    async fn test_healthy_tick_publishes_status() {
        let mut rig = rig(vec![Ok(healthy_snapshot())]).await;
        let mut status_sub = rig.bus.subscribe_status();

        rig.snapshotter.tick().await;

        let status = status_sub.try_recv().expect("status heartbeat");
        assert_eq!(status.status, HealthState::Healthy);
        assert_eq!(status.nodes_ready, 1);
        assert!(rig.state.snapshot().is_some());
    }

    #[tokio::test]
    async fn test_critical_issue_emitted_on_first_tick() {
        let mut rig = rig(vec![Ok(broken_node_snapshot())]).await;

        rig.snapshotter.tick().await;

        // NodeNotReady is critical and bypasses debouncing
        let batch = rig.issue_rx.try_recv().expect("issue batch");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, crate::models::IssueKind::NodeNotReady);

        let status = rig.state.status().unwrap();
        assert_eq!(status.status, HealthState::CriticalIssues);
    }

    #[tokio::test]
    async fn test_non_critical_issue_waits_for_debounce() {
        let mut rig = rig(vec![
            Ok(image_pull_snapshot()),
            Ok(image_pull_snapshot()),
        ])
        .await;

        rig.snapshotter.tick().await;
        assert!(rig.issue_rx.try_recv().is_err(), "first sighting must not emit");
        // Status still reflects the detected (not yet emitted) issue
        assert_eq!(rig.state.status().unwrap().status, HealthState::HighIssues);

        rig.snapshotter.tick().await;
        let batch = rig.issue_rx.try_recv().expect("debounced issue emitted");
        assert_eq!(batch[0].kind, crate::models::IssueKind::ImagePullBackOff);
    }

    #[tokio::test]
    async fn test_closed_issue_channel_marks_detector_unhealthy() {
        let rig = rig(vec![Ok(broken_node_snapshot())]).await;
        let TestRig {
            mut snapshotter,
            issue_rx,
            health,
            ..
        } = rig;

        // Scheduler side of the channel is gone
        drop(issue_rx);
        snapshotter.tick().await;

        let response = health.health().await;
        assert_eq!(
            response.components[components::DETECTOR].status,
            crate::health::ComponentStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_two_failures_degrade_status() {
        let mut rig = rig(vec![
            Err(AdapterError::Unavailable("connection refused".to_string())),
            Err(AdapterError::Timeout(Duration::from_secs(10))),
            Ok(healthy_snapshot()),
        ])
        .await;
        let mut logs = rig.bus.subscribe_logs();

        rig.snapshotter.tick().await;
        // One failure only warns
        assert!(rig.state.status().is_none());

        rig.clock.advance(chrono::Duration::seconds(30));
        rig.snapshotter.tick().await;
        let degraded = rig.state.status().unwrap();
        assert_eq!(degraded.status, HealthState::AdapterUnavailable);
        assert_eq!(degraded.timestamp, rig.clock.now());
        let mut warned = 0;
        while let Some(event) = logs.try_recv() {
            if event.message == "snapshot_failed" {
                warned += 1;
            }
        }
        assert_eq!(warned, 2);

        // Recovery is automatic on the next successful snapshot
        rig.snapshotter.tick().await;
        assert_eq!(rig.state.status().unwrap().status, HealthState::Healthy);
    }
}
