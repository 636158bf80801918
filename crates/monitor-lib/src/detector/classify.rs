//! Snapshot classification rules
//!
//! Rules are ordered; the first matching kind wins for a given container or
//! object. Severity mapping follows the same order.

use super::fingerprint;
use crate::models::{
    ClusterSnapshot, ContainerState, EventKind, Issue, IssueKind, IssueTarget, PodPhase, Severity,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};

/// Sliding window for the HighRestart rule
pub const RESTART_WINDOW: Duration = Duration::minutes(10);

/// Pending pods younger than this are not yet unschedulable
const PENDING_AGE_THRESHOLD_SECS: i64 = 120;

/// Restart threshold for CrashLoopBackOff to be critical
const CRASH_LOOP_CRITICAL_RESTARTS: u32 = 5;

/// Restarts within [`RESTART_WINDOW`] for the HighRestart rule
const HIGH_RESTART_THRESHOLD: u32 = 3;

pub fn severity_for(kind: IssueKind, restart_count: u32) -> Severity {
    match kind {
        IssueKind::NodeNotReady => Severity::Critical,
        IssueKind::OomKilled => Severity::Critical,
        IssueKind::PendingUnschedulable => Severity::Critical,
        IssueKind::CrashLoopBackOff if restart_count >= CRASH_LOOP_CRITICAL_RESTARTS => {
            Severity::Critical
        }
        IssueKind::CrashLoopBackOff => Severity::High,
        IssueKind::EvictedPod => Severity::High,
        IssueKind::ImagePullBackOff | IssueKind::ErrImagePull => Severity::High,
        IssueKind::HighRestart => Severity::Medium,
        IssueKind::FailedMount => Severity::Medium,
        IssueKind::Unknown => Severity::Low,
    }
}

/// Tracks per-container restart counts over the sliding window.
///
/// Also notices counts going *down*, which means the pod was replaced and
/// its debounce history is stale.
pub struct RestartTracker {
    samples: HashMap<String, VecDeque<(DateTime<Utc>, u32)>>,
}

impl Default for RestartTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RestartTracker {
    pub fn new() -> Self {
        Self {
            samples: HashMap::new(),
        }
    }

    fn key(namespace: &str, pod: &str, container: &str) -> String {
        format!("{namespace}/{pod}/{container}")
    }

    /// Record the snapshot's restart counts.
    /// Returns `(namespace, pod)` pairs whose counts decreased.
    pub fn update(&mut self, snapshot: &ClusterSnapshot) -> HashSet<(String, String)> {
        let now = snapshot.taken_at;
        let mut replaced = HashSet::new();
        let mut live_keys = HashSet::new();

        for pod in &snapshot.pods {
            for container in &pod.containers {
                let key = Self::key(&pod.namespace, &pod.name, &container.name);
                live_keys.insert(key.clone());
                let history = self.samples.entry(key).or_default();

                if let Some((_, last)) = history.back() {
                    if container.restart_count < *last {
                        replaced.insert((pod.namespace.clone(), pod.name.clone()));
                        history.clear();
                    }
                }

                history.push_back((now, container.restart_count));
                let cutoff = now - RESTART_WINDOW;
                while history.front().is_some_and(|(ts, _)| *ts < cutoff) {
                    history.pop_front();
                }
            }
        }

        self.samples.retain(|key, _| live_keys.contains(key));
        replaced
    }

    /// Restarts accumulated inside the window for one container
    pub fn restarts_in_window(&self, namespace: &str, pod: &str, container: &str) -> u32 {
        let key = Self::key(namespace, pod, container);
        let Some(history) = self.samples.get(&key) else {
            return 0;
        };
        match (history.front(), history.back()) {
            (Some((_, first)), Some((_, last))) if last > first => last - first,
            _ => 0,
        }
    }
}

fn pod_target(namespace: &str, name: &str, container: Option<&str>) -> IssueTarget {
    IssueTarget {
        kind: "Pod".to_string(),
        namespace: Some(namespace.to_string()),
        name: name.to_string(),
        container: container.map(str::to_string),
    }
}

fn make_issue(
    kind: IssueKind,
    target: IssueTarget,
    primary_reason: &str,
    evidence: Vec<String>,
    restart_count: u32,
    observed_at: DateTime<Utc>,
) -> Issue {
    Issue {
        kind,
        severity: severity_for(kind, restart_count),
        fingerprint: fingerprint(kind, &target, primary_reason),
        target,
        evidence,
        primary_reason: primary_reason.to_string(),
        observed_at,
    }
}

/// Classify one snapshot against its predecessor.
///
/// Pure apart from the restart window passed in; duplicate fingerprints
/// within a single snapshot collapse to the first occurrence.
pub fn classify(
    prev: Option<&ClusterSnapshot>,
    cur: &ClusterSnapshot,
    restarts: &RestartTracker,
) -> Vec<Issue> {
    let now = cur.taken_at;
    let mut issues: Vec<Issue> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let push = |issue: Issue, seen: &mut HashSet<String>, issues: &mut Vec<Issue>| {
        if seen.insert(issue.fingerprint.clone()) {
            issues.push(issue);
        }
    };

    let prev_restarts: HashMap<(String, String, String), u32> = prev
        .map(|snapshot| {
            snapshot
                .pods
                .iter()
                .flat_map(|pod| {
                    pod.containers.iter().map(|c| {
                        (
                            (pod.namespace.clone(), pod.name.clone(), c.name.clone()),
                            c.restart_count,
                        )
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    for pod in &cur.pods {
        for container in &pod.containers {
            let restart_count = container.restart_count;
            let increased = prev_restarts
                .get(&(pod.namespace.clone(), pod.name.clone(), container.name.clone()))
                .is_some_and(|old| restart_count > *old);

            let matched = match &container.state {
                ContainerState::Waiting { reason, message } => match reason.as_str() {
                    "ImagePullBackOff" => Some((IssueKind::ImagePullBackOff, reason.clone(), message.clone())),
                    "ErrImagePull" => Some((IssueKind::ErrImagePull, reason.clone(), message.clone())),
                    "CrashLoopBackOff" => Some((IssueKind::CrashLoopBackOff, reason.clone(), message.clone())),
                    _ => None,
                },
                ContainerState::Terminated {
                    reason,
                    exit_code,
                    message,
                } => {
                    if reason == "OOMKilled" {
                        Some((IssueKind::OomKilled, reason.clone(), message.clone()))
                    } else if increased && (reason == "Error" || *exit_code != 0) {
                        Some((
                            IssueKind::CrashLoopBackOff,
                            "CrashLoopBackOff".to_string(),
                            format!("container exited with code {exit_code} ({reason})"),
                        ))
                    } else {
                        None
                    }
                }
                ContainerState::Running => None,
            };

            if let Some((kind, reason, message)) = matched {
                let mut evidence = vec![format!(
                    "{}/{} container {} {}: restarts={}",
                    pod.namespace, pod.name, container.name, reason, restart_count
                )];
                if !message.is_empty() {
                    evidence.push(message);
                }
                push(
                    make_issue(
                        kind,
                        pod_target(&pod.namespace, &pod.name, Some(&container.name)),
                        &reason,
                        evidence,
                        restart_count,
                        now,
                    ),
                    &mut seen,
                    &mut issues,
                );
                continue;
            }

            // HighRestart only applies when no stronger rule matched
            let windowed = restarts.restarts_in_window(&pod.namespace, &pod.name, &container.name);
            if windowed >= HIGH_RESTART_THRESHOLD {
                push(
                    make_issue(
                        IssueKind::HighRestart,
                        pod_target(&pod.namespace, &pod.name, Some(&container.name)),
                        "HighRestart",
                        vec![format!(
                            "{}/{} container {} restarted {} times in the last {} minutes",
                            pod.namespace,
                            pod.name,
                            container.name,
                            windowed,
                            RESTART_WINDOW.num_minutes()
                        )],
                        restart_count,
                        now,
                    ),
                    &mut seen,
                    &mut issues,
                );
            }
        }

        if pod.phase == PodPhase::Pending && pod.age_seconds > PENDING_AGE_THRESHOLD_SECS {
            let scheduling_events: Vec<&str> = cur
                .events
                .iter()
                .filter(|e| {
                    matches!(e.reason.as_str(), "FailedScheduling" | "Unschedulable")
                        && e.object.name == pod.name
                        && e.object.namespace.as_deref() == Some(pod.namespace.as_str())
                })
                .map(|e| e.message.as_str())
                .collect();

            if !scheduling_events.is_empty() {
                let mut evidence = vec![format!(
                    "{}/{} pending for {}s",
                    pod.namespace, pod.name, pod.age_seconds
                )];
                evidence.extend(scheduling_events.iter().take(2).map(|m| m.to_string()));
                push(
                    make_issue(
                        IssueKind::PendingUnschedulable,
                        pod_target(&pod.namespace, &pod.name, None),
                        "FailedScheduling",
                        evidence,
                        0,
                        now,
                    ),
                    &mut seen,
                    &mut issues,
                );
            }
        }
    }

    for node in &cur.nodes {
        if !node.ready {
            push(
                make_issue(
                    IssueKind::NodeNotReady,
                    IssueTarget {
                        kind: "Node".to_string(),
                        namespace: None,
                        name: node.name.clone(),
                        container: None,
                    },
                    "NotReady",
                    vec![format!("node {} reports Ready=false", node.name)],
                    0,
                    now,
                ),
                &mut seen,
                &mut issues,
            );
        }
    }

    for event in &cur.events {
        if event.kind != EventKind::Warning {
            continue;
        }
        let kind = match event.reason.as_str() {
            "Evicted" => Some(IssueKind::EvictedPod),
            "FailedMount" | "FailedAttachVolume" => Some(IssueKind::FailedMount),
            _ => None,
        };
        if let Some(kind) = kind {
            push(
                make_issue(
                    kind,
                    IssueTarget {
                        kind: event.object.kind.clone(),
                        namespace: event.object.namespace.clone(),
                        name: event.object.name.clone(),
                        container: None,
                    },
                    &event.reason,
                    vec![event.message.clone()],
                    0,
                    now,
                ),
                &mut seen,
                &mut issues,
            );
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContainerStatusInfo, EventInfo, NodeInfo, ObjectRef, PodInfo};
    use std::collections::BTreeMap;

    fn pod_with_state(state: ContainerState, restart_count: u32) -> PodInfo {
        PodInfo {
            namespace: "frontend".to_string(),
            name: "broken-image-app-x".to_string(),
            controller: None,
            phase: PodPhase::Running,
            containers: vec![ContainerStatusInfo {
                name: "app".to_string(),
                image: "nginx:nonexistent-tag".to_string(),
                state,
                restart_count,
                init: false,
            }],
            labels: BTreeMap::new(),
            age_seconds: 600,
        }
    }

    fn snapshot_with(pods: Vec<PodInfo>) -> ClusterSnapshot {
        ClusterSnapshot {
            pods,
            nodes: vec![NodeInfo {
                name: "node-1".to_string(),
                ready: true,
                pressure: vec![],
            }],
            ..ClusterSnapshot::empty(Utc::now())
        }
    }

    #[test]
    fn test_image_pull_back_off_classified() {
        let snapshot = snapshot_with(vec![pod_with_state(
            ContainerState::Waiting {
                reason: "ImagePullBackOff".to_string(),
                message: "Back-off pulling image \"nginx:nonexistent-tag\"".to_string(),
            },
            0,
        )]);

        let issues = classify(None, &snapshot, &RestartTracker::new());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::ImagePullBackOff);
        assert_eq!(issues[0].severity, Severity::High);
        assert_eq!(issues[0].target.container.as_deref(), Some("app"));
    }

    #[test]
    fn test_crash_loop_critical_at_five_restarts() {
        let crash = |restarts| {
            snapshot_with(vec![pod_with_state(
                ContainerState::Waiting {
                    reason: "CrashLoopBackOff".to_string(),
                    message: String::new(),
                },
                restarts,
            )])
        };

        let issues = classify(None, &crash(3), &RestartTracker::new());
        assert_eq!(issues[0].severity, Severity::High);

        let issues = classify(None, &crash(5), &RestartTracker::new());
        assert_eq!(issues[0].severity, Severity::Critical);
    }

    #[test]
    fn test_oom_killed_is_critical() {
        let snapshot = snapshot_with(vec![pod_with_state(
            ContainerState::Terminated {
                reason: "OOMKilled".to_string(),
                exit_code: 137,
                message: String::new(),
            },
            1,
        )]);

        let issues = classify(None, &snapshot, &RestartTracker::new());
        assert_eq!(issues[0].kind, IssueKind::OomKilled);
        assert_eq!(issues[0].severity, Severity::Critical);
    }

    #[test]
    fn test_node_not_ready_is_critical() {
        let mut snapshot = snapshot_with(vec![]);
        snapshot.nodes.push(NodeInfo {
            name: "node-2".to_string(),
            ready: false,
            pressure: vec![],
        });

        let issues = classify(None, &snapshot, &RestartTracker::new());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::NodeNotReady);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert_eq!(issues[0].target.kind, "Node");
    }

    #[test]
    fn test_pending_unschedulable_needs_age_and_event() {
        let mut pod = pod_with_state(ContainerState::Running, 0);
        pod.phase = PodPhase::Pending;
        pod.age_seconds = 300;
        let mut snapshot = snapshot_with(vec![pod]);

        // No scheduling event yet
        assert!(classify(None, &snapshot, &RestartTracker::new()).is_empty());

        snapshot.events.push(EventInfo {
            kind: EventKind::Warning,
            reason: "FailedScheduling".to_string(),
            object: ObjectRef {
                kind: "Pod".to_string(),
                namespace: Some("frontend".to_string()),
                name: "broken-image-app-x".to_string(),
            },
            message: "0/3 nodes are available".to_string(),
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            count: 3,
        });

        let issues = classify(None, &snapshot, &RestartTracker::new());
        assert_eq!(issues[0].kind, IssueKind::PendingUnschedulable);
        assert_eq!(issues[0].severity, Severity::Critical);
    }

    #[test]
    fn test_restart_increase_with_error_exit_is_crash_loop() {
        let prev = snapshot_with(vec![pod_with_state(ContainerState::Running, 1)]);
        let cur = snapshot_with(vec![pod_with_state(
            ContainerState::Terminated {
                reason: "Error".to_string(),
                exit_code: 1,
                message: String::new(),
            },
            2,
        )]);

        let issues = classify(Some(&prev), &cur, &RestartTracker::new());
        assert_eq!(issues[0].kind, IssueKind::CrashLoopBackOff);
    }

    #[test]
    fn test_high_restart_in_window() {
        let mut tracker = RestartTracker::new();
        let base = Utc::now();

        for (offset_secs, count) in [(0, 0u32), (60, 2), (120, 4)] {
            let mut snapshot = snapshot_with(vec![pod_with_state(ContainerState::Running, count)]);
            snapshot.taken_at = base + Duration::seconds(offset_secs);
            tracker.update(&snapshot);
        }

        let mut cur = snapshot_with(vec![pod_with_state(ContainerState::Running, 4)]);
        cur.taken_at = base + Duration::seconds(150);
        let issues = classify(None, &cur, &tracker);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::HighRestart);
        assert_eq!(issues[0].severity, Severity::Medium);
    }

    #[test]
    fn test_restart_decrease_marks_pod_replaced() {
        let mut tracker = RestartTracker::new();
        let mut first = snapshot_with(vec![pod_with_state(ContainerState::Running, 7)]);
        first.taken_at = Utc::now();
        tracker.update(&first);

        let mut second = snapshot_with(vec![pod_with_state(ContainerState::Running, 0)]);
        second.taken_at = Utc::now();
        let replaced = tracker.update(&second);
        assert!(replaced.contains(&("frontend".to_string(), "broken-image-app-x".to_string())));
    }

    #[test]
    fn test_evicted_and_failed_mount_events() {
        let mut snapshot = snapshot_with(vec![]);
        snapshot.events.push(EventInfo {
            kind: EventKind::Warning,
            reason: "Evicted".to_string(),
            object: ObjectRef {
                kind: "Pod".to_string(),
                namespace: Some("default".to_string()),
                name: "victim".to_string(),
            },
            message: "node pressure".to_string(),
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            count: 1,
        });
        snapshot.events.push(EventInfo {
            kind: EventKind::Warning,
            reason: "FailedMount".to_string(),
            object: ObjectRef {
                kind: "Pod".to_string(),
                namespace: Some("default".to_string()),
                name: "storage-user".to_string(),
            },
            message: "volume not found".to_string(),
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            count: 1,
        });

        let issues = classify(None, &snapshot, &RestartTracker::new());
        let kinds: Vec<IssueKind> = issues.iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&IssueKind::EvictedPod));
        assert!(kinds.contains(&IssueKind::FailedMount));
    }

    #[test]
    fn test_waiting_rule_wins_over_high_restart() {
        let mut tracker = RestartTracker::new();
        let base = Utc::now();
        for (offset, count) in [(0, 0u32), (60, 5)] {
            let mut snapshot = snapshot_with(vec![pod_with_state(
                ContainerState::Waiting {
                    reason: "CrashLoopBackOff".to_string(),
                    message: String::new(),
                },
                count,
            )]);
            snapshot.taken_at = base + Duration::seconds(offset);
            tracker.update(&snapshot);
        }

        let mut cur = snapshot_with(vec![pod_with_state(
            ContainerState::Waiting {
                reason: "CrashLoopBackOff".to_string(),
                message: String::new(),
            },
            5,
        )]);
        cur.taken_at = base + Duration::seconds(120);
        let issues = classify(None, &cur, &tracker);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::CrashLoopBackOff);
    }
}
