//! Per-fingerprint debounce and cooldown tracking

use crate::models::{Issue, Severity};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

/// Running state for one fingerprint
#[derive(Debug, Clone)]
pub struct DetectionWindow {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub consecutive_snapshots: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_emitted_severity: Option<Severity>,
}

/// Debounce policy: non-critical issues must persist for `debounce_k`
/// consecutive snapshots; critical issues emit immediately. After an
/// emission the fingerprint is suppressed until the cooldown elapses,
/// unless severity rises.
pub struct WindowTracker {
    windows: HashMap<String, DetectionWindow>,
    debounce_k: u32,
    cooldown: Duration,
}

impl WindowTracker {
    pub fn new(debounce_k: u32, cooldown: Duration) -> Self {
        Self {
            windows: HashMap::new(),
            debounce_k: debounce_k.max(1),
            cooldown,
        }
    }

    /// Fold one snapshot's classified issues into the windows and return
    /// those clearing debounce and cooldown.
    ///
    /// `replaced_pods` holds `(namespace, pod)` pairs whose restart counts
    /// went backwards; their streaks restart at 1. Fingerprints absent from
    /// this snapshot are cleared entirely.
    pub fn observe(
        &mut self,
        now: DateTime<Utc>,
        issues: &[Issue],
        replaced_pods: &HashSet<(String, String)>,
    ) -> Vec<Issue> {
        let current: HashSet<&str> = issues.iter().map(|i| i.fingerprint.as_str()).collect();
        self.windows.retain(|fp, _| current.contains(fp.as_str()));

        let mut emitted = Vec::new();
        for issue in issues {
            let replaced = issue
                .target
                .namespace
                .as_ref()
                .is_some_and(|ns| replaced_pods.contains(&(ns.clone(), issue.target.name.clone())));

            let window = self
                .windows
                .entry(issue.fingerprint.clone())
                .or_insert_with(|| DetectionWindow {
                    first_seen: now,
                    last_seen: now,
                    consecutive_snapshots: 0,
                    cooldown_until: None,
                    last_emitted_severity: None,
                });

            window.last_seen = now;
            window.consecutive_snapshots = if replaced {
                1
            } else {
                window.consecutive_snapshots + 1
            };

            let confirmed = issue.severity == Severity::Critical
                || window.consecutive_snapshots >= self.debounce_k;
            if !confirmed {
                continue;
            }

            let cooling = window.cooldown_until.is_some_and(|until| now < until);
            let severity_rose = window
                .last_emitted_severity
                .is_some_and(|last| issue.severity.rank() < last.rank());
            if cooling && !severity_rose {
                continue;
            }

            window.cooldown_until = Some(now + self.cooldown);
            window.last_emitted_severity = Some(issue.severity);
            emitted.push(issue.clone());
        }

        emitted
    }

    pub fn snapshot(&self) -> HashMap<String, DetectionWindow> {
        self.windows.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IssueKind, IssueTarget};

    fn issue(severity: Severity, fingerprint: &str) -> Issue {
        Issue {
            kind: IssueKind::ImagePullBackOff,
            severity,
            target: IssueTarget {
                kind: "Pod".to_string(),
                namespace: Some("frontend".to_string()),
                name: "app-x".to_string(),
                container: Some("app".to_string()),
            },
            evidence: vec![],
            primary_reason: "ImagePullBackOff".to_string(),
            fingerprint: fingerprint.to_string(),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_non_critical_requires_k_snapshots() {
        let mut tracker = WindowTracker::new(2, Duration::minutes(5));
        let now = Utc::now();
        let issues = vec![issue(Severity::High, "fp-1")];

        assert!(tracker.observe(now, &issues, &HashSet::new()).is_empty());
        let emitted = tracker.observe(now + Duration::seconds(30), &issues, &HashSet::new());
        assert_eq!(emitted.len(), 1);
    }

    #[test]
    fn test_critical_emits_on_first_snapshot() {
        let mut tracker = WindowTracker::new(2, Duration::minutes(5));
        let emitted = tracker.observe(
            Utc::now(),
            &[issue(Severity::Critical, "fp-crit")],
            &HashSet::new(),
        );
        assert_eq!(emitted.len(), 1);
    }

    #[test]
    fn test_debounce_k_one_emits_immediately() {
        let mut tracker = WindowTracker::new(1, Duration::minutes(5));
        let emitted = tracker.observe(
            Utc::now(),
            &[issue(Severity::Medium, "fp-med")],
            &HashSet::new(),
        );
        assert_eq!(emitted.len(), 1);
    }

    #[test]
    fn test_cooldown_suppresses_reemission() {
        let mut tracker = WindowTracker::new(1, Duration::minutes(5));
        let now = Utc::now();
        let issues = vec![issue(Severity::High, "fp-1")];

        assert_eq!(tracker.observe(now, &issues, &HashSet::new()).len(), 1);
        assert!(tracker
            .observe(now + Duration::minutes(1), &issues, &HashSet::new())
            .is_empty());

        // After the cooldown elapses the issue may emit again
        let emitted = tracker.observe(now + Duration::minutes(6), &issues, &HashSet::new());
        assert_eq!(emitted.len(), 1);
    }

    #[test]
    fn test_severity_rise_breaks_cooldown() {
        let mut tracker = WindowTracker::new(1, Duration::minutes(5));
        let now = Utc::now();

        assert_eq!(
            tracker
                .observe(now, &[issue(Severity::High, "fp-1")], &HashSet::new())
                .len(),
            1
        );
        let emitted = tracker.observe(
            now + Duration::minutes(1),
            &[issue(Severity::Critical, "fp-1")],
            &HashSet::new(),
        );
        assert_eq!(emitted.len(), 1);
    }

    #[test]
    fn test_disappearing_fingerprint_clears_window() {
        let mut tracker = WindowTracker::new(2, Duration::minutes(5));
        let now = Utc::now();
        let issues = vec![issue(Severity::High, "fp-1")];

        tracker.observe(now, &issues, &HashSet::new());
        // Pod disappears for a tick
        tracker.observe(now + Duration::seconds(30), &[], &HashSet::new());
        assert!(tracker.snapshot().is_empty());

        // Reappearing restarts debouncing from scratch
        assert!(tracker
            .observe(now + Duration::seconds(60), &issues, &HashSet::new())
            .is_empty());
    }

    #[test]
    fn test_replaced_pod_resets_streak() {
        let mut tracker = WindowTracker::new(3, Duration::minutes(5));
        let now = Utc::now();
        let issues = vec![issue(Severity::High, "fp-1")];
        let mut replaced = HashSet::new();

        tracker.observe(now, &issues, &replaced);
        tracker.observe(now + Duration::seconds(30), &issues, &replaced);

        replaced.insert(("frontend".to_string(), "app-x".to_string()));
        tracker.observe(now + Duration::seconds(60), &issues, &replaced);

        let windows = tracker.snapshot();
        assert_eq!(windows["fp-1"].consecutive_snapshots, 1);
    }
}
