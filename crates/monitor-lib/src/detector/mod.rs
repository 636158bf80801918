//! Issue detection over cluster snapshots
//!
//! Classification is a pure function of consecutive snapshots; the stateful
//! part is per-fingerprint debouncing and cooldown tracking so that a
//! persistent anomaly triggers one investigation, not one per tick.

mod classify;
mod window;

pub use classify::{classify, severity_for, RestartTracker, RESTART_WINDOW};
pub use window::{DetectionWindow, WindowTracker};

use crate::models::{ClusterSnapshot, Issue, IssueKind, IssueTarget};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Stable identity of an issue kind at a target.
///
/// Excludes timestamps, counts and pod UIDs so that recurrences of the same
/// problem collapse onto one fingerprint.
pub fn fingerprint(kind: IssueKind, target: &IssueTarget, primary_reason: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [
        kind.as_str(),
        target.namespace.as_deref().unwrap_or(""),
        &target.kind,
        &target.name,
        target.container.as_deref().unwrap_or(""),
        primary_reason,
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Outcome of one detector pass
pub struct Detection {
    /// Everything detected in this snapshot
    pub issues: Vec<Issue>,
    /// The subset that cleared debouncing and should trigger investigations
    pub emitted: Vec<Issue>,
}

/// Snapshot classifier with debounce state
pub struct IssueDetector {
    windows: WindowTracker,
    restarts: RestartTracker,
    previous: Option<ClusterSnapshot>,
}

impl IssueDetector {
    pub fn new(debounce_k: u32, cooldown: chrono::Duration) -> Self {
        Self {
            windows: WindowTracker::new(debounce_k, cooldown),
            restarts: RestartTracker::new(),
            previous: None,
        }
    }

    /// Classify the new snapshot against the previous one.
    ///
    /// `issues` holds everything currently detected; `emitted` only those
    /// that cleared debouncing and cooldown and should be dispatched.
    pub fn observe(&mut self, snapshot: &ClusterSnapshot) -> Detection {
        let now = snapshot.taken_at;
        let replaced_pods = self.restarts.update(snapshot);

        let issues = classify(self.previous.as_ref(), snapshot, &self.restarts);
        let emitted = self.windows.observe(now, &issues, &replaced_pods);

        self.previous = Some(snapshot.clone());
        Detection { issues, emitted }
    }

    /// Copy of the current per-fingerprint windows, for introspection
    pub fn windows(&self) -> HashMap<String, DetectionWindow> {
        self.windows.snapshot()
    }

    pub fn first_seen(&self, fingerprint: &str) -> Option<DateTime<Utc>> {
        self.windows.snapshot().get(fingerprint).map(|w| w.first_seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(container: Option<&str>) -> IssueTarget {
        IssueTarget {
            kind: "Pod".to_string(),
            namespace: Some("frontend".to_string()),
            name: "broken-image-app-x".to_string(),
            container: container.map(str::to_string),
        }
    }

    #[test]
    fn test_fingerprint_stable_across_occurrences() {
        let a = fingerprint(IssueKind::ImagePullBackOff, &target(Some("app")), "ImagePullBackOff");
        let b = fingerprint(IssueKind::ImagePullBackOff, &target(Some("app")), "ImagePullBackOff");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_fingerprint_differs_by_kind_and_target() {
        let base = fingerprint(IssueKind::ImagePullBackOff, &target(Some("app")), "ImagePullBackOff");
        assert_ne!(
            base,
            fingerprint(IssueKind::ErrImagePull, &target(Some("app")), "ErrImagePull")
        );
        assert_ne!(
            base,
            fingerprint(IssueKind::ImagePullBackOff, &target(Some("sidecar")), "ImagePullBackOff")
        );
    }

    #[test]
    fn test_fingerprint_field_boundaries() {
        // "ab" + "c" must not collide with "a" + "bc"
        let left = fingerprint(
            IssueKind::Unknown,
            &IssueTarget {
                kind: "ab".to_string(),
                namespace: None,
                name: "c".to_string(),
                container: None,
            },
            "r",
        );
        let right = fingerprint(
            IssueKind::Unknown,
            &IssueTarget {
                kind: "a".to_string(),
                namespace: None,
                name: "bc".to_string(),
                container: None,
            },
            "r",
        );
        assert_ne!(left, right);
    }
}
