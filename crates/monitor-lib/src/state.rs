//! Shared state published by the loops and read by the HTTP surface

use crate::models::{ClusterSnapshot, MonitorStatus};
use std::sync::RwLock;

/// Latest observations, written by the snapshotter and scheduler and read
/// by API handlers. All reads return value copies.
#[derive(Default)]
pub struct MonitorState {
    last_snapshot: RwLock<Option<ClusterSnapshot>>,
    last_status: RwLock<Option<MonitorStatus>>,
    last_investigation: RwLock<Option<String>>,
}

impl MonitorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_snapshot(&self, snapshot: ClusterSnapshot) {
        *self.last_snapshot.write().unwrap() = Some(snapshot);
    }

    pub fn snapshot(&self) -> Option<ClusterSnapshot> {
        self.last_snapshot.read().unwrap().clone()
    }

    pub fn set_status(&self, status: MonitorStatus) {
        *self.last_status.write().unwrap() = Some(status);
    }

    pub fn status(&self) -> Option<MonitorStatus> {
        self.last_status.read().unwrap().clone()
    }

    pub fn set_last_investigation(&self, id: String) {
        *self.last_investigation.write().unwrap() = Some(id);
    }

    pub fn last_investigation(&self) -> Option<String> {
        self.last_investigation.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_state_round_trip() {
        let state = MonitorState::new();
        assert!(state.snapshot().is_none());

        state.set_snapshot(ClusterSnapshot::empty(Utc::now()));
        assert!(state.snapshot().is_some());

        state.set_last_investigation("det_000001".to_string());
        assert_eq!(state.last_investigation().as_deref(), Some("det_000001"));
    }
}
