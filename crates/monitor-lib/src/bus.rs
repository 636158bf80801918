//! Single-process event bus for logs, status heartbeats and report events
//!
//! Three independent topics backed by bounded broadcast channels. Producers
//! never block: when a subscriber's queue is full the oldest buffered events
//! are dropped and a `subscriber_lagging` warning is emitted, at most once
//! per 30 seconds per subscriber. Ordering within a topic is FIFO per
//! subscriber; nothing is guaranteed across topics.

use crate::models::{InvestigationReport, LogEvent, LogLevel, MonitorStatus};
use crate::observability::MonitorMetrics;
use chrono::Utc;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::warn;

/// Per-subscriber queue capacity
pub const TOPIC_CAPACITY: usize = 256;

const LAG_WARN_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportEventKind {
    Created,
    Sealed,
}

/// Frame published on the `reports` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEvent {
    pub event: ReportEventKind,
    pub report: InvestigationReport,
}

#[derive(Clone)]
pub struct EventBus {
    logs: broadcast::Sender<LogEvent>,
    status: broadcast::Sender<MonitorStatus>,
    reports: broadcast::Sender<ReportEvent>,
    metrics: MonitorMetrics,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(TOPIC_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (logs, _) = broadcast::channel(capacity);
        let (status, _) = broadcast::channel(capacity);
        let (reports, _) = broadcast::channel(capacity);
        Self {
            logs,
            status,
            reports,
            metrics: MonitorMetrics::new(),
        }
    }

    pub fn publish_log(&self, event: LogEvent) {
        // A send error only means there are no subscribers right now.
        let _ = self.logs.send(event);
    }

    pub fn log(
        &self,
        level: LogLevel,
        source: &str,
        message: &str,
        detail: Option<serde_json::Value>,
    ) {
        self.publish_log(LogEvent {
            timestamp: Utc::now(),
            source: source.to_string(),
            level,
            message: message.to_string(),
            detail,
        });
    }

    pub fn log_info(&self, source: &str, message: &str, detail: Option<serde_json::Value>) {
        self.log(LogLevel::Info, source, message, detail);
    }

    pub fn log_warn(&self, source: &str, message: &str, detail: Option<serde_json::Value>) {
        self.log(LogLevel::Warn, source, message, detail);
    }

    pub fn log_error(&self, source: &str, message: &str, detail: Option<serde_json::Value>) {
        self.log(LogLevel::Error, source, message, detail);
    }

    pub fn publish_status(&self, status: MonitorStatus) {
        let _ = self.status.send(status);
    }

    pub fn publish_report(&self, kind: ReportEventKind, report: InvestigationReport) {
        let _ = self.reports.send(ReportEvent { event: kind, report });
    }

    pub fn subscribe_logs(&self) -> BusSubscription<LogEvent> {
        BusSubscription::new(
            self.logs.subscribe(),
            self.logs.clone(),
            self.metrics.clone(),
            "logs",
        )
    }

    pub fn subscribe_status(&self) -> BusSubscription<MonitorStatus> {
        BusSubscription::new(
            self.status.subscribe(),
            self.logs.clone(),
            self.metrics.clone(),
            "status",
        )
    }

    pub fn subscribe_reports(&self) -> BusSubscription<ReportEvent> {
        BusSubscription::new(
            self.reports.subscribe(),
            self.logs.clone(),
            self.metrics.clone(),
            "reports",
        )
    }
}

/// One subscriber's view of a topic.
///
/// Dropping the subscription releases its queue; lag is reported but never
/// surfaces as an error to the consumer.
pub struct BusSubscription<T> {
    rx: broadcast::Receiver<T>,
    lag_log: broadcast::Sender<LogEvent>,
    metrics: MonitorMetrics,
    topic: &'static str,
    last_lag_warn: Option<Instant>,
}

impl<T: Clone> BusSubscription<T> {
    fn new(
        rx: broadcast::Receiver<T>,
        lag_log: broadcast::Sender<LogEvent>,
        metrics: MonitorMetrics,
        topic: &'static str,
    ) -> Self {
        Self {
            rx,
            lag_log,
            metrics,
            topic,
            last_lag_warn: None,
        }
    }

    /// Receive the next event, skipping over any dropped backlog.
    /// Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(dropped)) => {
                    self.note_lag(dropped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant used by tests
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(dropped)) => {
                    self.note_lag(dropped);
                }
                Err(_) => return None,
            }
        }
    }

    fn note_lag(&mut self, dropped: u64) {
        // Every drop is counted; only the warning is rate limited.
        self.metrics.inc_bus_dropped(dropped);

        let due = self
            .last_lag_warn
            .map(|at| at.elapsed() >= LAG_WARN_INTERVAL)
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last_lag_warn = Some(Instant::now());

        warn!(topic = self.topic, dropped = dropped, "subscriber lagging, dropped oldest events");
        let _ = self.lag_log.send(LogEvent {
            timestamp: Utc::now(),
            source: "bus".to_string(),
            level: LogLevel::Warn,
            message: "subscriber_lagging".to_string(),
            detail: Some(serde_json::json!({
                "topic": self.topic,
                "dropped": dropped,
            })),
        });
    }

    /// Adapt the subscription into a stream for chunked HTTP responses
    pub fn into_stream(self) -> impl Stream<Item = T>
    where
        T: Send + 'static,
    {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_logs();

        bus.log_info("test", "first", None);
        bus.log_info("test", "second", None);

        assert_eq!(sub.recv().await.unwrap().message, "first");
        assert_eq!(sub.recv().await.unwrap().message, "second");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_block() {
        let bus = EventBus::new();
        for i in 0..1_000 {
            bus.log_info("test", &format!("event {i}"), None);
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest_and_warns() {
        let bus = EventBus::with_capacity(8);
        let mut slow = bus.subscribe_logs();
        let dropped_before = MonitorMetrics::new().bus_dropped_total();

        for i in 0..100 {
            bus.log_info("test", &format!("event {i}"), None);
        }

        // Watches for the lag warning emitted when the slow subscriber
        // finally reads.
        let mut fresh = bus.subscribe_logs();

        // First recv observes the lag, emits the warning, and resumes at the
        // oldest retained event.
        let first = slow.recv().await.unwrap();
        assert_ne!(first.message, "event 0");

        let mut saw_lag_warn = false;
        while let Some(event) = fresh.try_recv() {
            if event.message == "subscriber_lagging" {
                saw_lag_warn = true;
            }
        }
        assert!(saw_lag_warn);

        // The drop counter reflects the lost events (other tests in this
        // process may add to it, so only a lower bound holds).
        assert!(MonitorMetrics::new().bus_dropped_total() > dropped_before);
    }

    #[tokio::test]
    async fn test_lag_warning_rate_limited() {
        let bus = EventBus::with_capacity(4);
        let mut slow = bus.subscribe_logs();

        let mut observer = bus.subscribe_logs();

        for i in 0..50 {
            bus.log_info("test", &format!("a{i}"), None);
        }
        let _ = slow.recv().await;
        for i in 0..50 {
            bus.log_info("test", &format!("b{i}"), None);
        }
        let _ = slow.recv().await;

        // Only the first lag within the interval produces a warning.
        let mut warn_count = 0;
        while let Some(event) = observer.try_recv() {
            if event.message == "subscriber_lagging" {
                warn_count += 1;
            }
        }
        assert_eq!(warn_count, 1);
    }

    #[tokio::test]
    async fn test_topics_are_independent() {
        let bus = EventBus::new();
        let mut logs = bus.subscribe_logs();
        let mut status = bus.subscribe_status();

        bus.publish_status(MonitorStatus {
            timestamp: Utc::now(),
            nodes_ready: 1,
            nodes_total: 1,
            pods_running: 3,
            pods_pending: 0,
            pods_total: 3,
            issues_count: 0,
            status: crate::models::HealthState::Healthy,
            last_investigation_id: None,
        });

        assert!(status.try_recv().is_some());
        assert!(logs.try_recv().is_none());
    }
}
