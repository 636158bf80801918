//! Prometheus metrics for the investigation monitor

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;

const SNAPSHOT_LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
const INVESTIGATION_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    snapshot_latency_seconds: Histogram,
    snapshots_total: IntCounter,
    snapshot_failures_total: IntCounter,
    issues_detected_total: IntCounterVec,
    investigations_total: IntCounterVec,
    investigation_duration_seconds: Histogram,
    active_investigations: IntGauge,
    reports_persisted_total: IntCounter,
    bus_dropped_events_total: IntCounter,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            snapshot_latency_seconds: register_histogram!(
                "investigation_monitor_snapshot_latency_seconds",
                "Time spent producing one cluster snapshot",
                SNAPSHOT_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register snapshot_latency_seconds"),

            snapshots_total: register_int_counter!(
                "investigation_monitor_snapshots_total",
                "Snapshots successfully taken"
            )
            .expect("Failed to register snapshots_total"),

            snapshot_failures_total: register_int_counter!(
                "investigation_monitor_snapshot_failures_total",
                "Snapshot attempts that failed"
            )
            .expect("Failed to register snapshot_failures_total"),

            issues_detected_total: register_int_counter_vec!(
                "investigation_monitor_issues_detected_total",
                "Issues emitted to the scheduler, by kind",
                &["kind"]
            )
            .expect("Failed to register issues_detected_total"),

            investigations_total: register_int_counter_vec!(
                "investigation_monitor_investigations_total",
                "Sealed investigations, by mode and terminal status",
                &["mode", "status"]
            )
            .expect("Failed to register investigations_total"),

            investigation_duration_seconds: register_histogram!(
                "investigation_monitor_investigation_duration_seconds",
                "Wall time of sealed investigations",
                INVESTIGATION_BUCKETS.to_vec()
            )
            .expect("Failed to register investigation_duration_seconds"),

            active_investigations: register_int_gauge!(
                "investigation_monitor_active_investigations",
                "Currently running investigations"
            )
            .expect("Failed to register active_investigations"),

            reports_persisted_total: register_int_counter!(
                "investigation_monitor_reports_persisted_total",
                "Reports written to the reports directory"
            )
            .expect("Failed to register reports_persisted_total"),

            bus_dropped_events_total: register_int_counter!(
                "investigation_monitor_bus_dropped_events_total",
                "Events dropped for lagging bus subscribers"
            )
            .expect("Failed to register bus_dropped_events_total"),
        }
    }
}

/// Lightweight handle to the process-wide metrics
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_snapshot_latency(&self, seconds: f64) {
        self.inner().snapshot_latency_seconds.observe(seconds);
        self.inner().snapshots_total.inc();
    }

    pub fn inc_snapshot_failures(&self) {
        self.inner().snapshot_failures_total.inc();
    }

    pub fn inc_issue(&self, kind: &str) {
        self.inner().issues_detected_total.with_label_values(&[kind]).inc();
    }

    pub fn observe_investigation(&self, mode: &str, status: &str, seconds: f64) {
        self.inner()
            .investigations_total
            .with_label_values(&[mode, status])
            .inc();
        self.inner().investigation_duration_seconds.observe(seconds);
    }

    pub fn set_active_investigations(&self, count: i64) {
        self.inner().active_investigations.set(count);
    }

    pub fn inc_reports_persisted(&self) {
        self.inner().reports_persisted_total.inc();
    }

    pub fn inc_bus_dropped(&self, count: u64) {
        self.inner().bus_dropped_events_total.inc_by(count);
    }

    /// Current drop total, read by the bus health check
    pub fn bus_dropped_total(&self) -> u64 {
        self.inner().bus_dropped_events_total.get()
    }
}
