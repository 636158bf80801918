//! Deterministic rule-chain investigator
//!
//! Executes a fixed, ordered plan of diagnostic steps. Steps are
//! independent and best-effort: a failing step is recorded and the plan
//! continues. Step names are part of the report contract.

use super::{async_trait, InvestigationContext, Investigator};
use crate::error::AdapterError;
use crate::models::{
    ContainerState, Finding, FindingCategory, InvestigationMode, ReportStatus, Severity,
    SourceTool, StepStatus,
};
use crate::report::SharedReport;
use chrono::Duration as ChronoDuration;
use std::collections::BTreeMap;
use std::time::Instant;

/// Warning events older than this are left to the archive
const EVENT_WINDOW_MINUTES: i64 = 30;

/// Utilization at or above this fraction raises a resource_pressure finding
const PRESSURE_THRESHOLD_PERCENT: f64 = 80.0;

const STEP_CLUSTER_OVERVIEW: &str = "cluster_overview";
const STEP_NODE_ANALYSIS: &str = "node_analysis";
const STEP_POD_ANALYSIS: &str = "pod_analysis";
const STEP_RESOURCE_UTILIZATION: &str = "resource_utilization";
const STEP_EVENT_ANALYSIS: &str = "event_analysis";
const STEP_ANALYZER_SCAN: &str = "analyzer_scan";
const STEP_WORKLOAD_ANALYSIS: &str = "workload_analysis";
const STEP_NETWORK_ANALYSIS: &str = "network_analysis";
const STEP_REPORT_ASSEMBLY: &str = "report_assembly";

pub struct DeterministicInvestigator;

#[async_trait]
impl Investigator for DeterministicInvestigator {
    fn mode(&self) -> InvestigationMode {
        InvestigationMode::Deterministic
    }

    async fn investigate(&self, ctx: &InvestigationContext, report: &SharedReport) -> ReportStatus {
        // Each run_step returns false once the investigation deadline has
        // passed, which stops the plan at that point.
        let completed = run_step(ctx, report, STEP_CLUSTER_OVERVIEW, cluster_overview(ctx, report)).await
            && run_step(ctx, report, STEP_NODE_ANALYSIS, node_analysis(ctx, report)).await
            && run_step(ctx, report, STEP_POD_ANALYSIS, pod_analysis(ctx, report)).await
            && run_step(ctx, report, STEP_RESOURCE_UTILIZATION, resource_utilization(ctx, report)).await
            && run_step(ctx, report, STEP_EVENT_ANALYSIS, event_analysis(ctx, report)).await
            && run_step(ctx, report, STEP_ANALYZER_SCAN, analyzer_scan(ctx, report)).await
            && run_step(ctx, report, STEP_WORKLOAD_ANALYSIS, workload_analysis(ctx, report)).await
            && run_step(ctx, report, STEP_NETWORK_ANALYSIS, network_analysis(ctx, report)).await
            && run_step(ctx, report, STEP_REPORT_ASSEMBLY, report_assembly(ctx, report)).await;

        if ctx.cancel.is_cancelled() {
            ReportStatus::Cancelled
        } else if !completed {
            ReportStatus::TimedOut
        } else {
            ReportStatus::Completed
        }
    }
}

enum StepOutcome {
    Done,
    Skipped(String),
}

type StepResult = Result<StepOutcome, String>;

/// Time one step, record its outcome, and emit the step log event.
/// Returns false when the plan should stop (investigation deadline passed).
async fn run_step<F>(ctx: &InvestigationContext, report: &SharedReport, name: &str, step: F) -> bool
where
    F: std::future::Future<Output = StepResult>,
{
    let started = Instant::now();
    let result = if ctx.cancel.is_cancelled() {
        Ok(StepOutcome::Skipped("investigation cancelled".to_string()))
    } else {
        step.await
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    let (status, error) = match result {
        Ok(StepOutcome::Done) => (StepStatus::Completed, None),
        Ok(StepOutcome::Skipped(reason)) => (StepStatus::Skipped, Some(reason)),
        Err(error) => (StepStatus::Failed, Some(error)),
    };

    let (report_id, index) = {
        let mut builder = report.lock().unwrap();
        let index = builder.record_step(name, status, duration_ms, error);
        (builder.id().to_string(), index)
    };
    ctx.log_step(&report_id, index, name, status);

    ctx.cancel.is_cancelled() || !ctx.deadline_passed()
}

async fn cluster_overview(ctx: &InvestigationContext, report: &SharedReport) -> StepResult {
    let summary = ctx.snapshot.summary();
    report.lock().unwrap().set_cluster_summary(summary);
    Ok(StepOutcome::Done)
}

async fn node_analysis(ctx: &InvestigationContext, report: &SharedReport) -> StepResult {
    let mut builder = report.lock().unwrap();

    for node in &ctx.snapshot.nodes {
        if !node.ready {
            builder.add_finding(Finding {
                category: FindingCategory::NodeHealth,
                severity: Severity::Critical,
                title: format!("Node {} is not ready", node.name),
                description: format!("Node {} reports Ready=false", node.name),
                affected_resources: vec![format!("node/{}", node.name)],
                recommendations: vec![
                    "Check kubelet status on the node".to_string(),
                    "Verify node network connectivity".to_string(),
                    "Inspect node system logs".to_string(),
                ],
                evidence: vec![format!("condition Ready=false on {}", node.name)],
                source_tool: SourceTool::Cluster,
            });
        }
        for pressure in &node.pressure {
            builder.add_finding(Finding {
                category: FindingCategory::NodeHealth,
                severity: Severity::High,
                title: format!("Node {} under {pressure}", node.name),
                description: format!("Node {} reports condition {pressure}=True", node.name),
                affected_resources: vec![format!("node/{}", node.name)],
                recommendations: vec![
                    "Identify pods consuming the pressured resource".to_string(),
                    "Consider cordoning the node until pressure clears".to_string(),
                ],
                evidence: vec![format!("condition {pressure}=True on {}", node.name)],
                source_tool: SourceTool::Cluster,
            });
        }
    }

    Ok(StepOutcome::Done)
}

async fn pod_analysis(ctx: &InvestigationContext, report: &SharedReport) -> StepResult {
    // Group waiting containers by reason so repeated failures collapse into
    // one finding per cause.
    let mut by_reason: BTreeMap<String, Vec<(String, String, String)>> = BTreeMap::new();

    for pod in &ctx.snapshot.pods {
        if let Some(ns) = &ctx.namespace {
            if &pod.namespace != ns {
                continue;
            }
        }
        for container in &pod.containers {
            if let ContainerState::Waiting { reason, message } = &container.state {
                if reason.is_empty() || reason == "ContainerCreating" {
                    continue;
                }
                by_reason.entry(reason.clone()).or_default().push((
                    format!("{}/{}", pod.namespace, pod.name),
                    container.image.clone(),
                    message.clone(),
                ));
            }
        }
    }

    let mut builder = report.lock().unwrap();
    for (reason, occurrences) in by_reason {
        let affected: Vec<String> = occurrences.iter().map(|(pod, _, _)| pod.clone()).collect();
        let images: Vec<String> = {
            let mut images: Vec<String> =
                occurrences.iter().map(|(_, image, _)| image.clone()).collect();
            images.dedup();
            images
        };
        let evidence: Vec<String> = occurrences
            .iter()
            .filter(|(_, _, message)| !message.is_empty())
            .take(3)
            .map(|(pod, _, message)| format!("{pod}: {message}"))
            .collect();

        let image_related = matches!(reason.as_str(), "ImagePullBackOff" | "ErrImagePull");
        let mut recommendations = reason_recommendations(&reason);
        if image_related {
            for image in &images {
                recommendations.push(format!("Verify that image {image} exists and the tag is correct"));
            }
            // Approved-registry guidance comes from the corpus, never from code.
            for hit in ctx.knowledge.query("approved images", 1) {
                recommendations.push(format!(
                    "Use an image from the approved registry (see {})",
                    hit.reference()
                ));
            }
        }

        builder.add_finding(Finding {
            category: if image_related {
                FindingCategory::ImagePolicy
            } else {
                FindingCategory::PodFailures
            },
            severity: crate::detector::severity_for(waiting_reason_kind(&reason), 0),
            title: format!("{} pod(s) waiting with {reason}", affected.len()),
            description: format!(
                "Containers stuck in waiting state {reason}: {}",
                images.join(", ")
            ),
            affected_resources: affected,
            recommendations,
            evidence,
            source_tool: SourceTool::Cluster,
        });
    }

    Ok(StepOutcome::Done)
}

fn waiting_reason_kind(reason: &str) -> crate::models::IssueKind {
    use crate::models::IssueKind;
    match reason {
        "ImagePullBackOff" => IssueKind::ImagePullBackOff,
        "ErrImagePull" => IssueKind::ErrImagePull,
        "CrashLoopBackOff" => IssueKind::CrashLoopBackOff,
        _ => IssueKind::Unknown,
    }
}

async fn resource_utilization(ctx: &InvestigationContext, report: &SharedReport) -> StepResult {
    if ctx.snapshot.node_usage.is_empty() {
        return Ok(StepOutcome::Skipped("node metrics unavailable".to_string()));
    }

    let mut builder = report.lock().unwrap();
    for usage in &ctx.snapshot.node_usage {
        let pressured = [("cpu", usage.cpu_percent), ("memory", usage.memory_percent)]
            .into_iter()
            .filter(|(_, percent)| *percent >= PRESSURE_THRESHOLD_PERCENT)
            .collect::<Vec<_>>();

        for (resource, percent) in pressured {
            builder.add_finding(Finding {
                category: FindingCategory::ResourcePressure,
                severity: Severity::High,
                title: format!("Node {} {resource} at {percent:.0}%", usage.node),
                description: format!(
                    "Node {} is using {percent:.0}% of its {resource} capacity",
                    usage.node
                ),
                affected_resources: vec![format!("node/{}", usage.node)],
                recommendations: vec![
                    format!("Rebalance workloads away from {}", usage.node),
                    "Review requests and limits of the heaviest pods".to_string(),
                ],
                evidence: vec![format!("{resource} utilization {percent:.1}%")],
                source_tool: SourceTool::Cluster,
            });
        }
    }

    Ok(StepOutcome::Done)
}

async fn event_analysis(ctx: &InvestigationContext, report: &SharedReport) -> StepResult {
    let cutoff = ctx.snapshot.taken_at - ChronoDuration::minutes(EVENT_WINDOW_MINUTES);
    let mut groups: BTreeMap<String, Vec<&crate::models::EventInfo>> = BTreeMap::new();

    for event in &ctx.snapshot.events {
        if event.kind != crate::models::EventKind::Warning || event.last_seen < cutoff {
            continue;
        }
        if let Some(ns) = &ctx.namespace {
            if event.object.namespace.as_deref() != Some(ns.as_str()) {
                continue;
            }
        }
        groups.entry(event.reason.clone()).or_default().push(event);
    }

    let mut builder = report.lock().unwrap();
    for (reason, events) in groups {
        let total: u32 = events.iter().map(|e| e.count.max(1)).sum();
        builder.add_finding(Finding {
            category: FindingCategory::Events,
            severity: Severity::Medium,
            title: format!("{total} warning event(s) with reason {reason}"),
            description: format!(
                "{} object(s) emitted {reason} warnings in the last {EVENT_WINDOW_MINUTES} minutes",
                events.len()
            ),
            affected_resources: events.iter().map(|e| e.object.to_string()).collect(),
            recommendations: reason_recommendations(&reason),
            evidence: events
                .iter()
                .take(3)
                .map(|e| format!("{}: {}", e.object, e.message))
                .collect(),
            source_tool: SourceTool::Cluster,
        });
    }

    Ok(StepOutcome::Done)
}

async fn analyzer_scan(ctx: &InvestigationContext, report: &SharedReport) -> StepResult {
    let diagnostics = match crate::adapters::bounded(
        ctx.call_budget(),
        &ctx.cancel,
        ctx.analyzer.scan(&ctx.cancel, ctx.namespace.as_deref()),
    )
    .await
    {
        Ok(diagnostics) => diagnostics,
        Err(AdapterError::ToolMissing(tool)) => {
            return Ok(StepOutcome::Skipped(format!("analyzer not installed: {tool}")));
        }
        Err(error) => return Err(error.kind().to_string()),
    };

    let mut builder = report.lock().unwrap();
    for diagnostic in diagnostics {
        builder.add_finding(Finding {
            category: FindingCategory::Events,
            severity: diagnostic.severity,
            title: diagnostic.title,
            description: diagnostic.description,
            affected_resources: diagnostic.resource.into_iter().collect(),
            recommendations: vec!["Review the analyzer diagnostic".to_string()],
            evidence: vec![],
            source_tool: SourceTool::Analyzer,
        });
    }

    Ok(StepOutcome::Done)
}

async fn workload_analysis(ctx: &InvestigationContext, report: &SharedReport) -> StepResult {
    let mut builder = report.lock().unwrap();

    for deployment in &ctx.snapshot.deployments {
        if let Some(ns) = &ctx.namespace {
            if &deployment.namespace != ns {
                continue;
            }
        }
        if deployment.available_replicas < deployment.desired_replicas {
            builder.add_finding(Finding {
                category: FindingCategory::PodFailures,
                severity: Severity::Medium,
                title: format!(
                    "Deployment {}/{} has {}/{} replicas available",
                    deployment.namespace,
                    deployment.name,
                    deployment.available_replicas,
                    deployment.desired_replicas
                ),
                description: "Deployment is below its desired replica count".to_string(),
                affected_resources: vec![format!(
                    "deployment/{}/{}",
                    deployment.namespace, deployment.name
                )],
                recommendations: vec![
                    "Check the status of the deployment's pods".to_string(),
                    "Review recent events for the deployment".to_string(),
                ],
                evidence: vec![format!(
                    "availableReplicas={} desiredReplicas={}",
                    deployment.available_replicas, deployment.desired_replicas
                )],
                source_tool: SourceTool::Cluster,
            });
        }
    }

    Ok(StepOutcome::Done)
}

async fn network_analysis(ctx: &InvestigationContext, report: &SharedReport) -> StepResult {
    let mut builder = report.lock().unwrap();

    for service in &ctx.snapshot.services {
        if let Some(ns) = &ctx.namespace {
            if &service.namespace != ns {
                continue;
            }
        }
        if service.selector.is_empty() {
            continue;
        }

        let selects_pod = ctx.snapshot.pods.iter().any(|pod| {
            pod.namespace == service.namespace
                && service
                    .selector
                    .iter()
                    .all(|(key, value)| pod.labels.get(key) == Some(value))
        });

        if !service.has_endpoints {
            builder.add_finding(Finding {
                category: FindingCategory::Network,
                severity: Severity::Medium,
                title: format!("Service {}/{} has no endpoints", service.namespace, service.name),
                description: if selects_pod {
                    "Selector matches pods but none are ready".to_string()
                } else {
                    "Selector does not match any pod".to_string()
                },
                affected_resources: vec![format!("service/{}/{}", service.namespace, service.name)],
                recommendations: vec![
                    "Compare the service selector with pod labels".to_string(),
                    "Check readiness of the backing pods".to_string(),
                ],
                evidence: vec![format!("selector: {:?}", service.selector)],
                source_tool: SourceTool::Cluster,
            });
        }
    }

    Ok(StepOutcome::Done)
}

async fn report_assembly(ctx: &InvestigationContext, report: &SharedReport) -> StepResult {
    let mut builder = report.lock().unwrap();
    let summary = ctx.snapshot.summary();
    let (critical, high) = builder.severity_counts();
    let findings = builder.findings().len();

    let status_word = if critical > 0 {
        "CRITICAL"
    } else if findings > 0 {
        "ISSUES DETECTED"
    } else {
        "OK"
    };

    builder.set_executive_summary(format!(
        "CLUSTER STATUS: {status_word} — {}/{} nodes ready, {}/{} pods running, {findings} findings ({critical} critical, {high} high).",
        summary.nodes_ready, summary.nodes_total, summary.pods_running, summary.pods_total
    ));
    builder.set_cluster_summary(summary);

    Ok(StepOutcome::Done)
}

/// Operator guidance keyed by event or waiting reason
fn reason_recommendations(reason: &str) -> Vec<String> {
    let recommendations: &[&str] = match reason {
        "Failed" => &[
            "Check pod logs",
            "Verify image availability",
            "Check resource limits",
        ],
        "FailedScheduling" | "Unschedulable" => &[
            "Check node resources",
            "Verify node selectors and taints",
            "Review pod scheduling constraints",
        ],
        "ErrImagePull" => &[
            "Verify image name and tag",
            "Check registry credentials",
            "Verify network connectivity to the registry",
        ],
        "ImagePullBackOff" => &[
            "Check image repository access",
            "Verify image pull secrets",
            "Confirm the image tag exists",
        ],
        "CrashLoopBackOff" => &[
            "Inspect the last container logs",
            "Check the container exit code",
            "Review liveness probe configuration",
        ],
        "Unhealthy" => &[
            "Check readiness and liveness probes",
            "Verify application health",
            "Review resource usage",
        ],
        "FailedMount" | "FailedAttachVolume" => &[
            "Check volume configuration",
            "Verify PVC status",
            "Check the storage class",
        ],
        "BackOff" => &["Inspect container logs", "Review recent pod events"],
        "Evicted" => &[
            "Check node resource pressure",
            "Review pod resource requests",
        ],
        _ => &[
            "Review event details",
            "Check related resources",
            "Verify configuration",
        ],
    };
    recommendations.iter().map(|s| s.to_string()).collect()
}
