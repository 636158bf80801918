//! Cluster adapter backed by the `kubectl` binary
//!
//! Shells out to `kubectl … -o json` and converts the raw API objects into
//! the typed snapshot views. Every subprocess call is bounded by the
//! configured adapter timeout and the investigation's cancellation token.

use super::{bounded, async_trait, ClusterAdapter};
use crate::cancel::CancelToken;
use crate::error::{AdapterError, AdapterResult};
use crate::models::{
    ClusterSnapshot, ContainerState, ContainerStatusInfo, DeploymentInfo, EventInfo, EventKind,
    NodeInfo, NodeUsage, ObjectRef, PodInfo, PodPhase, ServiceInfo,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub struct KubectlCluster {
    kubectl_path: String,
    call_timeout: Duration,
}

impl KubectlCluster {
    pub fn new(kubectl_path: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            kubectl_path: kubectl_path.into(),
            call_timeout,
        }
    }

    async fn run(&self, cancel: &CancelToken, args: &[&str]) -> AdapterResult<String> {
        let path = self.kubectl_path.clone();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();

        bounded(self.call_timeout, cancel, async move {
            let output = Command::new(&path)
                .args(&args)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| AdapterError::Unavailable(format!("kubectl: {e}")))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(AdapterError::Unavailable(
                    stderr.trim().chars().take(300).collect(),
                ));
            }

            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        })
        .await
    }

    async fn run_json(&self, cancel: &CancelToken, args: &[&str]) -> AdapterResult<Value> {
        let stdout = self.run(cancel, args).await?;
        serde_json::from_str(&stdout)
            .map_err(|e| AdapterError::Malformed(format!("kubectl json: {e}")))
    }
}

#[async_trait]
impl ClusterAdapter for KubectlCluster {
    async fn snapshot(&self, cancel: &CancelToken) -> AdapterResult<ClusterSnapshot> {
        let taken_at = Utc::now();

        let nodes = self.run_json(cancel, &["get", "nodes", "-o", "json"]).await?;
        let pods = self
            .run_json(cancel, &["get", "pods", "-A", "-o", "json"])
            .await?;
        let events = self
            .run_json(cancel, &["get", "events", "-A", "-o", "json"])
            .await?;
        let deployments = self
            .run_json(cancel, &["get", "deployments", "-A", "-o", "json"])
            .await?;
        let services = self
            .run_json(cancel, &["get", "services", "-A", "-o", "json"])
            .await?;
        let endpoints = self
            .run_json(cancel, &["get", "endpoints", "-A", "-o", "json"])
            .await?;
        let namespaces = self
            .run_json(cancel, &["get", "namespaces", "-o", "json"])
            .await?;

        // metrics-server is optional; a failure here only drops utilization
        let node_usage = match self
            .run(cancel, &["top", "nodes", "--no-headers"])
            .await
        {
            Ok(text) => parse_top_nodes(&text),
            Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
            Err(e) => {
                debug!(error = %e, "node metrics unavailable");
                Vec::new()
            }
        };

        Ok(ClusterSnapshot {
            taken_at,
            nodes: parse_nodes(&nodes),
            pods: parse_pods(&pods, taken_at),
            events: parse_events(&events),
            deployments: parse_deployments(&deployments),
            services: parse_services(&services, &endpoints),
            namespaces: parse_names(&namespaces),
            node_usage,
        })
    }

    async fn pod_logs(
        &self,
        cancel: &CancelToken,
        namespace: &str,
        name: &str,
        tail_lines: usize,
    ) -> AdapterResult<String> {
        let tail = format!("--tail={tail_lines}");
        self.run(cancel, &["logs", "-n", namespace, name, &tail]).await
    }

    async fn events(
        &self,
        cancel: &CancelToken,
        target: Option<&ObjectRef>,
    ) -> AdapterResult<Vec<EventInfo>> {
        let value = match target {
            Some(object) => {
                let selector = format!("involvedObject.name={}", object.name);
                match &object.namespace {
                    Some(ns) => {
                        self.run_json(
                            cancel,
                            &["get", "events", "-n", ns, "--field-selector", &selector, "-o", "json"],
                        )
                        .await?
                    }
                    None => {
                        self.run_json(
                            cancel,
                            &["get", "events", "-A", "--field-selector", &selector, "-o", "json"],
                        )
                        .await?
                    }
                }
            }
            None => self.run_json(cancel, &["get", "events", "-A", "-o", "json"]).await?,
        };

        Ok(parse_events(&value))
    }
}

fn items(value: &Value) -> &[Value] {
    value
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> &'a str {
    let mut cur = value;
    for key in path {
        match cur.get(key) {
            Some(next) => cur = next,
            None => return "",
        }
    }
    cur.as_str().unwrap_or_default()
}

fn parse_nodes(value: &Value) -> Vec<NodeInfo> {
    items(value)
        .iter()
        .map(|node| {
            let name = str_at(node, &["metadata", "name"]).to_string();
            let conditions = node
                .pointer("/status/conditions")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            let ready = conditions.iter().any(|c| {
                str_at(c, &["type"]) == "Ready" && str_at(c, &["status"]) == "True"
            });
            let pressure = conditions
                .iter()
                .filter(|c| {
                    matches!(
                        str_at(c, &["type"]),
                        "MemoryPressure" | "DiskPressure" | "PIDPressure"
                    ) && str_at(c, &["status"]) == "True"
                })
                .map(|c| str_at(c, &["type"]).to_string())
                .collect();

            NodeInfo { name, ready, pressure }
        })
        .collect()
}

fn parse_container_statuses(pod: &Value, field: &str, init: bool) -> Vec<ContainerStatusInfo> {
    pod.pointer(&format!("/status/{field}"))
        .and_then(Value::as_array)
        .map(|statuses| {
            statuses
                .iter()
                .map(|status| ContainerStatusInfo {
                    name: str_at(status, &["name"]).to_string(),
                    image: str_at(status, &["image"]).to_string(),
                    state: parse_container_state(status.get("state")),
                    restart_count: status
                        .get("restartCount")
                        .and_then(Value::as_u64)
                        .unwrap_or(0) as u32,
                    init,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_container_state(state: Option<&Value>) -> ContainerState {
    let Some(state) = state else {
        return ContainerState::Running;
    };
    if let Some(waiting) = state.get("waiting") {
        return ContainerState::Waiting {
            reason: str_at(waiting, &["reason"]).to_string(),
            message: str_at(waiting, &["message"]).to_string(),
        };
    }
    if let Some(terminated) = state.get("terminated") {
        return ContainerState::Terminated {
            reason: str_at(terminated, &["reason"]).to_string(),
            exit_code: terminated
                .get("exitCode")
                .and_then(Value::as_i64)
                .unwrap_or(0) as i32,
            message: str_at(terminated, &["message"]).to_string(),
        };
    }
    ContainerState::Running
}

fn parse_pods(value: &Value, now: DateTime<Utc>) -> Vec<PodInfo> {
    items(value)
        .iter()
        .map(|pod| {
            let created = str_at(pod, &["metadata", "creationTimestamp"]);
            let age_seconds = DateTime::parse_from_rfc3339(created)
                .map(|t| (now - t.with_timezone(&Utc)).num_seconds())
                .unwrap_or(0);

            let controller = pod
                .pointer("/metadata/ownerReferences/0")
                .map(|owner| {
                    format!("{}/{}", str_at(owner, &["kind"]), str_at(owner, &["name"]))
                });

            let labels: BTreeMap<String, String> = pod
                .pointer("/metadata/labels")
                .and_then(Value::as_object)
                .map(|map| {
                    map.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default();

            let mut containers = parse_container_statuses(pod, "containerStatuses", false);
            containers.extend(parse_container_statuses(pod, "initContainerStatuses", true));

            PodInfo {
                namespace: str_at(pod, &["metadata", "namespace"]).to_string(),
                name: str_at(pod, &["metadata", "name"]).to_string(),
                controller,
                phase: match str_at(pod, &["status", "phase"]) {
                    "Running" => PodPhase::Running,
                    "Pending" => PodPhase::Pending,
                    "Succeeded" => PodPhase::Succeeded,
                    "Failed" => PodPhase::Failed,
                    _ => PodPhase::Unknown,
                },
                containers,
                labels,
                age_seconds,
            }
        })
        .collect()
}

fn parse_events(value: &Value) -> Vec<EventInfo> {
    items(value)
        .iter()
        .map(|event| {
            let parse_time = |field: &str| {
                DateTime::parse_from_rfc3339(str_at(event, &[field]))
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now())
            };

            EventInfo {
                kind: if str_at(event, &["type"]) == "Warning" {
                    EventKind::Warning
                } else {
                    EventKind::Normal
                },
                reason: str_at(event, &["reason"]).to_string(),
                object: ObjectRef {
                    kind: str_at(event, &["involvedObject", "kind"]).to_string(),
                    namespace: event
                        .pointer("/involvedObject/namespace")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    name: str_at(event, &["involvedObject", "name"]).to_string(),
                },
                message: str_at(event, &["message"]).to_string(),
                first_seen: parse_time("firstTimestamp"),
                last_seen: parse_time("lastTimestamp"),
                count: event.get("count").and_then(Value::as_u64).unwrap_or(1) as u32,
            }
        })
        .collect()
}

fn parse_deployments(value: &Value) -> Vec<DeploymentInfo> {
    items(value)
        .iter()
        .map(|dep| DeploymentInfo {
            namespace: str_at(dep, &["metadata", "namespace"]).to_string(),
            name: str_at(dep, &["metadata", "name"]).to_string(),
            desired_replicas: dep
                .pointer("/spec/replicas")
                .and_then(Value::as_i64)
                .unwrap_or(0) as i32,
            available_replicas: dep
                .pointer("/status/availableReplicas")
                .and_then(Value::as_i64)
                .unwrap_or(0) as i32,
        })
        .collect()
}

fn parse_services(services: &Value, endpoints: &Value) -> Vec<ServiceInfo> {
    // An endpoints object with at least one ready address marks the service
    // as reachable.
    let backed: HashSet<(String, String)> = items(endpoints)
        .iter()
        .filter(|ep| {
            ep.pointer("/subsets")
                .and_then(Value::as_array)
                .map(|subsets| {
                    subsets.iter().any(|s| {
                        s.get("addresses")
                            .and_then(Value::as_array)
                            .is_some_and(|a| !a.is_empty())
                    })
                })
                .unwrap_or(false)
        })
        .map(|ep| {
            (
                str_at(ep, &["metadata", "namespace"]).to_string(),
                str_at(ep, &["metadata", "name"]).to_string(),
            )
        })
        .collect();

    items(services)
        .iter()
        .map(|svc| {
            let namespace = str_at(svc, &["metadata", "namespace"]).to_string();
            let name = str_at(svc, &["metadata", "name"]).to_string();
            let selector: BTreeMap<String, String> = svc
                .pointer("/spec/selector")
                .and_then(Value::as_object)
                .map(|map| {
                    map.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            let has_endpoints = backed.contains(&(namespace.clone(), name.clone()));

            ServiceInfo {
                namespace,
                name,
                selector,
                has_endpoints,
            }
        })
        .collect()
}

fn parse_names(value: &Value) -> Vec<String> {
    items(value)
        .iter()
        .map(|item| str_at(item, &["metadata", "name"]).to_string())
        .collect()
}

/// Parse `kubectl top nodes --no-headers` output:
/// `node-1   250m   12%   800Mi   42%`
fn parse_top_nodes(text: &str) -> Vec<NodeUsage> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                return None;
            }
            let percent = |s: &str| s.trim_end_matches('%').parse::<f64>().ok();
            Some(NodeUsage {
                node: fields[0].to_string(),
                cpu_percent: percent(fields[2])?,
                memory_percent: percent(fields[4])?,
            })
        })
        .collect()
}
