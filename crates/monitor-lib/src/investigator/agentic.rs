//! Knowledge-augmented plan-act-observe investigator
//!
//! Drives a bounded loop against the LLM adapter: every iteration either
//! requests one tool call or returns final findings. The loop always begins
//! with a knowledge query for the triggering issue kind so company policy is
//! in context, and findings must cite the knowledge section that justified
//! them to count as policy-backed.

use super::{async_trait, InvestigationContext, Investigator};
use crate::adapters::bounded;
use crate::error::AdapterError;
use crate::knowledge::DEFAULT_TOP_K;
use crate::models::{
    Finding, FindingCategory, InvestigationMode, ObjectRef, ReportStatus, Severity, SourceTool,
    StepStatus,
};
use crate::report::SharedReport;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Instant;
use tracing::debug;

/// Upper bound on pod log lines a tool call may request
const MAX_LOG_TAIL: usize = 200;

/// Transcript budget in characters; oldest entries are dropped first
const TRANSCRIPT_BUDGET: usize = 6_000;

/// Per-observation truncation
const OBSERVATION_LIMIT: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
enum ToolName {
    #[serde(rename = "getPodStatus")]
    GetPodStatus,
    #[serde(rename = "getPodLogs")]
    GetPodLogs,
    #[serde(rename = "listEventsForObject")]
    ListEventsForObject,
    #[serde(rename = "analyzeNamespace")]
    AnalyzeNamespace,
    #[serde(rename = "queryKnowledge")]
    QueryKnowledge,
}

impl ToolName {
    fn as_str(&self) -> &'static str {
        match self {
            ToolName::GetPodStatus => "getPodStatus",
            ToolName::GetPodLogs => "getPodLogs",
            ToolName::ListEventsForObject => "listEventsForObject",
            ToolName::AnalyzeNamespace => "analyzeNamespace",
            ToolName::QueryKnowledge => "queryKnowledge",
        }
    }
}

/// One reply from the model: a tool request or the final findings
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AgentReply {
    ToolCall {
        tool: ToolName,
        #[serde(default)]
        args: Value,
    },
    Final {
        final_findings: Vec<LlmFinding>,
    },
}

#[derive(Debug, Deserialize)]
struct LlmFinding {
    category: String,
    severity: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    affected_resources: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    knowledge_ref: Option<String>,
}

pub struct AgenticInvestigator;

#[async_trait]
impl Investigator for AgenticInvestigator {
    fn mode(&self) -> InvestigationMode {
        InvestigationMode::Agentic
    }

    async fn investigate(&self, ctx: &InvestigationContext, report: &SharedReport) -> ReportStatus {
        report
            .lock()
            .unwrap()
            .set_cluster_summary(ctx.snapshot.summary());

        let mut transcript: Vec<String> = Vec::new();
        let mut cited_refs: HashSet<String> = HashSet::new();

        // The loop always opens with company knowledge for the issue kind.
        let opening_topic = ctx
            .issues
            .first()
            .map(|issue| issue.kind.as_str().to_string())
            .unwrap_or_else(|| "cluster health".to_string());
        let hits = ctx.knowledge.query(&opening_topic, DEFAULT_TOP_K);
        for hit in &hits {
            cited_refs.insert(hit.reference());
        }
        push_observation(
            &mut transcript,
            "queryKnowledge",
            &serde_json::to_string(&hits).unwrap_or_default(),
        );
        record_step(ctx, report, "queryKnowledge", StepStatus::Completed, 0, None);

        for iteration in 1..=ctx.max_iterations {
            if ctx.cancel.is_cancelled() {
                return ReportStatus::Cancelled;
            }
            if ctx.deadline_passed() {
                return ReportStatus::TimedOut;
            }

            let prompt = build_prompt(ctx, &transcript);
            let started = Instant::now();
            let reply = bounded(ctx.remaining(), &ctx.cancel, ctx.llm.complete(&ctx.cancel, &prompt))
                .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let text = match reply {
                Ok(text) => text,
                Err(AdapterError::Cancelled) => return ReportStatus::Cancelled,
                Err(AdapterError::RateLimited) => {
                    record_step(
                        ctx,
                        report,
                        "llm_call",
                        StepStatus::Failed,
                        elapsed_ms,
                        Some("rate_limited".to_string()),
                    );
                    ctx.bus.log_error(
                        "investigator",
                        "llm_rate_limited",
                        Some(json!({"report_id": report.lock().unwrap().id()})),
                    );
                    return ReportStatus::Failed;
                }
                Err(AdapterError::Timeout(_)) => {
                    // A timed out model call ends the loop; whatever was
                    // gathered so far still seals.
                    record_step(
                        ctx,
                        report,
                        "llm_call",
                        StepStatus::Failed,
                        elapsed_ms,
                        Some("adapter_timeout".to_string()),
                    );
                    break;
                }
                Err(error) => {
                    record_step(
                        ctx,
                        report,
                        "llm_call",
                        StepStatus::Failed,
                        elapsed_ms,
                        Some(error.kind().to_string()),
                    );
                    return ReportStatus::Failed;
                }
            };

            match parse_reply(&text) {
                Ok(AgentReply::Final { final_findings }) => {
                    let mut builder = report.lock().unwrap();
                    for llm_finding in final_findings {
                        builder.add_finding(convert_finding(llm_finding, &cited_refs, ctx));
                    }
                    let index = builder.record_step(
                        "final_findings",
                        StepStatus::Completed,
                        elapsed_ms,
                        None,
                    );
                    let id = builder.id().to_string();
                    finish_summary(&mut builder, ctx);
                    drop(builder);
                    ctx.log_step(&id, index, "final_findings", StepStatus::Completed);
                    return ReportStatus::Completed;
                }
                Ok(AgentReply::ToolCall { tool, args }) => {
                    debug!(iteration, tool = tool.as_str(), "executing tool call");
                    let observation = execute_tool(ctx, tool, &args, &mut cited_refs).await;
                    push_observation(&mut transcript, tool.as_str(), &observation);
                    record_step(ctx, report, tool.as_str(), StepStatus::Completed, elapsed_ms, None);
                }
                Err(parse_error) => {
                    // Malformed replies consume an iteration and leave a trace
                    // in the findings.
                    let mut builder = report.lock().unwrap();
                    builder.add_finding(Finding {
                        category: FindingCategory::KnowledgeGap,
                        severity: Severity::Low,
                        title: format!("Unparseable model reply in iteration {iteration}"),
                        description: parse_error.clone(),
                        affected_resources: vec![],
                        recommendations: vec![],
                        evidence: vec![text.chars().take(300).collect()],
                        source_tool: SourceTool::Llm,
                    });
                    let index = builder.record_step(
                        "parse_reply",
                        StepStatus::Failed,
                        elapsed_ms,
                        Some("llm_malformed".to_string()),
                    );
                    let id = builder.id().to_string();
                    drop(builder);
                    ctx.log_step(&id, index, "parse_reply", StepStatus::Failed);
                }
            }
        }

        // Iteration budget or model-call timeout exhausted
        let mut builder = report.lock().unwrap();
        finish_summary(&mut builder, ctx);
        ReportStatus::TimedOut
    }
}

fn record_step(
    ctx: &InvestigationContext,
    report: &SharedReport,
    name: &str,
    status: StepStatus,
    duration_ms: u64,
    error: Option<String>,
) {
    let (id, index) = {
        let mut builder = report.lock().unwrap();
        let index = builder.record_step(name, status, duration_ms, error);
        (builder.id().to_string(), index)
    };
    ctx.log_step(&id, index, name, status);
}

fn finish_summary(builder: &mut crate::report::ReportBuilder, ctx: &InvestigationContext) {
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
}

fn push_observation(transcript: &mut Vec<String>, tool: &str, observation: &str) {
    let truncated: String = observation.chars().take(OBSERVATION_LIMIT).collect();
    transcript.push(format!("[{tool}] {truncated}"));

    let mut total: usize = transcript.iter().map(String::len).sum();
    while total > TRANSCRIPT_BUDGET && transcript.len() > 1 {
        let removed = transcript.remove(0);
        total -= removed.len();
    }
}

fn build_prompt(ctx: &InvestigationContext, transcript: &[String]) -> String {
    let issue_block = ctx
        .issues
        .iter()
        .map(|issue| {
            format!(
                "- {} ({}) at {}{}: {}",
                issue.kind.as_str(),
                issue.severity,
                issue
                    .target
                    .namespace
                    .as_deref()
                    .map(|ns| format!("{ns}/"))
                    .unwrap_or_default(),
                issue.target.name,
                issue.evidence.join("; ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are investigating a Kubernetes anomaly. Reply with exactly one JSON object and nothing else.\n\
         \n\
         Issue(s) under investigation:\n{issue_block}\n\
         \n\
         Available tools (reply {{\"tool\": name, \"args\": {{…}}}}):\n\
         - getPodStatus: args namespace, name\n\
         - getPodLogs: args namespace, name, tailLines (max {MAX_LOG_TAIL})\n\
         - listEventsForObject: args kind, namespace, name\n\
         - analyzeNamespace: args namespace (optional)\n\
         - queryKnowledge: args topic\n\
         \n\
         When you have enough evidence, reply {{\"final_findings\": [{{\"category\", \"severity\", \"title\", \"description\", \"affected_resources\", \"recommendations\", \"evidence\", \"knowledge_ref\"}}]}}.\n\
         Categories: pod_failures, node_health, resource_pressure, image_policy, network, storage, events, knowledge_gap.\n\
         Severities: critical, high, medium, low.\n\
         Cite the knowledge section id from a queryKnowledge result as knowledge_ref whenever a recommendation follows company policy.\n\
         \n\
         Observations so far:\n{}\n",
        transcript.join("\n")
    )
}

/// Pull the JSON object out of a possibly fenced or chatty reply
fn parse_reply(text: &str) -> Result<AgentReply, String> {
    let start = text.find('{').ok_or("no JSON object in reply")?;
    let end = text.rfind('}').ok_or("unterminated JSON object in reply")?;
    if end < start {
        return Err("unterminated JSON object in reply".to_string());
    }
    serde_json::from_str(&text[start..=end]).map_err(|e| format!("invalid reply: {e}"))
}

async fn execute_tool(
    ctx: &InvestigationContext,
    tool: ToolName,
    args: &Value,
    cited_refs: &mut HashSet<String>,
) -> String {
    let str_arg = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or_default();

    match tool {
        ToolName::GetPodStatus => {
            let (namespace, name) = (str_arg("namespace"), str_arg("name"));
            match ctx
                .snapshot
                .pods
                .iter()
                .find(|p| p.namespace == namespace && p.name == name)
            {
                Some(pod) => serde_json::to_string(pod).unwrap_or_default(),
                None => format!("pod {namespace}/{name} not found in the current snapshot"),
            }
        }
        ToolName::GetPodLogs => {
            let (namespace, name) = (str_arg("namespace"), str_arg("name"));
            let tail = args
                .get("tailLines")
                .and_then(Value::as_u64)
                .unwrap_or(100)
                .min(MAX_LOG_TAIL as u64) as usize;
            match bounded(
                ctx.call_budget(),
                &ctx.cancel,
                ctx.cluster.pod_logs(&ctx.cancel, namespace, name, tail),
            )
            .await
            {
                Ok(logs) if logs.is_empty() => "no log output".to_string(),
                Ok(logs) => logs,
                Err(error) => format!("log fetch failed: {error}"),
            }
        }
        ToolName::ListEventsForObject => {
            let object = ObjectRef {
                kind: str_arg("kind").to_string(),
                namespace: Some(str_arg("namespace").to_string()).filter(|s| !s.is_empty()),
                name: str_arg("name").to_string(),
            };
            match bounded(
                ctx.call_budget(),
                &ctx.cancel,
                ctx.cluster.events(&ctx.cancel, Some(&object)),
            )
            .await
            {
                Ok(events) => serde_json::to_string(&events).unwrap_or_default(),
                Err(error) => format!("event listing failed: {error}"),
            }
        }
        ToolName::AnalyzeNamespace => {
            let namespace = Some(str_arg("namespace")).filter(|s| !s.is_empty());
            match bounded(
                ctx.call_budget(),
                &ctx.cancel,
                ctx.analyzer.scan(&ctx.cancel, namespace),
            )
            .await
            {
                Ok(diagnostics) => serde_json::to_string(&diagnostics).unwrap_or_default(),
                Err(error) => format!("analyzer failed: {error}"),
            }
        }
        ToolName::QueryKnowledge => {
            let hits = ctx.knowledge.query(str_arg("topic"), DEFAULT_TOP_K);
            for hit in &hits {
                cited_refs.insert(hit.reference());
            }
            serde_json::to_string(&hits).unwrap_or_default()
        }
    }
}

/// Convert an LLM finding, validating the knowledge citation.
///
/// A valid citation makes the finding policy-backed; without one the
/// finding is downgraded to a knowledge gap attributed to the model alone.
fn convert_finding(
    llm_finding: LlmFinding,
    cited_refs: &HashSet<String>,
    ctx: &InvestigationContext,
) -> Finding {
    let severity = serde_json::from_value::<Severity>(Value::String(llm_finding.severity.clone()))
        .unwrap_or(Severity::Medium);
    let category =
        serde_json::from_value::<FindingCategory>(Value::String(llm_finding.category.clone()))
            .unwrap_or(FindingCategory::KnowledgeGap);

    let citation = llm_finding.knowledge_ref.as_ref().filter(|reference| {
        cited_refs.contains(*reference) || ctx.knowledge.has_reference(reference)
    });

    let mut evidence = llm_finding.evidence;
    match citation {
        Some(reference) => {
            evidence.push(format!("knowledge: {reference}"));
            Finding {
                category,
                severity,
                title: llm_finding.title,
                description: llm_finding.description,
                affected_resources: llm_finding.affected_resources,
                recommendations: llm_finding.recommendations,
                evidence,
                source_tool: SourceTool::Knowledge,
            }
        }
        None => Finding {
            category: FindingCategory::KnowledgeGap,
            severity,
            title: llm_finding.title,
            description: llm_finding.description,
            affected_resources: llm_finding.affected_resources,
            recommendations: llm_finding.recommendations,
            evidence,
            source_tool: SourceTool::Llm,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AnalyzerAdapter, ClusterAdapter, LlmAdapter};
    use crate::bus::EventBus;
    use crate::cancel::CancelToken;
    use crate::error::{AdapterError, AdapterResult};
    use crate::knowledge::KnowledgeIndex;
    use crate::models::*;
    use crate::report::ReportBuilder;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct StaticCluster {
        snapshot: ClusterSnapshot,
    }

    #[async_trait]
    impl ClusterAdapter for StaticCluster {
        async fn snapshot(&self, _cancel: &CancelToken) -> AdapterResult<ClusterSnapshot> {
            Ok(self.snapshot.clone())
        }

        async fn pod_logs(
            &self,
            _cancel: &CancelToken,
            _namespace: &str,
            _name: &str,
            _tail_lines: usize,
        ) -> AdapterResult<String> {
            Ok("standard_init_linux.go: exec failed".to_string())
        }

        async fn events(
            &self,
            _cancel: &CancelToken,
            _target: Option<&ObjectRef>,
        ) -> AdapterResult<Vec<EventInfo>> {
            Ok(vec![])
        }
    }

    struct EmptyAnalyzer;

    #[async_trait]
    impl AnalyzerAdapter for EmptyAnalyzer {
        async fn scan(
            &self,
            _cancel: &CancelToken,
            _namespace: Option<&str>,
        ) -> AdapterResult<Vec<Diagnostic>> {
            Ok(vec![])
        }
    }

    /// LLM fake that replays a script of replies
    struct ScriptedLlm {
        replies: Mutex<Vec<Result<String, AdapterError>>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String, AdapterError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
            }
        }
    }

    #[async_trait]
    impl LlmAdapter for ScriptedLlm {
        fn enabled(&self) -> bool {
            true
        }

        async fn complete(&self, _cancel: &CancelToken, _prompt: &str) -> AdapterResult<String> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Ok("{\"tool\": \"queryKnowledge\", \"args\": {\"topic\": \"anything\"}}".to_string());
            }
            replies.remove(0)
        }
    }

    fn issue() -> Issue {
        Issue {
            kind: IssueKind::ImagePullBackOff,
            severity: Severity::High,
            target: IssueTarget {
                kind: "Pod".to_string(),
                namespace: Some("frontend".to_string()),
                name: "broken-image-app-x".to_string(),
                container: Some("app".to_string()),
            },
            evidence: vec!["Back-off pulling image".to_string()],
            primary_reason: "ImagePullBackOff".to_string(),
            fingerprint: "deadbeef00112233".to_string(),
            observed_at: chrono::Utc::now(),
        }
    }

    fn snapshot() -> ClusterSnapshot {
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
                containers: vec![],
                labels: BTreeMap::new(),
                age_seconds: 500,
            }],
            ..ClusterSnapshot::empty(chrono::Utc::now())
        }
    }

    fn corpus() -> KnowledgeIndex {
        KnowledgeIndex::from_documents(vec![(
            "incident_playbook.md".to_string(),
            "# ImagePullBackOff Investigation\nUse only approved registry images.\n".to_string(),
        )])
    }

    fn context(llm: Arc<dyn LlmAdapter>, knowledge: KnowledgeIndex) -> InvestigationContext {
        InvestigationContext {
            issues: vec![issue()],
            namespace: Some("frontend".to_string()),
            snapshot: snapshot(),
            cluster: Arc::new(StaticCluster { snapshot: snapshot() }),
            analyzer: Arc::new(EmptyAnalyzer),
            llm,
            knowledge: Arc::new(knowledge),
            bus: EventBus::new(),
            cancel: CancelToken::never(),
            adapter_timeout: Duration::from_secs(1),
            deadline: tokio::time::Instant::now() + Duration::from_secs(30),
            max_iterations: 4,
        }
    }

    fn new_report() -> crate::report::SharedReport {
        ReportBuilder::new(
            "agt_000001".to_string(),
            InvestigationMode::Agentic,
            chrono::Utc::now(),
            vec!["deadbeef00112233".to_string()],
        )
    }

    #[tokio::test]
    async fn test_cited_final_findings_are_knowledge_backed() {
        let final_reply = serde_json::json!({
            "final_findings": [{
                "category": "image_policy",
                "severity": "high",
                "title": "Unapproved image tag",
                "description": "nginx:nonexistent-tag is not in the approved registry",
                "affected_resources": ["frontend/broken-image-app-x"],
                "recommendations": ["Use the approved registry image"],
                "evidence": ["Back-off pulling image"],
                "knowledge_ref": "incident_playbook#imagepullbackoff_investigation"
            }]
        })
        .to_string();

        let ctx = context(Arc::new(ScriptedLlm::new(vec![Ok(final_reply)])), corpus());
        let report = new_report();

        let status = AgenticInvestigator.investigate(&ctx, &report).await;
        assert_eq!(status, ReportStatus::Completed);

        let outcome = report
            .lock()
            .unwrap()
            .outcome(ReportStatus::Completed, chrono::Utc::now());
        assert_eq!(outcome.findings.len(), 1);
        let finding = &outcome.findings[0];
        assert_eq!(finding.source_tool, SourceTool::Knowledge);
        assert_eq!(finding.category, FindingCategory::ImagePolicy);
        assert!(finding
            .evidence
            .iter()
            .any(|e| e.contains("incident_playbook#imagepullbackoff_investigation")));
        assert!(outcome.executive_summary.starts_with("CLUSTER STATUS:"));
    }

    #[tokio::test]
    async fn test_uncited_findings_become_knowledge_gaps() {
        let final_reply = serde_json::json!({
            "final_findings": [{
                "category": "image_policy",
                "severity": "high",
                "title": "Unapproved image tag",
                "description": "no citation given"
            }]
        })
        .to_string();

        let ctx = context(
            Arc::new(ScriptedLlm::new(vec![Ok(final_reply)])),
            KnowledgeIndex::empty(),
        );
        let report = new_report();

        let status = AgenticInvestigator.investigate(&ctx, &report).await;
        assert_eq!(status, ReportStatus::Completed);

        let outcome = report
            .lock()
            .unwrap()
            .outcome(ReportStatus::Completed, chrono::Utc::now());
        assert_eq!(outcome.findings[0].category, FindingCategory::KnowledgeGap);
        assert_eq!(outcome.findings[0].source_tool, SourceTool::Llm);
    }

    #[tokio::test]
    async fn test_tool_call_then_final() {
        let tool_reply =
            "{\"tool\": \"getPodStatus\", \"args\": {\"namespace\": \"frontend\", \"name\": \"broken-image-app-x\"}}"
                .to_string();
        let final_reply = serde_json::json!({"final_findings": []}).to_string();

        let ctx = context(
            Arc::new(ScriptedLlm::new(vec![Ok(tool_reply), Ok(final_reply)])),
            corpus(),
        );
        let report = new_report();

        let status = AgenticInvestigator.investigate(&ctx, &report).await;
        assert_eq!(status, ReportStatus::Completed);

        let outcome = report
            .lock()
            .unwrap()
            .outcome(ReportStatus::Completed, chrono::Utc::now());
        let names: Vec<&str> = outcome.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["queryKnowledge", "getPodStatus", "final_findings"]);
    }

    #[tokio::test]
    async fn test_malformed_reply_counts_iteration_and_records_gap() {
        let ctx = context(
            Arc::new(ScriptedLlm::new(vec![
                Ok("this is not json at all".to_string()),
                Ok(serde_json::json!({"final_findings": []}).to_string()),
            ])),
            corpus(),
        );
        let report = new_report();

        let status = AgenticInvestigator.investigate(&ctx, &report).await;
        assert_eq!(status, ReportStatus::Completed);

        let outcome = report
            .lock()
            .unwrap()
            .outcome(ReportStatus::Completed, chrono::Utc::now());
        assert!(outcome
            .findings
            .iter()
            .any(|f| f.category == FindingCategory::KnowledgeGap
                && f.title.contains("iteration 1")));
        assert!(outcome
            .steps
            .iter()
            .any(|s| s.name == "parse_reply" && s.status == StepStatus::Failed));
    }

    #[tokio::test]
    async fn test_rate_limited_seals_failed() {
        let ctx = context(
            Arc::new(ScriptedLlm::new(vec![Err(AdapterError::RateLimited)])),
            corpus(),
        );
        let report = new_report();

        let status = AgenticInvestigator.investigate(&ctx, &report).await;
        assert_eq!(status, ReportStatus::Failed);
    }

    #[tokio::test]
    async fn test_iteration_budget_exhaustion_times_out() {
        // Scripted fake falls back to endless tool calls
        let ctx = context(Arc::new(ScriptedLlm::new(vec![])), corpus());
        let report = new_report();

        let status = AgenticInvestigator.investigate(&ctx, &report).await;
        assert_eq!(status, ReportStatus::TimedOut);

        let outcome = report
            .lock()
            .unwrap()
            .outcome(ReportStatus::TimedOut, chrono::Utc::now());
        // Opening knowledge step plus one step per iteration
        assert_eq!(outcome.steps.len(), 1 + 4);
    }

    #[tokio::test]
    async fn test_empty_corpus_still_completes() {
        let final_reply = serde_json::json!({
            "final_findings": [{
                "category": "pod_failures",
                "severity": "medium",
                "title": "no policy available"
            }]
        })
        .to_string();

        let ctx = context(
            Arc::new(ScriptedLlm::new(vec![Ok(final_reply)])),
            KnowledgeIndex::empty(),
        );
        let report = new_report();

        let status = AgenticInvestigator.investigate(&ctx, &report).await;
        assert_eq!(status, ReportStatus::Completed);

        let outcome = report
            .lock()
            .unwrap()
            .outcome(ReportStatus::Completed, chrono::Utc::now());
        assert_eq!(outcome.findings[0].category, FindingCategory::KnowledgeGap);
    }

    #[test]
    fn test_parse_reply_strips_fences() {
        let fenced = "```json\n{\"final_findings\": []}\n```";
        assert!(matches!(
            parse_reply(fenced),
            Ok(AgentReply::Final { .. })
        ));
    }
}
