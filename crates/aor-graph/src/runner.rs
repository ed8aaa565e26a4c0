// AOR Graph - Graph runner
//
// Executes a validated graph: idempotency short-circuit, transformer and
// middleware hooks around each node, checkpoint after every successful
// transition, suspension on HITL markers, and a resume entry point keyed by
// the suspension token. No error escapes the runner as a panic or raw Err
// for in-graph failures; a failed run is a FAILED report.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::events::{
    GraphEventPublisher, HitlRequiredEvent, NodeExecutionEvent, WorkflowCompletedEvent,
};
use crate::graph::{Graph, ValidationPipeline};
use crate::hitl::{response_error, HitlResponse, HitlResponseStatus};
use crate::idempotency::IdempotencyStore;
use crate::middleware::{ErrorAction, Middleware, Next, NodeRequest, RunContext};
use crate::node::{NodeContext, NodeResult, PREVIOUS_KEY};
use crate::state::{RunState, RunStateMachine};
use crate::transformer::TransformerChain;
use aor_core::{catching_async, current_execution_context, AorError, AorResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// State key consulted for the idempotency key when the ambient context
/// carries no causation id.
pub const IDEMPOTENCY_KEY: &str = "_idempotency_key";

/// Outcome of one node within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Success,
    Failed,
    Waiting,
    Cancelled,
    Recovered,
    Suppressed,
}

/// Per-node execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    pub node_id: String,
    pub status: NodeStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final report of a graph run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub graph_id: String,
    pub run_id: String,
    pub status: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AorError>,
    pub duration_ms: u64,
    pub node_reports: Vec<NodeReport>,
    /// Present while the run is WAITING; feed it to `resume`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumption_token: Option<String>,
}

/// Runner knobs.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Consult the idempotency store before running
    pub enable_idempotency: bool,

    /// Publish lifecycle events when a bus is attached
    pub enable_events: bool,

    /// TTL of stored idempotency entries
    pub idempotency_ttl: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            enable_idempotency: true,
            enable_events: true,
            idempotency_ttl: Duration::from_secs(600),
        }
    }
}

enum RunOutcome {
    Success,
    Failed(AorError),
    Cancelled,
    Waiting { token: String },
}

/// Executes runs of one graph.
pub struct GraphRunner {
    graph: Arc<Graph>,
    transformers: TransformerChain,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    idempotency: Option<Arc<dyn IdempotencyStore>>,
    events: Option<GraphEventPublisher>,
    config: RunnerConfig,
}

impl GraphRunner {
    pub fn new(graph: Graph) -> Self {
        let transformers = TransformerChain::new(graph.transformers.clone());
        Self {
            graph: Arc::new(graph),
            transformers,
            checkpoints: None,
            idempotency: None,
            events: None,
            config: RunnerConfig::default(),
        }
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_idempotency_store(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency = Some(store);
        self
    }

    pub fn with_events(mut self, publisher: GraphEventPublisher) -> Self {
        self.events = Some(publisher);
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Run the graph on the given initial state.
    pub async fn run(&self, input: HashMap<String, serde_json::Value>) -> AorResult<RunReport> {
        self.run_with_cancellation(input, CancellationToken::new())
            .await
    }

    /// Run with cooperative cancellation. A cancelled run yields a
    /// CANCELLED report, not an error.
    pub async fn run_with_cancellation(
        &self,
        input: HashMap<String, serde_json::Value>,
        cancel: CancellationToken,
    ) -> AorResult<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let ectx = current_execution_context();
        let started = Instant::now();
        let run_ctx = RunContext {
            graph_id: self.graph.id.clone(),
            run_id: run_id.clone(),
            execution_context: ectx.clone(),
            started_at: Utc::now(),
        };

        let idem_key = ectx
            .as_ref()
            .and_then(|c| c.causation_id.clone())
            .or_else(|| {
                input
                    .get(IDEMPOTENCY_KEY)
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            });

        if self.config.enable_idempotency {
            if let (Some(store), Some(key)) = (&self.idempotency, &idem_key) {
                if let Some(report) = store.get(key).await? {
                    info!(graph = %self.graph.id, %key, "idempotency hit, returning cached report");
                    return Ok(report);
                }
            }
        }

        info!(graph = %self.graph.id, run = %run_id, "starting graph run");
        let ctx = NodeContext::new(self.graph.id.clone(), run_id.clone(), input, ectx);
        let mut sm = RunStateMachine::new();
        let mut node_reports = Vec::new();

        let mut start_failure = None;
        for middleware in &self.graph.middleware {
            if let Err(e) = middleware.on_start(&run_ctx).await {
                start_failure = Some(
                    e.with_context("middleware", serde_json::json!(middleware.name())),
                );
                break;
            }
        }
        self.do_transition(&mut sm, &run_ctx, RunState::Running).await;

        let outcome = match start_failure {
            Some(e) => RunOutcome::Failed(e),
            None => match self.transformers.before_execution(&ctx).await {
                Err(e) => RunOutcome::Failed(e),
                Ok(()) => {
                    let entry = Some(self.graph.entry_point().to_string());
                    self.node_loop(&ctx, &run_ctx, entry, &mut node_reports, &cancel, &mut sm)
                        .await
                }
            },
        };

        Ok(self
            .finish(&ctx, &run_ctx, &mut sm, outcome, node_reports, started, idem_key)
            .await)
    }

    /// Resume a suspended run with the response matching its token.
    pub async fn resume(&self, token: &str, response: HitlResponse) -> AorResult<RunReport> {
        let store = self
            .checkpoints
            .as_ref()
            .ok_or_else(|| AorError::checkpoint("no checkpoint store configured"))?;

        let checkpoint = store.find_by_token(token).await?.ok_or_else(|| {
            AorError::checkpoint(format!("no suspended run holds token '{}'", token))
        })?;

        if checkpoint.graph_id != self.graph.id {
            return Err(AorError::checkpoint_with_id(
                checkpoint.run_id.clone(),
                format!(
                    "checkpoint belongs to graph '{}', not '{}'",
                    checkpoint.graph_id, self.graph.id
                ),
            ));
        }

        info!(graph = %self.graph.id, run = %checkpoint.run_id, %token, "resuming suspended run");
        let started = Instant::now();
        let ectx = current_execution_context();
        let run_ctx = RunContext {
            graph_id: self.graph.id.clone(),
            run_id: checkpoint.run_id.clone(),
            execution_context: ectx.clone(),
            started_at: Utc::now(),
        };
        let ctx = NodeContext::new(
            self.graph.id.clone(),
            checkpoint.run_id.clone(),
            checkpoint.state.clone(),
            ectx,
        );

        for middleware in &self.graph.middleware {
            if let Some(state) = checkpoint.middleware_state.get(middleware.name()) {
                middleware.restore_state(state.clone());
            }
        }

        let mut sm = RunStateMachine::waiting();
        let mut node_reports = Vec::new();
        let cancel = CancellationToken::new();
        let node_started_at = Utc::now();

        let outcome = match response.status {
            HitlResponseStatus::Cancelled => {
                node_reports.push(NodeReport {
                    node_id: checkpoint.node_id.clone(),
                    status: NodeStatus::Cancelled,
                    started_at: node_started_at,
                    duration_ms: 0,
                    output: None,
                    error: None,
                });
                RunOutcome::Cancelled
            }
            HitlResponseStatus::Timeout | HitlResponseStatus::Error => {
                let error = response_error(&response)
                    .unwrap_or_else(|| AorError::unknown("invalid HITL response"));
                node_reports.push(NodeReport {
                    node_id: checkpoint.node_id.clone(),
                    status: NodeStatus::Failed,
                    started_at: node_started_at,
                    duration_ms: 0,
                    output: None,
                    error: Some(error.to_string()),
                });
                self.do_transition(&mut sm, &run_ctx, RunState::Running).await;
                RunOutcome::Failed(error)
            }
            HitlResponseStatus::Completed => {
                let value = response.value.unwrap_or(serde_json::Value::Null);
                ctx.set(checkpoint.node_id.clone(), value.clone());
                ctx.set(PREVIOUS_KEY, value.clone());
                node_reports.push(NodeReport {
                    node_id: checkpoint.node_id.clone(),
                    status: NodeStatus::Success,
                    started_at: node_started_at,
                    duration_ms: 0,
                    output: Some(value.clone()),
                    error: None,
                });
                self.do_transition(&mut sm, &run_ctx, RunState::Running).await;

                // The suspended node has now completed; clear the token and
                // continue from its edge selection.
                self.save_checkpoint(&ctx, &checkpoint.node_id, None).await;
                let result = NodeResult::new(value);
                let next = self.graph.select_next(&checkpoint.node_id, &result);
                self.node_loop(&ctx, &run_ctx, next, &mut node_reports, &cancel, &mut sm)
                    .await
            }
        };

        let report = self
            .finish(&ctx, &run_ctx, &mut sm, outcome, node_reports, started, None)
            .await;

        if report.status.is_terminal() {
            if let Err(e) = store.delete(&report.run_id).await {
                warn!(error = %e, "failed to delete checkpoint after terminal run");
            }
        }

        Ok(report)
    }

    async fn node_loop(
        &self,
        ctx: &NodeContext,
        run_ctx: &RunContext,
        start: Option<String>,
        node_reports: &mut Vec<NodeReport>,
        cancel: &CancellationToken,
        sm: &mut RunStateMachine,
    ) -> RunOutcome {
        let mut current = start;

        while let Some(node_id) = current {
            if cancel.is_cancelled() {
                node_reports.push(NodeReport {
                    node_id: node_id.clone(),
                    status: NodeStatus::Cancelled,
                    started_at: Utc::now(),
                    duration_ms: 0,
                    output: None,
                    error: None,
                });
                return RunOutcome::Cancelled;
            }

            let node = match self.graph.node(&node_id) {
                Some(node) => node,
                None => {
                    return RunOutcome::Failed(AorError::config(format!(
                        "node '{}' is not part of graph '{}'",
                        node_id, self.graph.id
                    )))
                }
            };

            if let Err(e) = self.transformers.before_node(&node_id, ctx).await {
                return RunOutcome::Failed(e);
            }

            let request = NodeRequest {
                node_id: node_id.clone(),
                input: ctx.previous(),
                run: run_ctx.clone(),
            };

            let started_at = Utc::now();
            let t0 = Instant::now();
            debug!(graph = %self.graph.id, node = %node_id, "executing node");
            self.emit_node_event(&node_id, "started", None, None).await;

            let exec_result: AorResult<NodeResult> = {
                let validation_failure = match &self.graph.validation {
                    Some(pipeline) => {
                        let input = request.input.clone().unwrap_or(serde_json::Value::Null);
                        pipeline.validate(&node_id, &input).await.err()
                    }
                    None => None,
                };
                match validation_failure {
                    Some(e) => Err(e),
                    None => {
                        let execution = Next::new(&self.graph.middleware, node, ctx).run(&request);
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                node_reports.push(NodeReport {
                                    node_id: node_id.clone(),
                                    status: NodeStatus::Cancelled,
                                    started_at,
                                    duration_ms: t0.elapsed().as_millis() as u64,
                                    output: None,
                                    error: None,
                                });
                                return RunOutcome::Cancelled;
                            }
                            result = execution => result,
                        }
                    }
                }
            };

            let exec_result = exec_result.and_then(|result| {
                self.graph
                    .metadata_policy
                    .check(&node_id, &result.metadata)
                    .map(|_| result)
            });
            let duration_ms = t0.elapsed().as_millis() as u64;

            match exec_result {
                Ok(result) if result.is_hitl_pending() => {
                    let token = result
                        .hitl_call_id()
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| Uuid::new_v4().to_string());

                    node_reports.push(NodeReport {
                        node_id: node_id.clone(),
                        status: NodeStatus::Waiting,
                        started_at,
                        duration_ms,
                        output: None,
                        error: None,
                    });

                    self.do_transition(sm, run_ctx, RunState::Waiting).await;

                    if self.checkpoints.is_some() {
                        self.save_checkpoint(ctx, &node_id, Some(token.clone())).await;
                    } else {
                        warn!(
                            graph = %self.graph.id,
                            run = %ctx.run_id,
                            "run suspended without a checkpoint store and cannot be resumed"
                        );
                    }

                    if let Some(publisher) = self.events_enabled() {
                        let options = result
                            .metadata
                            .get("options")
                            .and_then(|v| v.as_array())
                            .map(|arr| {
                                arr.iter()
                                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                                    .collect()
                            })
                            .unwrap_or_default();
                        publisher
                            .hitl_required(HitlRequiredEvent {
                                checkpoint_id: ctx.run_id.clone(),
                                graph_id: self.graph.id.clone(),
                                node_id: Some(node_id.clone()),
                                options,
                                timestamp: Utc::now(),
                            })
                            .await;
                    }

                    return RunOutcome::Waiting { token };
                }
                Ok(result) => {
                    ctx.set(node_id.clone(), result.data.clone());
                    ctx.set(PREVIOUS_KEY, result.data.clone());

                    if let Err(e) = self.transformers.after_node(&node_id, &result, ctx).await {
                        return RunOutcome::Failed(e);
                    }

                    node_reports.push(NodeReport {
                        node_id: node_id.clone(),
                        status: NodeStatus::Success,
                        started_at,
                        duration_ms,
                        output: Some(result.data.clone()),
                        error: None,
                    });

                    self.save_checkpoint(ctx, &node_id, None).await;

                    let next = self.graph.select_next(&node_id, &result);
                    self.emit_node_event(
                        &node_id,
                        "completed",
                        Some(node_id.clone()),
                        next.clone(),
                    )
                    .await;

                    current = next;
                }
                Err(error) => {
                    let mut action = ErrorAction::Propagate;
                    for middleware in &self.graph.middleware {
                        match middleware.on_error(&error, run_ctx).await {
                            ErrorAction::Propagate => continue,
                            decided => {
                                action = decided;
                                break;
                            }
                        }
                    }

                    match action {
                        ErrorAction::Recover { node_id: recovery } => {
                            info!(
                                graph = %self.graph.id,
                                failed = %node_id,
                                recovery = %recovery,
                                "middleware redirected failure to recovery node"
                            );
                            node_reports.push(NodeReport {
                                node_id: node_id.clone(),
                                status: NodeStatus::Recovered,
                                started_at,
                                duration_ms,
                                output: None,
                                error: Some(error.to_string()),
                            });
                            if self.graph.node(&recovery).is_none() {
                                return RunOutcome::Failed(AorError::config(format!(
                                    "recovery node '{}' is not part of graph '{}'",
                                    recovery, self.graph.id
                                )));
                            }
                            current = Some(recovery);
                        }
                        ErrorAction::Suppress => {
                            ctx.set(PREVIOUS_KEY, serde_json::Value::Null);
                            node_reports.push(NodeReport {
                                node_id: node_id.clone(),
                                status: NodeStatus::Suppressed,
                                started_at,
                                duration_ms,
                                output: None,
                                error: Some(error.to_string()),
                            });
                            return RunOutcome::Success;
                        }
                        ErrorAction::Propagate => {
                            node_reports.push(NodeReport {
                                node_id: node_id.clone(),
                                status: NodeStatus::Failed,
                                started_at,
                                duration_ms,
                                output: None,
                                error: Some(error.to_string()),
                            });
                            self.emit_node_event(&node_id, "failed", Some(node_id.clone()), None)
                                .await;
                            return RunOutcome::Failed(error);
                        }
                    }
                }
            }
        }

        RunOutcome::Success
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        ctx: &NodeContext,
        run_ctx: &RunContext,
        sm: &mut RunStateMachine,
        outcome: RunOutcome,
        node_reports: Vec<NodeReport>,
        started: Instant,
        idem_key: Option<String>,
    ) -> RunReport {
        let (status, result, error, resumption_token) = match outcome {
            RunOutcome::Success => (RunState::Success, ctx.previous(), None, None),
            RunOutcome::Failed(e) => (RunState::Failed, None, Some(e), None),
            RunOutcome::Cancelled => (RunState::Cancelled, None, None, None),
            RunOutcome::Waiting { token } => (RunState::Waiting, None, None, Some(token)),
        };

        if sm.current() != status {
            self.do_transition(sm, run_ctx, status).await;
        }

        let report = RunReport {
            graph_id: self.graph.id.clone(),
            run_id: run_ctx.run_id.clone(),
            status,
            result,
            error,
            duration_ms: started.elapsed().as_millis() as u64,
            node_reports,
            resumption_token,
        };

        // Cleanup phase: every transformer runs, failures logged only.
        self.transformers.after_execution(ctx).await;

        for middleware in &self.graph.middleware {
            let finish = catching_async(async {
                middleware.on_finish(&report).await;
                Ok(())
            })
            .await;
            if let Err(e) = finish {
                warn!(
                    middleware = %middleware.name(),
                    error = %e,
                    "on_finish middleware failed"
                );
            }
        }

        if status != RunState::Waiting {
            if let Some(publisher) = self.events_enabled() {
                publisher
                    .completed(WorkflowCompletedEvent {
                        run_id: report.run_id.clone(),
                        graph_id: report.graph_id.clone(),
                        final_state: status,
                        timestamp: Utc::now(),
                        metadata: HashMap::new(),
                    })
                    .await;
            }
        }

        if status == RunState::Success && self.config.enable_idempotency {
            if let (Some(store), Some(key)) = (&self.idempotency, idem_key) {
                if let Err(e) = store
                    .put(&key, report.clone(), self.config.idempotency_ttl)
                    .await
                {
                    warn!(error = %e, "failed to store idempotency entry");
                }
            }
        }

        info!(
            graph = %report.graph_id,
            run = %report.run_id,
            status = %report.status,
            duration_ms = report.duration_ms,
            "graph run finished"
        );
        report
    }

    fn events_enabled(&self) -> Option<&GraphEventPublisher> {
        if self.config.enable_events {
            self.events.as_ref()
        } else {
            None
        }
    }

    async fn do_transition(
        &self,
        sm: &mut RunStateMachine,
        run_ctx: &RunContext,
        next: RunState,
    ) {
        match sm.transition(next) {
            Ok(previous) => {
                if let Some(publisher) = self.events_enabled() {
                    publisher.state_change(&run_ctx.run_id, previous, next).await;
                }
            }
            Err(e) => warn!(error = %e, "rejected run state transition"),
        }
    }

    async fn emit_node_event(
        &self,
        node_id: &str,
        event: &str,
        from: Option<String>,
        to: Option<String>,
    ) {
        if let Some(publisher) = self.events_enabled() {
            publisher
                .node_event(NodeExecutionEvent {
                    graph_id: self.graph.id.clone(),
                    node_id: node_id.to_string(),
                    from,
                    to,
                    event: event.to_string(),
                    timestamp: Utc::now(),
                    metadata: HashMap::new(),
                })
                .await;
        }
    }

    async fn save_checkpoint(&self, ctx: &NodeContext, node_id: &str, token: Option<String>) {
        if let Some(store) = &self.checkpoints {
            let mut middleware_state = HashMap::new();
            for middleware in &self.graph.middleware {
                if let Some(state) = middleware.export_state() {
                    middleware_state.insert(middleware.name().to_string(), state);
                }
            }

            let mut checkpoint = Checkpoint::new(
                ctx.run_id.clone(),
                self.graph.id.clone(),
                node_id,
                ctx.snapshot(),
            )
            .with_middleware_state(middleware_state);
            if let Some(token) = token {
                checkpoint = checkpoint.with_resume_token(token);
            }

            if let Err(e) = store.save(checkpoint).await {
                warn!(error = %e, "failed to save checkpoint");
            }
        }
    }
}
