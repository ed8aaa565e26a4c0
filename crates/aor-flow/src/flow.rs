// AOR Flow - Multi-agent flow engine
//
// A flow is an ordered set of steps over agents, executed under one of four
// strategies. Step conditions are evaluated against the message a step would
// receive: the flow input for the fan-out strategies, the threaded reply for
// the chained ones. The flow imposes no timeout of its own; callers compose
// timeouts around `process`.

use crate::strategy::FlowStrategy;
use aor_core::{
    catching_async, current_execution_context, Agent, AgentRef, AgentRegistry, AorError,
    AorResult, Comm, CommRole, ExecutionContext,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Predicate deciding whether a step runs for a given message.
pub type StepCondition = Arc<dyn Fn(&Comm) -> bool + Send + Sync>;

/// Picks the strategy for a call, given the input message and the steps
/// enabled for it. Overrides the flow's default strategy.
pub type StrategyResolver = Arc<dyn Fn(&Comm, &[FlowStep]) -> FlowStrategy + Send + Sync>;

/// How a step refers to its agent.
#[derive(Clone)]
pub enum AgentSelector {
    /// Resolved through the flow's agent registry at call time
    ById(String),
    /// Direct reference
    Instance(AgentRef),
}

impl std::fmt::Debug for AgentSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentSelector::ById(id) => write!(f, "ById({})", id),
            AgentSelector::Instance(agent) => write!(f, "Instance({})", agent.metadata().id),
        }
    }
}

/// One step of a flow.
#[derive(Clone)]
pub struct FlowStep {
    pub id: String,
    pub selector: AgentSelector,
    pub condition: Option<StepCondition>,
}

impl FlowStep {
    /// Step whose agent is resolved by id through the registry.
    pub fn by_id(id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            selector: AgentSelector::ById(agent_id.into()),
            condition: None,
        }
    }

    /// Step holding a direct agent reference.
    pub fn with_agent(id: impl Into<String>, agent: AgentRef) -> Self {
        Self {
            id: id.into(),
            selector: AgentSelector::Instance(agent),
            condition: None,
        }
    }

    /// Gate the step on a predicate over the message it would receive.
    pub fn when<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Comm) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }
}

impl std::fmt::Debug for FlowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowStep")
            .field("id", &self.id)
            .field("selector", &self.selector)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

/// Ordered set of steps over agents, executed under a strategy.
pub struct MultiAgentFlow {
    id: String,
    steps: Vec<FlowStep>,
    strategy: FlowStrategy,
    resolver: Option<StrategyResolver>,
    registry: Option<Arc<AgentRegistry>>,
}

impl MultiAgentFlow {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
            strategy: FlowStrategy::default(),
            resolver: None,
            registry: None,
        }
    }

    pub fn with_strategy(mut self, strategy: FlowStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_registry(mut self, registry: Arc<AgentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&Comm, &[FlowStep]) -> FlowStrategy + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn step(mut self, step: FlowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn steps(&self) -> &[FlowStep] {
        &self.steps
    }

    pub fn default_strategy(&self) -> FlowStrategy {
        self.strategy
    }

    fn resolve_agent(&self, step: &FlowStep) -> AorResult<AgentRef> {
        match &step.selector {
            AgentSelector::Instance(agent) => Ok(Arc::clone(agent)),
            AgentSelector::ById(agent_id) => {
                let registry = self.registry.as_ref().ok_or_else(|| {
                    AorError::config(format!(
                        "flow '{}' step '{}' references agent '{}' but no registry is attached",
                        self.id, step.id, agent_id
                    ))
                })?;
                registry.get(agent_id).ok_or_else(|| {
                    AorError::config_field(
                        "agent",
                        format!(
                            "agent '{}' for step '{}' is not registered",
                            agent_id, step.id
                        ),
                    )
                })
            }
        }
    }

    /// Process a message under the resolved strategy.
    pub async fn process(&self, msg: Comm) -> AorResult<Comm> {
        self.process_with_cancellation(msg, CancellationToken::new())
            .await
    }

    /// Process with cooperative cancellation. Cancelling aborts in-flight
    /// steps and yields a CANCELLED error; side effects already committed
    /// are not rolled back.
    pub async fn process_with_cancellation(
        &self,
        msg: Comm,
        cancel: CancellationToken,
    ) -> AorResult<Comm> {
        let started = Instant::now();

        let enabled: Vec<FlowStep> = self
            .steps
            .iter()
            .filter(|step| step.condition.as_ref().map_or(true, |c| c(&msg)))
            .cloned()
            .collect();

        let strategy = match &self.resolver {
            Some(resolver) => resolver(&msg, &enabled),
            None => self.strategy,
        };
        debug!(flow = %self.id, %strategy, steps = self.steps.len(), "dispatching flow");

        let outcome = match strategy {
            FlowStrategy::Sequential => self.run_chain(&msg, &cancel, false).await,
            FlowStrategy::Pipeline => self.run_chain(&msg, &cancel, true).await,
            FlowStrategy::Parallel => self.run_parallel(&msg, enabled, &cancel).await,
            FlowStrategy::Competition => self.run_competition(&msg, enabled, &cancel).await,
        }?;

        let FlowOutcome {
            mut reply,
            completed,
            skipped,
            agent_count,
        } = outcome;

        reply
            .data
            .insert("flow_strategy".to_string(), json!(strategy.to_string()));
        reply.data.insert(
            "execution_time_ms".to_string(),
            json!(started.elapsed().as_millis() as u64),
        );
        reply
            .data
            .insert("agent_count".to_string(), json!(agent_count));
        reply
            .data
            .insert("completed_steps".to_string(), json!(completed));
        reply
            .data
            .insert("skipped_steps".to_string(), json!(skipped));

        Ok(reply)
    }

    /// Sequential and pipeline dispatch. Conditions are re-evaluated against
    /// the threaded message; `thread_data` decides whether replies keep
    /// their `data` payload when fed to the next step.
    async fn run_chain(
        &self,
        msg: &Comm,
        cancel: &CancellationToken,
        thread_data: bool,
    ) -> AorResult<FlowOutcome> {
        let mut carried = msg.clone();
        let mut completed = 0usize;
        let mut skipped = 0usize;
        let mut first = true;

        for step in &self.steps {
            if cancel.is_cancelled() {
                return Err(AorError::cancelled(format!("flow '{}' cancelled", self.id)));
            }

            if let Some(condition) = &step.condition {
                if !condition(&carried) {
                    debug!(flow = %self.id, step = %step.id, "step condition not met, skipping");
                    skipped += 1;
                    continue;
                }
            }

            let agent = self.resolve_agent(step)?;
            let input = if thread_data || first {
                carried.clone()
            } else {
                let mut stripped = carried.clone();
                stripped.data.clear();
                stripped
            };
            first = false;

            let reply = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(AorError::cancelled(format!("flow '{}' cancelled", self.id)));
                }
                result = catching_async(agent.process_message(input)) => result,
            }
            .map_err(|e| e.with_context("step", json!(step.id)))?;

            completed += 1;
            carried = reply;
        }

        Ok(FlowOutcome {
            reply: carried,
            completed,
            skipped,
            agent_count: completed,
        })
    }

    /// Parallel dispatch: every enabled step sees the input message; replies
    /// merge in declared order. A step failure is recorded but does not
    /// abort its peers.
    async fn run_parallel(
        &self,
        msg: &Comm,
        enabled: Vec<FlowStep>,
        cancel: &CancellationToken,
    ) -> AorResult<FlowOutcome> {
        let skipped = self.steps.len() - enabled.len();
        let agent_count = enabled.len();
        if enabled.is_empty() {
            return Ok(FlowOutcome {
                reply: msg.clone(),
                completed: 0,
                skipped,
                agent_count: 0,
            });
        }

        let mut set = self.spawn_steps(msg, &enabled)?;
        let mut results: Vec<Option<AorResult<Comm>>> = Vec::new();
        results.resize_with(enabled.len(), || None);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    set.abort_all();
                    return Err(AorError::cancelled(format!("flow '{}' cancelled", self.id)));
                }
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok((idx, result))) => results[idx] = Some(result),
                    Some(Err(join_err)) => {
                        warn!(flow = %self.id, error = %join_err, "parallel step task aborted");
                    }
                },
            }
        }

        let mut contents = Vec::new();
        let mut per_agent = serde_json::Map::new();
        let mut errors = serde_json::Map::new();
        let mut completed = 0usize;

        for (idx, result) in results.into_iter().enumerate() {
            let step_id = enabled[idx].id.clone();
            match result {
                Some(Ok(reply)) => {
                    completed += 1;
                    contents.push(reply.content.clone());
                    per_agent.insert(step_id, json!(reply.content));
                }
                Some(Err(e)) => {
                    errors.insert(step_id, json!(e.to_string()));
                }
                None => {
                    errors.insert(step_id, json!("step did not complete"));
                }
            }
        }

        if completed == 0 {
            return Err(AorError::agent(format!(
                "all {} parallel steps of flow '{}' failed",
                agent_count, self.id
            ))
            .with_context("errors", serde_json::Value::Object(errors)));
        }

        let mut merged = Comm::new(contents.join("\n\n"), self.id.clone())
            .with_role(CommRole::Assistant)
            .with_data_entry("per_agent_results", serde_json::Value::Object(per_agent));
        if !errors.is_empty() {
            merged
                .data
                .insert("errors".to_string(), serde_json::Value::Object(errors));
        }

        Ok(FlowOutcome {
            reply: merged,
            completed,
            skipped,
            agent_count,
        })
    }

    /// Competition dispatch: first success wins, losers are aborted. Among
    /// successes that are already complete when the winner is observed, the
    /// lowest declared index wins. If all steps fail, the latest failure is
    /// returned.
    async fn run_competition(
        &self,
        msg: &Comm,
        enabled: Vec<FlowStep>,
        cancel: &CancellationToken,
    ) -> AorResult<FlowOutcome> {
        let skipped = self.steps.len() - enabled.len();
        let agent_count = enabled.len();
        if enabled.is_empty() {
            return Ok(FlowOutcome {
                reply: msg.clone(),
                completed: 0,
                skipped,
                agent_count: 0,
            });
        }

        let mut set = self.spawn_steps(msg, &enabled)?;
        let mut latest_failure: Option<AorError> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    set.abort_all();
                    return Err(AorError::cancelled(format!("flow '{}' cancelled", self.id)));
                }
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok((idx, Ok(reply)))) => {
                        let mut winner = (idx, reply);
                        while let Some(ready) = set.try_join_next() {
                            match ready {
                                Ok((other_idx, Ok(other_reply))) if other_idx < winner.0 => {
                                    winner = (other_idx, other_reply);
                                }
                                Ok((_, Err(e))) => latest_failure = Some(e),
                                _ => {}
                            }
                        }
                        set.abort_all();
                        debug!(flow = %self.id, step = %enabled[winner.0].id, "competition winner");
                        return Ok(FlowOutcome {
                            reply: winner.1,
                            completed: 1,
                            skipped,
                            agent_count,
                        });
                    }
                    Some(Ok((idx, Err(e)))) => {
                        latest_failure = Some(e.with_context("step", json!(enabled[idx].id)));
                    }
                    Some(Err(join_err)) => {
                        warn!(flow = %self.id, error = %join_err, "competition step task aborted");
                    }
                },
            }
        }

        Err(latest_failure.unwrap_or_else(|| {
            AorError::agent(format!("no step of flow '{}' produced a result", self.id))
        }))
    }

    /// Fan a message out to the enabled steps, re-entering the ambient
    /// execution context inside each spawned task.
    fn spawn_steps(
        &self,
        msg: &Comm,
        enabled: &[FlowStep],
    ) -> AorResult<JoinSet<(usize, AorResult<Comm>)>> {
        let ambient = current_execution_context();
        let mut set = JoinSet::new();
        for (idx, step) in enabled.iter().enumerate() {
            let agent = self.resolve_agent(step)?;
            let input = msg.clone();
            let ctx = ambient.clone();
            set.spawn(async move {
                let result = catching_async(async move {
                    match ctx {
                        Some(ctx) => {
                            ExecutionContext::scope(ctx, agent.process_message(input)).await
                        }
                        None => agent.process_message(input).await,
                    }
                })
                .await;
                (idx, result)
            });
        }
        Ok(set)
    }
}

struct FlowOutcome {
    reply: Comm,
    completed: usize,
    skipped: usize,
    agent_count: usize,
}
