// AOR Graph - Nodes and node context
//
// A node is an executable vertex of a graph. The built-in kinds wrap an
// agent, a tool, or a selector over the accumulated state. Node state is
// owned by a single run; nodes of one run execute serially.

use aor_core::{
    current_execution_context, Agent, AgentRef, AorError, AorResult, Comm, ExecutionContext, Tool,
    ToolRef, ToolStatus,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// State key holding the latest node output.
pub const PREVIOUS_KEY: &str = "_previous";

/// Metadata key marking a HITL suspension bubbling out of a tool node.
pub const HITL_PENDING_KEY: &str = "_hitl_pending";

/// Metadata key carrying the HITL tool-call id.
pub const HITL_CALL_ID_KEY: &str = "hitl_tool_call_id";

/// Mutable state of one graph run.
pub struct NodeContext {
    pub graph_id: String,
    pub run_id: String,
    state: RwLock<HashMap<String, serde_json::Value>>,
    pub execution_context: Option<ExecutionContext>,
}

impl NodeContext {
    pub fn new(
        graph_id: impl Into<String>,
        run_id: impl Into<String>,
        initial_state: HashMap<String, serde_json::Value>,
        execution_context: Option<ExecutionContext>,
    ) -> Self {
        Self {
            graph_id: graph_id.into(),
            run_id: run_id.into(),
            state: RwLock::new(initial_state),
            execution_context,
        }
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.state.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.state.write().insert(key.into(), value);
    }

    /// Latest node output, if any node has completed.
    pub fn previous(&self) -> Option<serde_json::Value> {
        self.get(PREVIOUS_KEY)
    }

    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.state.read().clone()
    }

    pub fn restore(&self, state: HashMap<String, serde_json::Value>) {
        *self.state.write() = state;
    }
}

/// Output of one node execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub data: serde_json::Value,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    /// When set, restricts edge selection to these target node ids.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_edges: Option<Vec<String>>,
}

impl NodeResult {
    pub fn new(data: impl Into<serde_json::Value>) -> Self {
        Self {
            data: data.into(),
            metadata: HashMap::new(),
            next_edges: None,
        }
    }

    pub fn with_metadata_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_next_edges(mut self, targets: Vec<String>) -> Self {
        self.next_edges = Some(targets);
        self
    }

    /// Whether this result is a HITL suspension marker.
    pub fn is_hitl_pending(&self) -> bool {
        self.metadata
            .get(HITL_PENDING_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// The HITL tool-call id of a suspension marker.
    pub fn hitl_call_id(&self) -> Option<&str> {
        self.metadata.get(HITL_CALL_ID_KEY).and_then(|v| v.as_str())
    }
}

/// Executable vertex of a graph.
#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> &str;

    async fn run(&self, ctx: &NodeContext) -> AorResult<NodeResult>;
}

/// Reference-counted node.
pub type NodeRef = Arc<dyn Node>;

fn value_as_content(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(obj) => obj
            .get("content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

/// Node wrapping an agent. Pulls its input from `state[input_key]`, or from
/// the previous node's output when no key is configured.
pub struct AgentNode {
    id: String,
    agent: AgentRef,
    input_key: Option<String>,
}

impl AgentNode {
    pub fn new(id: impl Into<String>, agent: AgentRef) -> Self {
        Self {
            id: id.into(),
            agent,
            input_key: None,
        }
    }

    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }
}

#[async_trait]
impl Node for AgentNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, ctx: &NodeContext) -> AorResult<NodeResult> {
        let input_value = match &self.input_key {
            Some(key) => ctx.get(key),
            None => ctx.previous(),
        }
        .unwrap_or(serde_json::Value::Null);

        let content = value_as_content(&input_value);
        let msg = Comm::new(content, format!("graph:{}", ctx.graph_id));

        let reply = self
            .agent
            .process_message(msg)
            .await
            .map_err(|e| e.with_context("node", serde_json::json!(self.id)))?;

        let data = serde_json::json!({
            "content": reply.content,
            "data": reply.data,
        });
        Ok(NodeResult::new(data))
    }
}

/// Maps accumulated state to a tool's parameter map.
pub type ParamMapper =
    Arc<dyn Fn(&NodeContext) -> HashMap<String, serde_json::Value> + Send + Sync>;

/// Node wrapping a tool. A WAITING_HITL tool result surfaces as a marker
/// the runner turns into a run suspension.
pub struct ToolNode {
    id: String,
    tool: ToolRef,
    param_mapper: ParamMapper,
}

impl ToolNode {
    pub fn new<F>(id: impl Into<String>, tool: ToolRef, param_mapper: F) -> Self
    where
        F: Fn(&NodeContext) -> HashMap<String, serde_json::Value> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            tool,
            param_mapper: Arc::new(param_mapper),
        }
    }

    /// Tool node that passes the previous node's output as `input`.
    pub fn passthrough(id: impl Into<String>, tool: ToolRef) -> Self {
        Self::new(id, tool, |ctx| {
            HashMap::from([(
                "input".to_string(),
                ctx.previous().unwrap_or(serde_json::Value::Null),
            )])
        })
    }
}

#[async_trait]
impl Node for ToolNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, ctx: &NodeContext) -> AorResult<NodeResult> {
        let params = (self.param_mapper)(ctx);
        let ectx = ctx
            .execution_context
            .clone()
            .or_else(current_execution_context)
            .unwrap_or_default();

        let result = self.tool.execute_validated(params, &ectx).await?;

        match result.status {
            ToolStatus::Success => {
                let mut node_result = NodeResult::new(result.result);
                node_result.metadata = result.metadata;
                Ok(node_result)
            }
            ToolStatus::WaitingHitl => {
                let mut node_result = NodeResult::new(serde_json::Value::Null)
                    .with_metadata_entry(HITL_PENDING_KEY, true);
                node_result.metadata.extend(result.metadata);
                Ok(node_result)
            }
            ToolStatus::Error => Err(AorError::tool(
                self.tool.name(),
                result
                    .error
                    .unwrap_or_else(|| "tool returned an error".to_string()),
            )
            .with_context("node", serde_json::json!(self.id))),
            ToolStatus::Timeout => {
                let timeout_ms = self
                    .tool
                    .timeout()
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                Err(AorError::timeout(self.tool.name(), timeout_ms)
                    .with_context("node", serde_json::json!(self.id)))
            }
            ToolStatus::Cancelled => Err(AorError::cancelled(format!(
                "tool '{}' was cancelled",
                self.tool.name()
            ))),
        }
    }
}

/// Selects or transforms the final value of a run.
pub struct OutputNode {
    id: String,
    selector: Arc<dyn Fn(&NodeContext) -> serde_json::Value + Send + Sync>,
}

impl OutputNode {
    pub fn new<F>(id: impl Into<String>, selector: F) -> Self
    where
        F: Fn(&NodeContext) -> serde_json::Value + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            selector: Arc::new(selector),
        }
    }

    /// Output node that forwards the previous node's output unchanged.
    pub fn passthrough(id: impl Into<String>) -> Self {
        Self::new(id, |ctx| ctx.previous().unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl Node for OutputNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, ctx: &NodeContext) -> AorResult<NodeResult> {
        Ok(NodeResult::new((self.selector)(ctx)))
    }
}

/// What to do when node metadata exceeds the hard limit.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverflowAction {
    #[default]
    Warn,
    Fail,
    Ignore,
}

/// Soft-size policy on NodeResult metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPolicy {
    /// Serialized size above which a warning is logged
    pub warn_threshold: usize,

    /// Serialized size above which `on_overflow` applies; None = unbounded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard_limit: Option<usize>,

    #[serde(default)]
    pub on_overflow: OverflowAction,
}

impl Default for MetadataPolicy {
    fn default() -> Self {
        Self {
            warn_threshold: 5 * 1024,
            hard_limit: None,
            on_overflow: OverflowAction::default(),
        }
    }
}

impl MetadataPolicy {
    pub fn check(
        &self,
        node_id: &str,
        metadata: &HashMap<String, serde_json::Value>,
    ) -> AorResult<()> {
        if metadata.is_empty() || self.on_overflow == OverflowAction::Ignore {
            return Ok(());
        }

        let size = serde_json::to_vec(metadata).map(|v| v.len()).unwrap_or(0);

        if let Some(limit) = self.hard_limit {
            if size > limit {
                return match self.on_overflow {
                    OverflowAction::Fail => Err(AorError::validation_field(
                        "metadata",
                        format!(
                            "node '{}' metadata is {} bytes, over the {} byte limit",
                            node_id, size, limit
                        ),
                    )),
                    _ => {
                        warn!(node = %node_id, size, limit, "node metadata over hard limit");
                        Ok(())
                    }
                };
            }
        }

        if size > self.warn_threshold {
            warn!(node = %node_id, size, threshold = self.warn_threshold, "node metadata over warn threshold");
        }
        Ok(())
    }
}
