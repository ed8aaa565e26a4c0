// AOR Graph - Declarative graph definitions
//
// Graphs can be declared in YAML (Kubernetes-style metadata/spec layout)
// and compiled against agent and tool registries. Edge conditions use a
// small expression language over the completed node's output:
// `data.KEY == "value"`, `data.KEY != "value"`, and the literals
// `true` / `false`.
//
// Example:
// ```yaml
// apiVersion: aor.dev/v1
// kind: Graph
// metadata:
//   name: review
// spec:
//   entryPoint: classify
//   nodes:
//     - id: classify
//       type: Agent
//       agent: classifier
//     - id: confirm
//       type: Tool
//       tool: hitl_selection
//       params:
//         prompt: "Proceed?"
//         options: ["yes", "no"]
//     - id: done
//       type: Output
//   edges:
//     - from: classify
//       to: confirm
//     - from: confirm
//       to: done
// ```

use crate::graph::{Graph, GraphBuilder};
use crate::node::{AgentNode, NodeResult, OutputNode, ToolNode};
use aor_core::{AgentRegistry, AorError, AorResult, ToolRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Declarative graph resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDefinition {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_graph_kind")]
    pub kind: String,

    pub metadata: GraphMetadata,

    pub spec: GraphSpec,
}

fn default_api_version() -> String {
    "aor.dev/v1".to_string()
}

fn default_graph_kind() -> String {
    "Graph".to_string()
}

/// Graph metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub name: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

/// Graph specification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSpec {
    pub entry_point: String,

    pub nodes: Vec<NodeDefinition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<EdgeDefinition>,
}

/// Node kinds available to declarative graphs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeKind {
    Agent,
    Tool,
    Output,
}

/// One declared node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    pub id: String,

    #[serde(rename = "type")]
    pub node_type: NodeKind,

    /// Agent id (Agent nodes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    /// Tool name (Tool nodes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// State key to read input from (Agent nodes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_key: Option<String>,

    /// Static tool parameters; the string "${previous}" is replaced by the
    /// previous node's output at call time (Tool nodes)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, serde_json::Value>,
}

/// One declared edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub from: String,

    pub to: String,

    /// Condition expression over the completed node's output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl GraphDefinition {
    /// Parse a YAML definition and validate it.
    pub fn from_yaml(yaml: &str) -> AorResult<Self> {
        let definition: GraphDefinition = serde_yaml::from_str(yaml)
            .map_err(|e| AorError::serialization("yaml", e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> AorResult<()> {
        if self.metadata.name.is_empty() {
            return Err(AorError::config_field("metadata.name", "graph name is required"));
        }
        if self.spec.nodes.is_empty() {
            return Err(AorError::config("graph requires at least one node"));
        }

        let mut seen = HashSet::new();
        for node in &self.spec.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(AorError::config(format!("duplicate node id '{}'", node.id)));
            }
            match node.node_type {
                NodeKind::Agent if node.agent.is_none() => {
                    return Err(AorError::config(format!(
                        "agent node '{}' requires 'agent'",
                        node.id
                    )));
                }
                NodeKind::Tool if node.tool.is_none() => {
                    return Err(AorError::config(format!(
                        "tool node '{}' requires 'tool'",
                        node.id
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Compile into an executable graph bound to the given registries.
    pub fn build(&self, agents: &AgentRegistry, tools: &ToolRegistry) -> AorResult<Graph> {
        self.validate()?;
        let mut builder = GraphBuilder::new(self.metadata.name.clone())
            .entry_point(self.spec.entry_point.clone());

        for node_def in &self.spec.nodes {
            match node_def.node_type {
                NodeKind::Agent => {
                    let agent_id = node_def.agent.as_deref().unwrap_or_default();
                    let agent = agents.get(agent_id).ok_or_else(|| {
                        AorError::config(format!(
                            "agent '{}' for node '{}' is not registered",
                            agent_id, node_def.id
                        ))
                    })?;
                    let mut node = AgentNode::new(node_def.id.clone(), agent);
                    if let Some(key) = &node_def.input_key {
                        node = node.with_input_key(key.clone());
                    }
                    builder = builder.add_node(node);
                }
                NodeKind::Tool => {
                    let tool_name = node_def.tool.as_deref().unwrap_or_default();
                    let tool = tools.get(tool_name).ok_or_else(|| {
                        AorError::config(format!(
                            "tool '{}' for node '{}' is not registered",
                            tool_name, node_def.id
                        ))
                    })?;
                    let params = node_def.params.clone();
                    let node = ToolNode::new(node_def.id.clone(), tool, move |ctx| {
                        let previous = ctx.previous().unwrap_or(serde_json::Value::Null);
                        params
                            .iter()
                            .map(|(k, v)| {
                                let value = match v {
                                    serde_json::Value::String(s) if s == "${previous}" => {
                                        previous.clone()
                                    }
                                    other => other.clone(),
                                };
                                (k.clone(), value)
                            })
                            .collect()
                    });
                    builder = builder.add_node(node);
                }
                NodeKind::Output => {
                    builder = builder.add_node(OutputNode::passthrough(node_def.id.clone()));
                }
            }
        }

        for edge_def in &self.spec.edges {
            match &edge_def.when {
                Some(expr) => {
                    let expr = expr.clone();
                    builder = builder.add_edge_when(
                        edge_def.from.clone(),
                        edge_def.to.clone(),
                        move |result| evaluate_edge_condition(&expr, result),
                    );
                }
                None => {
                    builder = builder.add_edge(edge_def.from.clone(), edge_def.to.clone());
                }
            }
        }

        builder.build()
    }
}

/// Evaluate an edge condition expression against a node result.
pub fn evaluate_edge_condition(expression: &str, result: &NodeResult) -> bool {
    let expression = expression.trim();

    if expression == "true" {
        return true;
    }
    if expression == "false" {
        return false;
    }

    if let Some((left, right)) = expression.split_once("==") {
        return resolve_operand(left.trim(), result) == strip_quotes(right.trim());
    }
    if let Some((left, right)) = expression.split_once("!=") {
        return resolve_operand(left.trim(), result) != strip_quotes(right.trim());
    }

    warn!(%expression, "could not evaluate edge condition");
    false
}

fn strip_quotes(value: &str) -> String {
    value.trim().trim_matches('"').trim_matches('\'').to_string()
}

fn resolve_operand(operand: &str, result: &NodeResult) -> String {
    if let Some(key) = operand.strip_prefix("data.") {
        return match result.data.get(key) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(value) => value.to_string(),
            None => String::new(),
        };
    }
    strip_quotes(operand)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_graph_definition() {
        let yaml = r#"
apiVersion: aor.dev/v1
kind: Graph
metadata:
  name: review
spec:
  entryPoint: classify
  nodes:
    - id: classify
      type: Agent
      agent: classifier
    - id: done
      type: Output
  edges:
    - from: classify
      to: done
      when: data.approved == "true"
"#;
        let definition = GraphDefinition::from_yaml(yaml).unwrap();
        assert_eq!(definition.metadata.name, "review");
        assert_eq!(definition.spec.entry_point, "classify");
        assert_eq!(definition.spec.nodes.len(), 2);
        assert!(definition.spec.edges[0].when.is_some());
    }

    #[test]
    fn test_validation_errors() {
        let missing_agent = r#"
metadata:
  name: bad
spec:
  entryPoint: a
  nodes:
    - id: a
      type: Agent
"#;
        let err = GraphDefinition::from_yaml(missing_agent).unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");

        let duplicate = r#"
metadata:
  name: bad
spec:
  entryPoint: a
  nodes:
    - id: a
      type: Output
    - id: a
      type: Output
"#;
        let err = GraphDefinition::from_yaml(duplicate).unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_evaluate_edge_condition() {
        let result = NodeResult::new(json!({"approved": "true", "score": 7}));

        assert!(evaluate_edge_condition("true", &result));
        assert!(!evaluate_edge_condition("false", &result));
        assert!(evaluate_edge_condition("data.approved == \"true\"", &result));
        assert!(evaluate_edge_condition("data.score == 7", &result));
        assert!(evaluate_edge_condition("data.missing != \"x\"", &result));
        assert!(!evaluate_edge_condition("gibberish", &result));
    }

    #[test]
    fn test_build_against_registries() {
        use aor_core::{Comm, FnAgent, FnTool, ToolResult, ToolSchema};
        use std::sync::Arc;

        let agents = AgentRegistry::new();
        agents.register(Arc::new(FnAgent::new("classifier", |msg: Comm| async move {
            Ok(msg.reply("classified", "classifier"))
        })));

        let tools = ToolRegistry::new();
        tools.register(Arc::new(FnTool::new(
            "echo",
            ToolSchema::new(),
            |params, _ctx| async move {
                Ok(ToolResult::success(
                    params.get("input").cloned().unwrap_or(json!(null)),
                ))
            },
        )));

        let definition = GraphDefinition::from_yaml(
            r#"
metadata:
  name: wired
spec:
  entryPoint: classify
  nodes:
    - id: classify
      type: Agent
      agent: classifier
    - id: echo
      type: Tool
      tool: echo
      params:
        input: "${previous}"
    - id: done
      type: Output
  edges:
    - from: classify
      to: echo
    - from: echo
      to: done
"#,
        )
        .unwrap();

        let graph = definition.build(&agents, &tools).unwrap();
        assert_eq!(graph.entry_point(), "classify");
        assert_eq!(graph.node_ids().len(), 3);
    }
}
