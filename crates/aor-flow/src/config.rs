// AOR Flow - Declarative flow definitions
//
// Flows can be declared in YAML (Kubernetes-style metadata/spec layout) and
// compiled against an agent registry. Step conditions use a small expression
// language over the message: `data.KEY == "value"`, `data.KEY != "value"`,
// `content contains "text"`, and the literals `true` / `false`.
//
// Example:
// ```yaml
// apiVersion: aor.dev/v1
// kind: Flow
// metadata:
//   name: triage
// spec:
//   strategy: SEQUENTIAL
//   steps:
//     - id: analyze
//       agent: analyzer
//     - id: process
//       agent: processor
//       when: data.analyzed == "true"
// ```

use crate::flow::{FlowStep, MultiAgentFlow};
use crate::strategy::FlowStrategy;
use aor_core::{AgentRegistry, AorError, AorResult, Comm};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// Declarative flow resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_flow_kind")]
    pub kind: String,

    pub metadata: FlowMetadata,

    pub spec: FlowSpec,
}

fn default_api_version() -> String {
    "aor.dev/v1".to_string()
}

fn default_flow_kind() -> String {
    "Flow".to_string()
}

/// Flow metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowMetadata {
    pub name: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

/// Flow specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub strategy: FlowStrategy,

    pub steps: Vec<StepDefinition>,
}

/// One declared step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,

    /// Agent id resolved through the registry at call time
    pub agent: String,

    /// Condition expression gating the step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl FlowDefinition {
    /// Parse a YAML definition and validate it.
    pub fn from_yaml(yaml: &str) -> AorResult<Self> {
        let definition: FlowDefinition = serde_yaml::from_str(yaml)
            .map_err(|e| AorError::serialization("yaml", e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> AorResult<()> {
        if self.metadata.name.is_empty() {
            return Err(AorError::config_field("metadata.name", "flow name is required"));
        }
        if self.spec.steps.is_empty() {
            return Err(AorError::config("flow requires at least one step"));
        }

        let mut seen = HashSet::new();
        for step in &self.spec.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(AorError::config(format!("duplicate step id '{}'", step.id)));
            }
        }
        Ok(())
    }

    /// Compile into an executable flow bound to the given registry.
    pub fn build(&self, registry: Arc<AgentRegistry>) -> AorResult<MultiAgentFlow> {
        self.validate()?;
        let mut flow = MultiAgentFlow::new(self.metadata.name.clone())
            .with_strategy(self.spec.strategy)
            .with_registry(registry);

        for step_def in &self.spec.steps {
            let mut step = FlowStep::by_id(step_def.id.clone(), step_def.agent.clone());
            if let Some(expr) = &step_def.when {
                let expr = expr.clone();
                step = step.when(move |msg| evaluate_condition(&expr, msg));
            }
            flow = flow.step(step);
        }

        Ok(flow)
    }
}

/// Evaluate a step condition expression against a message.
pub fn evaluate_condition(expression: &str, msg: &Comm) -> bool {
    let expression = expression.trim();

    if expression == "true" {
        return true;
    }
    if expression == "false" {
        return false;
    }

    if let Some((left, right)) = split_operator(expression, "==") {
        return resolve_operand(&left, msg) == strip_quotes(&right);
    }

    if let Some((left, right)) = split_operator(expression, "!=") {
        return resolve_operand(&left, msg) != strip_quotes(&right);
    }

    if let Some((left, right)) = split_operator(expression, "contains") {
        return resolve_operand(&left, msg).contains(&strip_quotes(&right));
    }

    warn!(%expression, "could not evaluate flow condition");
    false
}

fn split_operator(expression: &str, operator: &str) -> Option<(String, String)> {
    let (left, right) = expression.split_once(operator)?;
    Some((left.trim().to_string(), right.trim().to_string()))
}

fn strip_quotes(value: &str) -> String {
    value.trim().trim_matches('"').trim_matches('\'').to_string()
}

fn resolve_operand(operand: &str, msg: &Comm) -> String {
    if operand == "content" {
        return msg.content.clone();
    }
    if let Some(key) = operand.strip_prefix("data.") {
        return match msg.data.get(key) {
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
    fn test_parse_flow_definition() {
        let yaml = r#"
apiVersion: aor.dev/v1
kind: Flow
metadata:
  name: triage
spec:
  strategy: SEQUENTIAL
  steps:
    - id: analyze
      agent: analyzer
    - id: process
      agent: processor
      when: data.analyzed == "true"
"#;
        let definition = FlowDefinition::from_yaml(yaml).unwrap();
        assert_eq!(definition.metadata.name, "triage");
        assert_eq!(definition.spec.strategy, FlowStrategy::Sequential);
        assert_eq!(definition.spec.steps.len(), 2);
        assert!(definition.spec.steps[1].when.is_some());
    }

    #[test]
    fn test_validation_rejects_duplicates_and_empty() {
        let yaml = r#"
metadata:
  name: bad
spec:
  steps:
    - id: a
      agent: x
    - id: a
      agent: y
"#;
        let err = FlowDefinition::from_yaml(yaml).unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");

        let yaml = r#"
metadata:
  name: empty
spec:
  steps: []
"#;
        let err = FlowDefinition::from_yaml(yaml).unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_evaluate_condition() {
        let msg = Comm::new("hello world", "user").with_data_entry("analyzed", json!("true"));

        assert!(evaluate_condition("true", &msg));
        assert!(!evaluate_condition("false", &msg));
        assert!(evaluate_condition("data.analyzed == \"true\"", &msg));
        assert!(!evaluate_condition("data.analyzed != \"true\"", &msg));
        assert!(evaluate_condition("data.missing == \"\"", &msg));
        assert!(evaluate_condition("content contains \"world\"", &msg));
        assert!(!evaluate_condition("content contains \"mars\"", &msg));
        assert!(!evaluate_condition("complete gibberish", &msg));
    }

    #[test]
    fn test_non_string_data_values_compare_by_json() {
        let msg = Comm::new("x", "user").with_data_entry("count", json!(3));
        assert!(evaluate_condition("data.count == 3", &msg));
    }
}
