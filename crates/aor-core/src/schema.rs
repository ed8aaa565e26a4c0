// AOR Core - Tool parameter schemas and output validation
//
// Parameters are validated against the declared schema before a tool runs.
// Validation errors are deterministic and field-named so they can be fed
// straight back to a user. Output rules run against the result payload and
// downgrade the result rather than failing the call.

use crate::error::AorError;
use crate::result::AorResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    pub fn name(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Integer => "integer",
            ParameterType::Number => "number",
            ParameterType::Boolean => "boolean",
            ParameterType::Array => "array",
            ParameterType::Object => "object",
        }
    }

    /// Whether a JSON value satisfies this type.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Integer => value.is_i64() || value.is_u64(),
            ParameterType::Number => value.is_number(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Array => value.is_array(),
            ParameterType::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single parameter declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub param_type: ParameterType,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required: false,
            default: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<serde_json::Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Declared parameter schema of a tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    /// Validate a parameter map against the schema.
    ///
    /// Returns a new map with defaults applied. The caller's map is never
    /// mutated. Unknown parameters pass through untouched.
    pub fn validate(
        &self,
        params: &HashMap<String, serde_json::Value>,
    ) -> AorResult<HashMap<String, serde_json::Value>> {
        let mut validated = params.clone();

        for spec in &self.parameters {
            match validated.get(&spec.name) {
                Some(value) if value.is_null() && !spec.required => {}
                Some(value) => {
                    if !spec.param_type.matches(value) {
                        return Err(AorError::validation_type_mismatch(
                            spec.name.clone(),
                            spec.param_type.name(),
                            value.clone(),
                        ));
                    }
                }
                None => {
                    if let Some(default) = &spec.default {
                        validated.insert(spec.name.clone(), default.clone());
                    } else if spec.required {
                        return Err(AorError::validation_field(
                            spec.name.clone(),
                            format!("missing required parameter '{}'", spec.name),
                        ));
                    }
                }
            }
        }

        Ok(validated)
    }
}

/// Predicate used by [`OutputRule::Custom`].
pub type OutputPredicate = Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>;

/// A single output validation rule.
#[derive(Clone)]
pub enum OutputRule {
    /// The result object must contain the named field.
    RequireField(String),
    /// The named field, when present, must have the given type.
    FieldType(String, ParameterType),
    /// Arbitrary predicate over the whole result value.
    Custom { name: String, predicate: OutputPredicate },
}

impl fmt::Debug for OutputRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputRule::RequireField(field) => write!(f, "RequireField({})", field),
            OutputRule::FieldType(field, ty) => write!(f, "FieldType({}, {})", field, ty),
            OutputRule::Custom { name, .. } => write!(f, "Custom({})", name),
        }
    }
}

/// Chain of output rules evaluated against a tool's result payload.
#[derive(Debug, Clone, Default)]
pub struct OutputValidator {
    rules: Vec<OutputRule>,
}

impl OutputValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_field(mut self, field: impl Into<String>) -> Self {
        self.rules.push(OutputRule::RequireField(field.into()));
        self
    }

    pub fn field_type(mut self, field: impl Into<String>, param_type: ParameterType) -> Self {
        self.rules
            .push(OutputRule::FieldType(field.into(), param_type));
        self
    }

    pub fn custom<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&serde_json::Value) -> bool + Send + Sync + 'static,
    {
        self.rules.push(OutputRule::Custom {
            name: name.into(),
            predicate: Arc::new(predicate),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate the chain; the first failing rule yields the failure message.
    pub fn check(&self, value: &serde_json::Value) -> Result<(), String> {
        for rule in &self.rules {
            match rule {
                OutputRule::RequireField(field) => {
                    let present = value.get(field).map(|v| !v.is_null()).unwrap_or(false);
                    if !present {
                        return Err(format!("output is missing required field '{}'", field));
                    }
                }
                OutputRule::FieldType(field, ty) => {
                    if let Some(actual) = value.get(field) {
                        if !ty.matches(actual) {
                            return Err(format!("output field '{}' is not of type {}", field, ty));
                        }
                    }
                }
                OutputRule::Custom { name, predicate } => {
                    if !predicate(value) {
                        return Err(format!("output failed validation rule '{}'", name));
                    }
                }
            }
        }
        Ok(())
    }
}
