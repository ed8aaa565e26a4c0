// AOR Core - Tool contract and registry
//
// A tool is a named callable with a declared parameter schema. The engine
// always goes through `execute_validated`, which validates parameters,
// captures panics from user code, honors the per-tool timeout, and applies
// the optional output validator.

use crate::context::ExecutionContext;
use crate::error::AorError;
use crate::result::{catching_async, AorResult};
use crate::schema::{OutputValidator, ToolSchema};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Terminal status of a tool invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolStatus {
    Success,
    Error,
    WaitingHitl,
    Timeout,
    Cancelled,
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub status: ToolStatus,

    /// Payload of the invocation
    pub result: serde_json::Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    pub fn success(result: impl Into<serde_json::Value>) -> Self {
        Self {
            status: ToolStatus::Success,
            result: result.into(),
            message: None,
            error: None,
            error_code: None,
            metadata: HashMap::new(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            result: serde_json::Value::Null,
            message: None,
            error: Some(error.into()),
            error_code: None,
            metadata: HashMap::new(),
        }
    }

    pub fn error_with_code(error: impl Into<String>, code: impl Into<String>) -> Self {
        let mut result = Self::error(error);
        result.error_code = Some(code.into());
        result
    }

    pub fn waiting_hitl(metadata: HashMap<String, serde_json::Value>) -> Self {
        Self {
            status: ToolStatus::WaitingHitl,
            result: serde_json::Value::Null,
            message: None,
            error: None,
            error_code: None,
            metadata,
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            status: ToolStatus::Timeout,
            result: serde_json::Value::Null,
            message: Some(format!(
                "'{}' timed out after {}ms",
                operation.into(),
                timeout_ms
            )),
            error: None,
            error_code: Some("TIMEOUT_ERROR".to_string()),
            metadata: HashMap::new(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: ToolStatus::Cancelled,
            result: serde_json::Value::Null,
            message: None,
            error: None,
            error_code: Some("CANCELLED".to_string()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metadata_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    pub fn is_waiting(&self) -> bool {
        self.status == ToolStatus::WaitingHitl
    }
}

/// Core tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name, unique within a registry.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str {
        ""
    }

    /// Declared parameter schema.
    fn schema(&self) -> &ToolSchema;

    /// Optional per-tool execution deadline. Expiry produces a
    /// `ToolResult` with TIMEOUT status, not an error.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Optional chain of rules applied to the result payload. A failing
    /// rule downgrades the result to ERROR status.
    fn output_validator(&self) -> Option<&OutputValidator> {
        None
    }

    /// Execute with pre-validated parameters. Implementations must not
    /// mutate the parameter map semantics; they receive their own copy.
    async fn execute(
        &self,
        params: HashMap<String, serde_json::Value>,
        ctx: &ExecutionContext,
    ) -> AorResult<ToolResult>;

    /// Validate, execute with panic capture and timeout, then apply output
    /// validation. This is the entry point the engines use.
    async fn execute_validated(
        &self,
        params: HashMap<String, serde_json::Value>,
        ctx: &ExecutionContext,
    ) -> AorResult<ToolResult> {
        let validated = self.schema().validate(&params)?;

        debug!(tool = %self.name(), "executing tool");
        let outcome = match self.timeout() {
            Some(deadline) => {
                match tokio::time::timeout(deadline, catching_async(self.execute(validated, ctx)))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(tool = %self.name(), timeout_ms = deadline.as_millis() as u64, "tool timed out");
                        return Ok(ToolResult::timeout(
                            self.name().to_string(),
                            deadline.as_millis() as u64,
                        ));
                    }
                }
            }
            None => catching_async(self.execute(validated, ctx)).await,
        };

        let result = outcome.map_err(|e| {
            AorError::tool(self.name(), format!("tool '{}' failed", self.name())).with_cause(e)
        })?;

        if result.is_success() {
            if let Some(validator) = self.output_validator() {
                if let Err(message) = validator.check(&result.result) {
                    warn!(tool = %self.name(), %message, "tool output failed validation");
                    return Ok(ToolResult::error(message));
                }
            }
        }

        Ok(result)
    }
}

/// Reference-counted tool.
pub type ToolRef = Arc<dyn Tool>;

/// Closure-backed tool, the lightweight way to define tools in embedding
/// code and tests.
pub struct FnTool {
    name: String,
    description: String,
    schema: ToolSchema,
    timeout: Option<Duration>,
    output_validator: Option<OutputValidator>,
    handler: Arc<
        dyn Fn(
                HashMap<String, serde_json::Value>,
                ExecutionContext,
            ) -> BoxFuture<'static, AorResult<ToolResult>>
            + Send
            + Sync,
    >,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, schema: ToolSchema, handler: F) -> Self
    where
        F: Fn(HashMap<String, serde_json::Value>, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = AorResult<ToolResult>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            schema,
            timeout: None,
            output_validator: None,
            handler: Arc::new(move |params, ctx| Box::pin(handler(params, ctx))),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_output_validator(mut self, validator: OutputValidator) -> Self {
        self.output_validator = Some(validator);
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn output_validator(&self) -> Option<&OutputValidator> {
        self.output_validator.as_ref()
    }

    async fn execute(
        &self,
        params: HashMap<String, serde_json::Value>,
        ctx: &ExecutionContext,
    ) -> AorResult<ToolResult> {
        (self.handler)(params, ctx.clone()).await
    }
}

/// Concurrent tool registry. Registration is idempotent by name: a
/// duplicate name replaces the prior entry. Instantiable per application;
/// there is no hidden global instance.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, ToolRef>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: ToolRef) {
        let name = tool.name().to_string();
        info!(tool = %name, "registering tool");
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<ToolRef> {
        self.tools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn list(&self) -> Vec<ToolRef> {
        self.tools
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
