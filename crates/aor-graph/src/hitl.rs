// AOR Graph - Human-in-the-loop coordination
//
// The HITL tool emits a request through an injected emitter port and returns
// WAITING_HITL; the runner suspends the run at a checkpoint carrying the
// tool-call id as resume token. An external resumer delivers the response
// through the bus; the coordinator finds the suspended run by token and
// resumes it.

use crate::node::HITL_CALL_ID_KEY;
use aor_core::{
    AorError, AorResult, ExecutionContext, FnTool, ParameterSpec, ParameterType, ToolRef,
    ToolResult, ToolSchema, ToolStatus,
};
use aor_events::{ChannelConfig, ChannelHandle, EventBus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Channel names for HITL coordination.
pub mod channels {
    pub const REQUEST: &str = "aor.hitl.request";
    pub const RESPONSE: &str = "aor.hitl.response";
}

const SCHEMA_VERSION: u32 = 1;

/// How the human is expected to answer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionType {
    #[default]
    Single,
    Multiple,
    FreeText,
}

/// Outbound request for human input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlRequest {
    pub tool_call_id: String,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub allow_free_text: bool,
    #[serde(default)]
    pub selection_type: SelectionType,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Outcome of a human interaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HitlResponseStatus {
    Completed,
    Timeout,
    Cancelled,
    Error,
}

impl HitlResponseStatus {
    /// 1:1 mapping onto tool result statuses.
    pub fn as_tool_status(&self) -> ToolStatus {
        match self {
            HitlResponseStatus::Completed => ToolStatus::Success,
            HitlResponseStatus::Timeout => ToolStatus::Timeout,
            HitlResponseStatus::Cancelled => ToolStatus::Cancelled,
            HitlResponseStatus::Error => ToolStatus::Error,
        }
    }
}

/// Inbound response delivered by the external resumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlResponse {
    pub tool_call_id: String,
    pub status: HitlResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HitlResponse {
    pub fn completed(tool_call_id: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            status: HitlResponseStatus::Completed,
            value: Some(value.into()),
            message: None,
        }
    }

    pub fn cancelled(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            status: HitlResponseStatus::Cancelled,
            value: None,
            message: None,
        }
    }

    pub fn timed_out(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            status: HitlResponseStatus::Timeout,
            value: None,
            message: None,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            status: HitlResponseStatus::Error,
            value: None,
            message: Some(message.into()),
        }
    }
}

/// Port through which HITL requests leave the engine and responses return.
#[async_trait]
pub trait HitlEventEmitter: Send + Sync {
    async fn emit_request(&self, request: HitlRequest) -> AorResult<()>;

    async fn deliver_response(&self, response: HitlResponse) -> AorResult<()>;
}

/// Emitter backed by the event bus.
pub struct EventBusHitlEmitter {
    bus: Arc<EventBus>,
    request_channel: ChannelHandle<HitlRequest>,
    response_channel: ChannelHandle<HitlResponse>,
}

impl EventBusHitlEmitter {
    pub fn new(bus: Arc<EventBus>) -> AorResult<Self> {
        bus.register_schema::<HitlRequest>("HitlRequest", SCHEMA_VERSION);
        bus.register_schema::<HitlResponse>("HitlResponse", SCHEMA_VERSION);

        // Command channels: block publishers rather than drop responses.
        let request_channel = bus.channel(
            channels::REQUEST,
            "HitlRequest",
            SCHEMA_VERSION,
            ChannelConfig::command(),
        )?;
        let response_channel = bus.channel(
            channels::RESPONSE,
            "HitlResponse",
            SCHEMA_VERSION,
            ChannelConfig::command(),
        )?;

        Ok(Self {
            bus,
            request_channel,
            response_channel,
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Subscribe to outbound requests (for UIs and external resumers).
    pub fn subscribe_requests(&self) -> aor_events::Subscription<HitlRequest> {
        self.bus.subscribe(&self.request_channel)
    }

    /// Subscribe to inbound responses (used by the coordinator).
    pub fn subscribe_responses(&self) -> aor_events::Subscription<HitlResponse> {
        self.bus.subscribe(&self.response_channel)
    }
}

#[async_trait]
impl HitlEventEmitter for EventBusHitlEmitter {
    async fn emit_request(&self, request: HitlRequest) -> AorResult<()> {
        info!(tool_call = %request.tool_call_id, "emitting HITL request");
        self.bus
            .publish(&self.request_channel, &request, HashMap::new())
            .await?;
        Ok(())
    }

    async fn deliver_response(&self, response: HitlResponse) -> AorResult<()> {
        info!(tool_call = %response.tool_call_id, status = ?response.status, "delivering HITL response");
        self.bus
            .publish(&self.response_channel, &response, HashMap::new())
            .await?;
        Ok(())
    }
}

/// Build the human-selection tool around an emitter.
///
/// The tool emits a request and returns WAITING_HITL with the tool-call id
/// in its metadata; the graph runner turns that into a suspended run.
pub fn hitl_selection_tool(emitter: Arc<dyn HitlEventEmitter>) -> ToolRef {
    let schema = ToolSchema::new()
        .parameter(
            ParameterSpec::new("prompt", ParameterType::String)
                .describe("question shown to the human")
                .required(),
        )
        .parameter(
            ParameterSpec::new("options", ParameterType::Array)
                .describe("selectable options")
                .with_default(serde_json::json!([])),
        )
        .parameter(
            ParameterSpec::new("allow_free_text", ParameterType::Boolean).with_default(false),
        );

    Arc::new(FnTool::new(
        "hitl_selection",
        schema,
        move |params: HashMap<String, serde_json::Value>, _ctx: ExecutionContext| {
            let emitter = Arc::clone(&emitter);
            async move {
                let tool_call_id = Uuid::new_v4().to_string();
                let prompt = params
                    .get("prompt")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let options: Vec<String> = params
                    .get("options")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str().map(|s| s.to_string()))
                            .collect()
                    })
                    .unwrap_or_default();
                let allow_free_text = params
                    .get("allow_free_text")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let selection_type = if allow_free_text {
                    SelectionType::FreeText
                } else {
                    SelectionType::Single
                };

                emitter
                    .emit_request(HitlRequest {
                        tool_call_id: tool_call_id.clone(),
                        prompt: prompt.clone(),
                        options: options.clone(),
                        allow_free_text,
                        selection_type,
                        metadata: HashMap::new(),
                    })
                    .await?;

                Ok(ToolResult::waiting_hitl(HashMap::from([
                    (HITL_CALL_ID_KEY.to_string(), serde_json::json!(tool_call_id)),
                    ("prompt".to_string(), serde_json::json!(prompt)),
                    ("options".to_string(), serde_json::json!(options)),
                    (
                        "allow_free_text".to_string(),
                        serde_json::json!(allow_free_text),
                    ),
                    (
                        "selection_type".to_string(),
                        serde_json::to_value(selection_type)
                            .unwrap_or(serde_json::Value::Null),
                    ),
                ])))
            }
        },
    ))
}

/// Listens on the response channel and resumes suspended runs.
pub struct HitlCoordinator {
    emitter: Arc<EventBusHitlEmitter>,
    runner: Arc<crate::runner::GraphRunner>,
}

impl HitlCoordinator {
    pub fn new(emitter: Arc<EventBusHitlEmitter>, runner: Arc<crate::runner::GraphRunner>) -> Self {
        Self { emitter, runner }
    }

    /// Spawn the resume loop. The task exits when the response subscription
    /// closes.
    pub fn start(self) -> JoinHandle<()> {
        let mut responses = self.emitter.subscribe_responses();
        let runner = self.runner;
        tokio::spawn(async move {
            while let Some(event) = responses.recv().await {
                let response = event.payload;
                let token = response.tool_call_id.clone();
                match runner.resume(&token, response).await {
                    Ok(report) => {
                        info!(run = %report.run_id, status = %report.status, "resumed run from HITL response");
                    }
                    Err(e) if e.code() == "CHECKPOINT_ERROR" => {
                        warn!(%token, error = %e, "HITL response did not match a suspended run");
                    }
                    Err(e) => {
                        warn!(%token, error = %e, "failed to resume run from HITL response");
                    }
                }
            }
        })
    }
}

/// Convert a HITL response into the tool-result shape a resumed node sees.
pub(crate) fn response_error(response: &HitlResponse) -> Option<AorError> {
    match response.status {
        HitlResponseStatus::Completed => None,
        HitlResponseStatus::Timeout => Some(AorError::timeout("hitl_selection", 0)),
        HitlResponseStatus::Cancelled => {
            Some(AorError::cancelled("human cancelled the interaction"))
        }
        HitlResponseStatus::Error => Some(AorError::tool(
            "hitl_selection",
            response
                .message
                .clone()
                .unwrap_or_else(|| "human interaction failed".to_string()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aor_core::Tool;
    use parking_lot::Mutex;

    struct RecordingEmitter {
        requests: Mutex<Vec<HitlRequest>>,
    }

    #[async_trait]
    impl HitlEventEmitter for RecordingEmitter {
        async fn emit_request(&self, request: HitlRequest) -> AorResult<()> {
            self.requests.lock().push(request);
            Ok(())
        }

        async fn deliver_response(&self, _response: HitlResponse) -> AorResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_selection_tool_emits_and_waits() {
        let emitter = Arc::new(RecordingEmitter {
            requests: Mutex::new(Vec::new()),
        });
        let tool = hitl_selection_tool(Arc::clone(&emitter) as Arc<dyn HitlEventEmitter>);

        let params = HashMap::from([
            ("prompt".to_string(), serde_json::json!("Pick one")),
            ("options".to_string(), serde_json::json!(["A", "B"])),
        ]);
        let result = tool
            .execute_validated(params, &ExecutionContext::new())
            .await
            .unwrap();

        assert_eq!(result.status, ToolStatus::WaitingHitl);
        let call_id = result.metadata[HITL_CALL_ID_KEY].as_str().unwrap();

        let requests = emitter.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tool_call_id, call_id);
        assert_eq!(requests[0].options, vec!["A", "B"]);
        assert_eq!(requests[0].selection_type, SelectionType::Single);
    }

    #[tokio::test]
    async fn test_selection_tool_requires_prompt() {
        let emitter = Arc::new(RecordingEmitter {
            requests: Mutex::new(Vec::new()),
        });
        let tool = hitl_selection_tool(emitter);
        let err = tool
            .execute_validated(HashMap::new(), &ExecutionContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_event_bus_emitter_round_trip() {
        let bus = Arc::new(EventBus::new());
        let emitter = Arc::new(EventBusHitlEmitter::new(bus).unwrap());

        let mut requests = emitter.subscribe_requests();
        let mut responses = emitter.subscribe_responses();

        emitter
            .emit_request(HitlRequest {
                tool_call_id: "call-1".to_string(),
                prompt: "?".to_string(),
                options: vec![],
                allow_free_text: true,
                selection_type: SelectionType::FreeText,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(requests.recv().await.unwrap().payload.tool_call_id, "call-1");

        emitter
            .deliver_response(HitlResponse::completed("call-1", "A"))
            .await
            .unwrap();
        let received = responses.recv().await.unwrap().payload;
        assert_eq!(received.status, HitlResponseStatus::Completed);
        assert_eq!(received.value, Some(serde_json::json!("A")));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            HitlResponseStatus::Completed.as_tool_status(),
            ToolStatus::Success
        );
        assert_eq!(
            HitlResponseStatus::Timeout.as_tool_status(),
            ToolStatus::Timeout
        );
        assert_eq!(
            HitlResponseStatus::Cancelled.as_tool_status(),
            ToolStatus::Cancelled
        );
        assert_eq!(HitlResponseStatus::Error.as_tool_status(), ToolStatus::Error);
    }
}
