// AOR Graph - Lifecycle events
//
// When events are enabled, the runner publishes node transitions, run
// completion, HITL requests, and state changes onto the bus. Publishing is
// best-effort: a full or failing channel is logged, never surfaced.

use crate::state::RunState;
use aor_core::AorResult;
use aor_events::{ChannelConfig, ChannelHandle, EventBus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Channel names for graph lifecycle events.
pub mod channels {
    pub const NODE_EXECUTION: &str = "aor.graph.node";
    pub const WORKFLOW_COMPLETED: &str = "aor.graph.completed";
    pub const HITL_REQUIRED: &str = "aor.hitl.required";
    pub const STATE_CHANGE: &str = "aor.graph.state";
}

const SCHEMA_VERSION: u32 = 1;

/// A node transition inside a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionEvent {
    pub graph_id: String,
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// "started", "completed", "failed", "skipped"
    pub event: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowCompletedEvent {
    pub run_id: String,
    pub graph_id: String,
    pub final_state: RunState,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A run suspended awaiting human input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlRequiredEvent {
    pub checkpoint_id: String,
    pub graph_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Run state machine transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangeEvent {
    pub run_id: String,
    pub from: RunState,
    pub to: RunState,
    pub timestamp: DateTime<Utc>,
}

/// Publisher handle bundling the four lifecycle channels.
#[derive(Clone)]
pub struct GraphEventPublisher {
    bus: Arc<EventBus>,
    node_channel: ChannelHandle<NodeExecutionEvent>,
    completed_channel: ChannelHandle<WorkflowCompletedEvent>,
    hitl_channel: ChannelHandle<HitlRequiredEvent>,
    state_channel: ChannelHandle<StateChangeEvent>,
}

impl GraphEventPublisher {
    /// Register the lifecycle schemas and create the channels.
    pub fn new(bus: Arc<EventBus>) -> AorResult<Self> {
        bus.register_schema::<NodeExecutionEvent>("NodeExecutionEvent", SCHEMA_VERSION);
        bus.register_schema::<WorkflowCompletedEvent>("WorkflowCompletedEvent", SCHEMA_VERSION);
        bus.register_schema::<HitlRequiredEvent>("HitlRequiredEvent", SCHEMA_VERSION);
        bus.register_schema::<StateChangeEvent>("StateChangeEvent", SCHEMA_VERSION);

        let node_channel = bus.channel(
            channels::NODE_EXECUTION,
            "NodeExecutionEvent",
            SCHEMA_VERSION,
            ChannelConfig::default(),
        )?;
        let completed_channel = bus.channel(
            channels::WORKFLOW_COMPLETED,
            "WorkflowCompletedEvent",
            SCHEMA_VERSION,
            ChannelConfig::default(),
        )?;
        let hitl_channel = bus.channel(
            channels::HITL_REQUIRED,
            "HitlRequiredEvent",
            SCHEMA_VERSION,
            ChannelConfig::default(),
        )?;
        let state_channel = bus.channel(
            channels::STATE_CHANGE,
            "StateChangeEvent",
            SCHEMA_VERSION,
            ChannelConfig::default(),
        )?;

        Ok(Self {
            bus,
            node_channel,
            completed_channel,
            hitl_channel,
            state_channel,
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub async fn node_event(&self, event: NodeExecutionEvent) {
        if let Err(e) = self
            .bus
            .publish(&self.node_channel, &event, HashMap::new())
            .await
        {
            warn!(error = %e, "failed to publish node execution event");
        }
    }

    pub async fn completed(&self, event: WorkflowCompletedEvent) {
        if let Err(e) = self
            .bus
            .publish(&self.completed_channel, &event, HashMap::new())
            .await
        {
            warn!(error = %e, "failed to publish workflow completed event");
        }
    }

    pub async fn hitl_required(&self, event: HitlRequiredEvent) {
        if let Err(e) = self
            .bus
            .publish(&self.hitl_channel, &event, HashMap::new())
            .await
        {
            warn!(error = %e, "failed to publish HITL required event");
        }
    }

    pub async fn state_change(&self, run_id: &str, from: RunState, to: RunState) {
        let event = StateChangeEvent {
            run_id: run_id.to_string(),
            from,
            to,
            timestamp: Utc::now(),
        };
        if let Err(e) = self
            .bus
            .publish(&self.state_channel, &event, HashMap::new())
            .await
        {
            warn!(error = %e, "failed to publish state change event");
        }
    }
}
