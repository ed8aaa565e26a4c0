// AOR Core - Agent contract and registry
//
// An agent consumes a Comm and produces a reply-or-error. Provider-backed
// implementations (LLM adapters, RAG pipelines) live outside the runtime;
// the engine only sees this contract.

use crate::comm::Comm;
use crate::result::AorResult;
use crate::tool::ToolRef;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Agent identity and declared capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    /// Unique agent id
    pub id: String,

    /// Display name
    pub name: String,

    /// Description of what the agent does
    #[serde(default)]
    pub description: String,

    /// Supported capabilities
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Custom metadata
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl AgentMetadata {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            capabilities: Vec::new(),
            extra: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }
}

/// Core agent trait.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Agent metadata (id, name, capabilities).
    fn metadata(&self) -> &AgentMetadata;

    /// Tools owned by this agent. Flows and graphs may also hand tools to
    /// agents externally; ownership here is optional.
    fn tools(&self) -> Vec<ToolRef> {
        Vec::new()
    }

    /// Process a message and produce a reply.
    async fn process_message(&self, msg: Comm) -> AorResult<Comm>;
}

/// Reference-counted agent.
pub type AgentRef = Arc<dyn Agent>;

/// Closure-backed agent for embedding code and tests.
pub struct FnAgent {
    metadata: AgentMetadata,
    tools: Vec<ToolRef>,
    handler: Arc<dyn Fn(Comm) -> BoxFuture<'static, AorResult<Comm>> + Send + Sync>,
}

impl FnAgent {
    pub fn new<F, Fut>(id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Comm) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = AorResult<Comm>> + Send + 'static,
    {
        Self {
            metadata: AgentMetadata::new(id),
            tools: Vec::new(),
            handler: Arc::new(move |comm| Box::pin(handler(comm))),
        }
    }

    pub fn with_metadata(mut self, metadata: AgentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_tool(mut self, tool: ToolRef) -> Self {
        self.tools.push(tool);
        self
    }
}

#[async_trait]
impl Agent for FnAgent {
    fn metadata(&self) -> &AgentMetadata {
        &self.metadata
    }

    fn tools(&self) -> Vec<ToolRef> {
        self.tools.clone()
    }

    async fn process_message(&self, msg: Comm) -> AorResult<Comm> {
        (self.handler)(msg).await
    }
}

/// Concurrent agent registry. Registration is idempotent by id: a duplicate
/// id replaces the prior entry. Registries are optional; flows and graphs
/// may hold direct references instead.
#[derive(Default)]
pub struct AgentRegistry {
    agents: DashMap<String, AgentRef>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, agent: AgentRef) {
        let id = agent.metadata().id.clone();
        info!(agent = %id, "registering agent");
        self.agents.insert(id, agent);
    }

    pub fn get(&self, id: &str) -> Option<AgentRef> {
        self.agents.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn list(&self) -> Vec<AgentRef> {
        self.agents
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.agents.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper_agent(id: &str) -> AgentRef {
        Arc::new(FnAgent::new(id.to_string(), |msg: Comm| async move {
            let content = msg.content.to_uppercase();
            Ok(msg.reply(content, "upper"))
        }))
    }

    #[tokio::test]
    async fn test_fn_agent_processes_message() {
        let agent = upper_agent("upper");
        let reply = agent
            .process_message(Comm::new("hello", "user"))
            .await
            .unwrap();
        assert_eq!(reply.content, "HELLO");
        assert_eq!(reply.to.as_deref(), Some("user"));
    }

    #[test]
    fn test_registry_idempotent_by_id() {
        let registry = AgentRegistry::new();
        registry.register(upper_agent("a"));
        registry.register(upper_agent("a"));
        registry.register(upper_agent("b"));

        assert_eq!(registry.len(), 2);
        assert!(registry.get("a").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_metadata_builder() {
        let meta = AgentMetadata::new("analyzer")
            .with_name("Analyzer")
            .with_description("analyzes input")
            .with_capability("analysis");
        assert_eq!(meta.id, "analyzer");
        assert_eq!(meta.name, "Analyzer");
        assert_eq!(meta.capabilities, vec!["analysis".to_string()]);
    }
}
