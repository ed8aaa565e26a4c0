// AOR Graph - Graph execution engine for the Agent Orchestration Runtime
//
// Directed graphs of typed nodes executed with middleware, transformer
// hooks, checkpointing, idempotency, and pause/resume for human-in-the-loop
// waits.

pub mod checkpoint;
pub mod config;
pub mod events;
pub mod graph;
pub mod hitl;
pub mod idempotency;
pub mod middleware;
pub mod node;
pub mod runner;
pub mod state;
pub mod transformer;

// Re-export main types
pub use checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};
pub use config::{EdgeDefinition, GraphDefinition, GraphMetadata, GraphSpec, NodeDefinition, NodeKind};
pub use events::{
    GraphEventPublisher, HitlRequiredEvent, NodeExecutionEvent, StateChangeEvent,
    WorkflowCompletedEvent,
};
pub use graph::{Edge, EdgeCondition, Graph, GraphBuilder, ValidationPipeline};
pub use hitl::{
    hitl_selection_tool, EventBusHitlEmitter, HitlCoordinator, HitlEventEmitter, HitlRequest,
    HitlResponse, HitlResponseStatus, SelectionType,
};
pub use idempotency::{IdempotencyStore, InMemoryIdempotencyStore};
pub use middleware::{ErrorAction, Middleware, Next, NodeRequest, RunContext};
pub use node::{
    AgentNode, MetadataPolicy, Node, NodeContext, NodeRef, NodeResult, OutputNode, OverflowAction,
    ParamMapper, ToolNode, HITL_CALL_ID_KEY, HITL_PENDING_KEY, PREVIOUS_KEY,
};
pub use runner::{GraphRunner, NodeReport, NodeStatus, RunReport, RunnerConfig, IDEMPOTENCY_KEY};
pub use state::{RunState, RunStateMachine};
pub use transformer::{MessageTransformer, TransformerChain};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
