// AOR Core - Foundation types and traits for the Agent Orchestration Runtime
//
// This crate provides the uniform result/error model, the ambient execution
// context, the Comm message type, and the tool/agent contracts that the
// engine crates build on.

pub mod agent;
pub mod cache;
pub mod comm;
pub mod context;
pub mod error;
pub mod result;
pub mod schema;
pub mod tool;

// Re-export core types
pub use agent::{Agent, AgentMetadata, AgentRef, AgentRegistry, FnAgent};
pub use cache::{CacheConfig, CacheKeyBuilder, CacheStats, CachedTool, default_cache_key};
pub use comm::{Comm, CommRole, CommType, Priority};
pub use context::{
    current_correlation_id, current_execution_context, current_tenant_id, current_user_id,
    require_execution_context, ExecutionContext,
};
pub use error::{AorError, ErrorKind};
pub use result::{catching, catching_async, recover_with_async, AorResult, ResultExt};
pub use schema::{
    OutputPredicate, OutputRule, OutputValidator, ParameterSpec, ParameterType, ToolSchema,
};
pub use tool::{FnTool, Tool, ToolRef, ToolRegistry, ToolResult, ToolStatus};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
