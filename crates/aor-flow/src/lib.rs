// AOR Flow - Multi-agent flow engine for the Agent Orchestration Runtime
//
// Executes an ordered set of agents under one of four strategies, with
// per-step conditions and a dynamic strategy resolver.

pub mod config;
pub mod flow;
pub mod strategy;

// Re-export main types
pub use config::{evaluate_condition, FlowDefinition, FlowMetadata, FlowSpec, StepDefinition};
pub use flow::{AgentSelector, FlowStep, MultiAgentFlow, StepCondition, StrategyResolver};
pub use strategy::FlowStrategy;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
