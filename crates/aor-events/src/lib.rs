// AOR Events - Unified event bus for the Agent Orchestration Runtime
//
// Typed channels with registered schemas, per-subscriber bounded queues,
// configurable overflow policies, and a dead-letter path for payloads the
// bus cannot deserialize.

pub mod bus;
pub mod channel;
pub mod schema;

// Re-export main types
pub use bus::{ChannelHandle, ChannelStats, EventBus, EventBusStats, Subscription};
pub use channel::{
    ChannelConfig, DeadLetterEntry, EventEnvelope, EventFilter, OverflowPolicy, TypedEvent,
};
pub use schema::{SchemaCodec, SchemaRegistry};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
