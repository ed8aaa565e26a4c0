// AOR Core - Error taxonomy
//
// Every fallible operation in the runtime returns `AorResult<T>`. The error
// type carries a stable string code, an extensible context map, and an
// optional cause chain. Policy layers (retry, circuit breaking, transport
// mapping) branch on `code()`, never on type identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Variant payload of an [`AorError`].
///
/// The variant determines the stable error code; typed fields hold the
/// diagnostic data specific to that failure class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Agent execution failure
    Agent {
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
    /// Message handling failure
    Comm {
        #[serde(skip_serializing_if = "Option::is_none")]
        comm_id: Option<String>,
    },
    /// Tool execution failure
    Tool { tool_name: String },
    /// Invalid or missing configuration
    Configuration {
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    /// Input validation failure
    Validation {
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        expected_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        actual_value: Option<serde_json::Value>,
    },
    /// Network-level failure
    Network {
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },
    /// Operation exceeded its deadline
    Timeout {
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
    },
    /// Authentication failure against a provider
    Authentication {
        #[serde(skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
    },
    /// Rate limit exceeded
    RateLimit {
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        limit_type: Option<String>,
    },
    /// Serialization or deserialization failure
    Serialization {
        #[serde(skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    /// Checkpoint persistence or restore failure
    Checkpoint {
        #[serde(skip_serializing_if = "Option::is_none")]
        checkpoint_id: Option<String>,
    },
    /// Event bus capacity exhausted under FAIL_PUBLISHER policy
    EventBusFull {
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    /// A message transformer raised
    Transformer { transformer: String },
    /// Operation was cancelled cooperatively
    Cancelled,
    /// Unclassified failure
    Unknown,
}

impl ErrorKind {
    /// Stable string code for this error class. Codes are part of the
    /// public contract and never change across versions.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Agent { .. } => "AGENT_ERROR",
            ErrorKind::Comm { .. } => "COMM_ERROR",
            ErrorKind::Tool { .. } => "TOOL_ERROR",
            ErrorKind::Configuration { .. } => "CONFIGURATION_ERROR",
            ErrorKind::Validation { .. } => "VALIDATION_ERROR",
            ErrorKind::Network { .. } => "NETWORK_ERROR",
            ErrorKind::Timeout { .. } => "TIMEOUT_ERROR",
            ErrorKind::Authentication { .. } => "AUTHENTICATION_ERROR",
            ErrorKind::RateLimit { .. } => "RATE_LIMIT_ERROR",
            ErrorKind::Serialization { .. } => "SERIALIZATION_ERROR",
            ErrorKind::Checkpoint { .. } => "CHECKPOINT_ERROR",
            ErrorKind::EventBusFull { .. } => "EVENT_BUS_FULL",
            ErrorKind::Transformer { .. } => "TRANSFORMER_ERROR",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Unknown => "UNKNOWN_ERROR",
        }
    }
}

/// The uniform error type of the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("[{}] {}", .kind.code(), .message)]
pub struct AorError {
    /// Failure class with typed diagnostic fields
    pub kind: ErrorKind,

    /// Human-readable description
    pub message: String,

    /// Extensible diagnostic context. Serializers must tolerate unknown keys.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Underlying cause, if any
    #[source]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AorError>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl AorError {
    /// Create an error with an explicit kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: HashMap::new(),
            cause: None,
            created_at: Utc::now(),
        }
    }

    /// Agent execution failure.
    pub fn agent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Agent { agent_id: None }, message)
    }

    /// Agent execution failure attributed to a specific agent.
    pub fn agent_with_id(agent_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Agent {
                agent_id: Some(agent_id.into()),
            },
            message,
        )
    }

    /// Message handling failure.
    pub fn comm(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Comm { comm_id: None }, message)
    }

    /// Tool execution failure.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Tool {
                tool_name: tool_name.into(),
            },
            message,
        )
    }

    /// Configuration failure.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration { field: None }, message)
    }

    /// Configuration failure attributed to a specific field.
    pub fn config_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Configuration {
                field: Some(field.into()),
            },
            message,
        )
    }

    /// Validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Validation {
                field: None,
                expected_type: None,
                actual_value: None,
            },
            message,
        )
    }

    /// Validation failure for a named field.
    pub fn validation_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Validation {
                field: Some(field.into()),
                expected_type: None,
                actual_value: None,
            },
            message,
        )
    }

    /// Validation failure for a type mismatch on a named field.
    pub fn validation_type_mismatch(
        field: impl Into<String>,
        expected_type: impl Into<String>,
        actual_value: serde_json::Value,
    ) -> Self {
        let field = field.into();
        let expected_type = expected_type.into();
        let message = format!("parameter '{}' expects type {}", field, expected_type);
        Self::new(
            ErrorKind::Validation {
                field: Some(field),
                expected_type: Some(expected_type),
                actual_value: Some(actual_value),
            },
            message,
        )
    }

    /// Network failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Network {
                status_code: None,
                endpoint: None,
            },
            message,
        )
    }

    /// Timeout failure for a named operation.
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        let operation = operation.into();
        let message = format!("operation '{}' timed out after {}ms", operation, timeout_ms);
        Self::new(
            ErrorKind::Timeout {
                timeout_ms: Some(timeout_ms),
                operation: Some(operation),
            },
            message,
        )
    }

    /// Authentication failure.
    pub fn authentication(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Authentication {
                provider: Some(provider.into()),
            },
            message,
        )
    }

    /// Rate limit exceeded.
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::RateLimit {
                retry_after_ms: None,
                limit_type: None,
            },
            message,
        )
    }

    /// Serialization failure.
    pub fn serialization(format: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Serialization {
                format: Some(format.into()),
            },
            message,
        )
    }

    /// Checkpoint failure.
    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Checkpoint { checkpoint_id: None }, message)
    }

    /// Checkpoint failure for a known checkpoint id.
    pub fn checkpoint_with_id(
        checkpoint_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorKind::Checkpoint {
                checkpoint_id: Some(checkpoint_id.into()),
            },
            message,
        )
    }

    /// Event bus at capacity under the FAIL_PUBLISHER policy.
    pub fn event_bus_full(channel: impl Into<String>) -> Self {
        let channel = channel.into();
        let message = format!("event channel '{}' is full", channel);
        Self::new(
            ErrorKind::EventBusFull {
                channel: Some(channel),
            },
            message,
        )
    }

    /// Transformer failure.
    pub fn transformer(transformer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Transformer {
                transformer: transformer.into(),
            },
            message,
        )
    }

    /// Cooperative cancellation.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Unclassified failure.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Stable code of this error.
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Return a copy with an added context entry.
    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Return a copy with multiple added context entries.
    pub fn with_context_pairs<I, K>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        for (k, v) in pairs {
            self.context.insert(k.into(), v);
        }
        self
    }

    /// Return a copy with the given cause attached.
    pub fn with_cause(mut self, cause: AorError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Walk the cause chain to the innermost error.
    pub fn root_cause(&self) -> &AorError {
        let mut current = self;
        while let Some(cause) = &current.cause {
            current = cause;
        }
        current
    }

    /// Classify a std IO error into the taxonomy.
    ///
    /// Host/connection failures map to Network, deadline kinds to Timeout,
    /// invalid input to Validation, malformed data to Serialization;
    /// everything else is Unknown.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind as IoKind;
        let message = err.to_string();
        match err.kind() {
            IoKind::NotFound
            | IoKind::ConnectionRefused
            | IoKind::ConnectionReset
            | IoKind::ConnectionAborted
            | IoKind::NotConnected
            | IoKind::AddrNotAvailable
            | IoKind::BrokenPipe => Self::network(message),
            IoKind::TimedOut | IoKind::WouldBlock => Self::new(
                ErrorKind::Timeout {
                    timeout_ms: None,
                    operation: None,
                },
                message,
            ),
            IoKind::InvalidInput => Self::validation(message),
            IoKind::InvalidData => Self::new(ErrorKind::Serialization { format: None }, message),
            _ => Self::unknown(message),
        }
    }

    /// Convert a captured panic payload into an Unknown error.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let text = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic with non-string payload".to_string());
        Self::unknown("caught panic in user code")
            .with_context("panic_message", serde_json::Value::String(text))
    }
}

impl From<std::io::Error> for AorError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(&err)
    }
}

impl From<serde_json::Error> for AorError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err.to_string())
    }
}
