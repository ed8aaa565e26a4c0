// AOR Graph - Middleware chain
//
// Middlewares wrap node execution as an onion: each receives a `Next`
// continuation that advances to the following middleware or, at the center,
// to the node itself. `Next` is consumed by value, so a middleware can call
// it at most once; the runner linearizes across nodes, keeping recursion
// depth bounded by the middleware count.

use crate::node::{Node, NodeContext, NodeResult};
use crate::runner::RunReport;
use aor_core::{catching_async, AorError, AorResult, ExecutionContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Immutable facts about the current run, handed to middleware hooks.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub graph_id: String,
    pub run_id: String,
    pub execution_context: Option<ExecutionContext>,
    pub started_at: DateTime<Utc>,
}

/// What the runner is about to execute.
#[derive(Debug, Clone)]
pub struct NodeRequest {
    pub node_id: String,
    /// The previous node's output (the node's input)
    pub input: Option<serde_json::Value>,
    pub run: RunContext,
}

/// Decision of the `on_error` chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorAction {
    /// Surface the failure; the run fails
    Propagate,
    /// Jump to a designated recovery node
    Recover { node_id: String },
    /// Treat the node as a terminal success with null output
    Suppress,
}

/// Interceptor participating in a graph run.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str {
        "middleware"
    }

    async fn on_start(&self, _ctx: &RunContext) -> AorResult<()> {
        Ok(())
    }

    /// Wrap a node execution. The default is transparent pass-through.
    async fn on_node(&self, request: &NodeRequest, next: Next<'_>) -> AorResult<NodeResult> {
        next.run(request).await
    }

    /// Inspect a node failure and decide how the run proceeds.
    async fn on_error(&self, _error: &AorError, _ctx: &RunContext) -> ErrorAction {
        ErrorAction::Propagate
    }

    /// Observe the final report. Best-effort: the runner logs failures here
    /// and never surfaces them.
    async fn on_finish(&self, _report: &RunReport) {}

    /// State to persist into checkpoints, keyed by `name()`.
    fn export_state(&self) -> Option<serde_json::Value> {
        None
    }

    /// Restore state captured by `export_state` on resume.
    fn restore_state(&self, _state: serde_json::Value) {}
}

/// Continuation to the rest of the middleware chain and, ultimately, the
/// node. Consumed by value: calling `run` uses it up.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    node: &'a Arc<dyn Node>,
    ctx: &'a NodeContext,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        chain: &'a [Arc<dyn Middleware>],
        node: &'a Arc<dyn Node>,
        ctx: &'a NodeContext,
    ) -> Self {
        Self { chain, node, ctx }
    }

    /// Advance to the next middleware, or run the node at the center of the
    /// onion. Panics inside node code are captured as Unknown failures.
    pub async fn run(self, request: &NodeRequest) -> AorResult<NodeResult> {
        match self.chain.split_first() {
            Some((middleware, rest)) => {
                middleware
                    .on_node(request, Next::new(rest, self.node, self.ctx))
                    .await
            }
            None => catching_async(self.node.run(self.ctx)).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::PREVIOUS_KEY;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;

    struct RecordingMiddleware {
        label: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for RecordingMiddleware {
        fn name(&self) -> &str {
            &self.label
        }

        async fn on_node(&self, request: &NodeRequest, next: Next<'_>) -> AorResult<NodeResult> {
            self.log.lock().push(format!("{}:before", self.label));
            let result = next.run(request).await;
            self.log.lock().push(format!("{}:after", self.label));
            result
        }
    }

    struct StaticNode {
        id: String,
        value: serde_json::Value,
    }

    #[async_trait]
    impl Node for StaticNode {
        fn id(&self) -> &str {
            &self.id
        }

        async fn run(&self, _ctx: &NodeContext) -> AorResult<NodeResult> {
            Ok(NodeResult::new(self.value.clone()))
        }
    }

    fn request() -> NodeRequest {
        NodeRequest {
            node_id: "n".to_string(),
            input: None,
            run: RunContext {
                graph_id: "g".to_string(),
                run_id: "r".to_string(),
                execution_context: None,
                started_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_onion_ordering() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(RecordingMiddleware {
                label: "outer".to_string(),
                log: Arc::clone(&log),
            }),
            Arc::new(RecordingMiddleware {
                label: "inner".to_string(),
                log: Arc::clone(&log),
            }),
        ];
        let node: Arc<dyn Node> = Arc::new(StaticNode {
            id: "n".to_string(),
            value: json!(1),
        });
        let ctx = NodeContext::new("g", "r", HashMap::new(), None);

        let result = Next::new(&chain, &node, &ctx).run(&request()).await.unwrap();
        assert_eq!(result.data, json!(1));
        assert_eq!(
            *log.lock(),
            vec!["outer:before", "inner:before", "inner:after", "outer:after"]
        );
    }

    struct PanickingNode;

    #[async_trait]
    impl Node for PanickingNode {
        fn id(&self) -> &str {
            "panicky"
        }

        async fn run(&self, _ctx: &NodeContext) -> AorResult<NodeResult> {
            panic!("node exploded");
        }
    }

    #[tokio::test]
    async fn test_node_panic_is_captured() {
        let chain: Vec<Arc<dyn Middleware>> = Vec::new();
        let node: Arc<dyn Node> = Arc::new(PanickingNode);
        let ctx = NodeContext::new("g", "r", HashMap::new(), None);

        let err = Next::new(&chain, &node, &ctx)
            .run(&request())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_ERROR");
        assert!(err.context.contains_key("panic_message"));
    }

    struct ShortCircuitMiddleware;

    #[async_trait]
    impl Middleware for ShortCircuitMiddleware {
        async fn on_node(&self, _request: &NodeRequest, _next: Next<'_>) -> AorResult<NodeResult> {
            Ok(NodeResult::new(json!("short-circuited")))
        }
    }

    #[tokio::test]
    async fn test_middleware_can_short_circuit() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(ShortCircuitMiddleware)];
        let node: Arc<dyn Node> = Arc::new(PanickingNode);
        let ctx = NodeContext::new("g", "r", HashMap::new(), None);
        ctx.set(PREVIOUS_KEY, json!("x"));

        let result = Next::new(&chain, &node, &ctx).run(&request()).await.unwrap();
        assert_eq!(result.data, json!("short-circuited"));
    }
}
