// AOR Graph - Message transformer chain
//
// Transformers are the high-level interceptors layered on top of middleware,
// with hooks around the whole execution and around individual nodes. A
// transformer that declares `continue_on_failure` cannot halt its peers;
// the `after_execution` hook is a cleanup phase and always runs every
// transformer regardless of individual failures.

use crate::node::{NodeContext, NodeResult};
use aor_core::{catching_async, AorError, AorResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// High-level interceptor over a graph run.
#[async_trait]
pub trait MessageTransformer: Send + Sync {
    fn name(&self) -> &str;

    /// When true, a failure in this transformer does not halt the chain.
    fn continue_on_failure(&self) -> bool {
        false
    }

    async fn before_execution(&self, _ctx: &NodeContext) -> AorResult<()> {
        Ok(())
    }

    async fn before_node(&self, _node_id: &str, _ctx: &NodeContext) -> AorResult<()> {
        Ok(())
    }

    async fn after_node(
        &self,
        _node_id: &str,
        _result: &NodeResult,
        _ctx: &NodeContext,
    ) -> AorResult<()> {
        Ok(())
    }

    async fn after_execution(&self, _ctx: &NodeContext) -> AorResult<()> {
        Ok(())
    }
}

/// Ordered transformer chain with the halt/continue semantics applied.
#[derive(Clone, Default)]
pub struct TransformerChain {
    transformers: Vec<Arc<dyn MessageTransformer>>,
}

enum Hook<'a> {
    BeforeExecution,
    BeforeNode(&'a str),
    AfterNode(&'a str, &'a NodeResult),
    AfterExecution,
}

impl TransformerChain {
    pub fn new(transformers: Vec<Arc<dyn MessageTransformer>>) -> Self {
        Self { transformers }
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    async fn invoke(
        transformer: &Arc<dyn MessageTransformer>,
        hook: &Hook<'_>,
        ctx: &NodeContext,
    ) -> AorResult<()> {
        // Panics become TRANSFORMER_ERROR; returned failures keep their own
        // code and propagate as-is.
        let outcome = match hook {
            Hook::BeforeExecution => catching_async(transformer.before_execution(ctx)).await,
            Hook::BeforeNode(node_id) => {
                catching_async(transformer.before_node(node_id, ctx)).await
            }
            Hook::AfterNode(node_id, result) => {
                catching_async(transformer.after_node(node_id, result, ctx)).await
            }
            Hook::AfterExecution => catching_async(transformer.after_execution(ctx)).await,
        };
        outcome.map_err(|e| {
            if matches!(e.kind, aor_core::ErrorKind::Unknown) {
                AorError::transformer(
                    transformer.name(),
                    format!("transformer '{}' raised", transformer.name()),
                )
                .with_cause(e)
            } else {
                e
            }
        })
    }

    async fn run_hook(&self, hook: Hook<'_>, ctx: &NodeContext) -> AorResult<()> {
        for transformer in &self.transformers {
            if let Err(e) = Self::invoke(transformer, &hook, ctx).await {
                if transformer.continue_on_failure() {
                    warn!(
                        transformer = %transformer.name(),
                        error = %e,
                        "transformer failed, continuing"
                    );
                    continue;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    pub async fn before_execution(&self, ctx: &NodeContext) -> AorResult<()> {
        self.run_hook(Hook::BeforeExecution, ctx).await
    }

    pub async fn before_node(&self, node_id: &str, ctx: &NodeContext) -> AorResult<()> {
        self.run_hook(Hook::BeforeNode(node_id), ctx).await
    }

    pub async fn after_node(
        &self,
        node_id: &str,
        result: &NodeResult,
        ctx: &NodeContext,
    ) -> AorResult<()> {
        self.run_hook(Hook::AfterNode(node_id, result), ctx).await
    }

    /// Cleanup phase: every transformer runs; failures are logged only.
    pub async fn after_execution(&self, ctx: &NodeContext) {
        for transformer in &self.transformers {
            if let Err(e) = Self::invoke(transformer, &Hook::AfterExecution, ctx).await {
                warn!(
                    transformer = %transformer.name(),
                    error = %e,
                    "after_execution transformer failed"
                );
            }
        }
    }
}
