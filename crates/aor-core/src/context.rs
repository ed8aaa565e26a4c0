// AOR Core - Execution context
//
// Scoped key/value metadata (tenant, user, correlation) propagated through
// every engine-owned suspension point. Propagation rides on tokio's
// task-local storage rather than explicit parameter threading: entering a
// scope makes the context ambient for every await inside it. Spawned
// subtasks do not inherit task locals, so engine code that spawns re-enters
// the scope explicitly with a captured copy.
//
// There is no global default context. Absence is legal; components that
// require a key document it and fail with a configuration error.

use crate::error::AorError;
use crate::result::AorResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;

tokio::task_local! {
    static EXECUTION_CONTEXT: ExecutionContext;
}

/// Immutable carrier of per-call metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,

    /// Arbitrary extension keys
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extensions: HashMap<String, serde_json::Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    pub fn with_extension(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// Right-biased merge: `overrides` wins where set, parent keys are
    /// preserved otherwise.
    pub fn merged_with(&self, overrides: &ExecutionContext) -> Self {
        let mut extensions = self.extensions.clone();
        extensions.extend(overrides.extensions.clone());
        Self {
            tenant_id: overrides.tenant_id.clone().or_else(|| self.tenant_id.clone()),
            user_id: overrides.user_id.clone().or_else(|| self.user_id.clone()),
            session_id: overrides
                .session_id
                .clone()
                .or_else(|| self.session_id.clone()),
            correlation_id: overrides
                .correlation_id
                .clone()
                .or_else(|| self.correlation_id.clone()),
            causation_id: overrides
                .causation_id
                .clone()
                .or_else(|| self.causation_id.clone()),
            extensions,
        }
    }

    /// Identity fingerprint used for context-keyed caching.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}",
            self.tenant_id.as_deref().unwrap_or(""),
            self.user_id.as_deref().unwrap_or(""),
            self.session_id.as_deref().unwrap_or("")
        )
    }

    /// Run a future with this context as the ambient execution context.
    pub async fn scope<F: Future>(ctx: ExecutionContext, fut: F) -> F::Output {
        EXECUTION_CONTEXT.scope(ctx, fut).await
    }

    /// Run a future in a child scope: the current ambient context merged
    /// with `overrides` (right-biased).
    pub async fn child_scope<F: Future>(overrides: ExecutionContext, fut: F) -> F::Output {
        let merged = match current_execution_context() {
            Some(parent) => parent.merged_with(&overrides),
            None => overrides,
        };
        EXECUTION_CONTEXT.scope(merged, fut).await
    }
}

/// Read the ambient execution context, if any.
pub fn current_execution_context() -> Option<ExecutionContext> {
    EXECUTION_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

/// Read the ambient execution context, failing when absent.
pub fn require_execution_context() -> AorResult<ExecutionContext> {
    current_execution_context()
        .ok_or_else(|| AorError::config("no execution context in the current scope"))
}

/// Tenant id from the ambient context; None when absent.
pub fn current_tenant_id() -> Option<String> {
    EXECUTION_CONTEXT
        .try_with(|ctx| ctx.tenant_id.clone())
        .ok()
        .flatten()
}

/// User id from the ambient context; None when absent.
pub fn current_user_id() -> Option<String> {
    EXECUTION_CONTEXT
        .try_with(|ctx| ctx.user_id.clone())
        .ok()
        .flatten()
}

/// Correlation id from the ambient context; None when absent.
pub fn current_correlation_id() -> Option<String> {
    EXECUTION_CONTEXT
        .try_with(|ctx| ctx.correlation_id.clone())
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scope_makes_context_ambient() {
        let ctx = ExecutionContext::new()
            .with_tenant_id("acme")
            .with_user_id("u1");

        ExecutionContext::scope(ctx, async {
            assert_eq!(current_tenant_id().as_deref(), Some("acme"));
            assert_eq!(current_user_id().as_deref(), Some("u1"));
            assert!(current_correlation_id().is_none());
        })
        .await;

        assert!(current_execution_context().is_none());
    }

    #[tokio::test]
    async fn test_require_fails_outside_scope() {
        let err = require_execution_context().unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[tokio::test]
    async fn test_child_scope_right_biased_merge() {
        let parent = ExecutionContext::new()
            .with_tenant_id("acme")
            .with_extension("region", json!("eu"));
        let child = ExecutionContext::new()
            .with_user_id("u2")
            .with_extension("region", json!("us"));

        ExecutionContext::scope(parent, async {
            ExecutionContext::child_scope(child, async {
                let ctx = require_execution_context().unwrap();
                assert_eq!(ctx.tenant_id.as_deref(), Some("acme"));
                assert_eq!(ctx.user_id.as_deref(), Some("u2"));
                assert_eq!(ctx.extensions.get("region"), Some(&json!("us")));
            })
            .await;

            // Parent scope unchanged after the child exits.
            let ctx = require_execution_context().unwrap();
            assert!(ctx.user_id.is_none());
            assert_eq!(ctx.extensions.get("region"), Some(&json!("eu")));
        })
        .await;
    }

    #[tokio::test]
    async fn test_concurrent_sibling_scopes_are_isolated() {
        let a = tokio::spawn(ExecutionContext::scope(
            ExecutionContext::new().with_tenant_id("tenant-a"),
            async {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                current_tenant_id()
            },
        ));
        let b = tokio::spawn(ExecutionContext::scope(
            ExecutionContext::new().with_tenant_id("tenant-b"),
            async {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                current_tenant_id()
            },
        ));

        assert_eq!(a.await.unwrap().as_deref(), Some("tenant-a"));
        assert_eq!(b.await.unwrap().as_deref(), Some("tenant-b"));
    }

    #[test]
    fn test_fingerprint() {
        let ctx = ExecutionContext::new()
            .with_tenant_id("t")
            .with_session_id("s");
        assert_eq!(ctx.fingerprint(), "t||s");
        assert_eq!(ExecutionContext::new().fingerprint(), "||");
    }
}
