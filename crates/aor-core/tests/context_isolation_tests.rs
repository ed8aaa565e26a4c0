// Tenant isolation end-to-end: a tool that partitions storage by the
// ambient tenant id never leaks values across concurrent scopes, and the
// ambient context survives recovery boundaries.

use aor_core::{
    catching_async, current_tenant_id, recover_with_async, AorError, AorResult, ExecutionContext,
    FnTool, ParameterSpec, ParameterType, Tool, ToolResult, ToolSchema,
};
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn tenant_store_tool(storage: Arc<DashMap<String, Vec<String>>>) -> Arc<FnTool> {
    let schema = ToolSchema::new()
        .parameter(ParameterSpec::new("op", ParameterType::String).required())
        .parameter(ParameterSpec::new("value", ParameterType::String));

    Arc::new(FnTool::new("tenant_store", schema, move |params, _ctx| {
        let storage = Arc::clone(&storage);
        async move {
            let tenant = current_tenant_id()
                .ok_or_else(|| AorError::config("tenant_store requires a tenant id"))?;

            match params.get("op").and_then(|v| v.as_str()) {
                Some("store") => {
                    let value = params
                        .get("value")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    storage.entry(tenant).or_default().push(value);
                    Ok(ToolResult::success(json!({"stored": true})))
                }
                Some("list") => {
                    let values = storage
                        .get(&tenant)
                        .map(|entry| entry.value().clone())
                        .unwrap_or_default();
                    Ok(ToolResult::success(json!({"values": values})))
                }
                other => Err(AorError::validation_field(
                    "op",
                    format!("unsupported op {:?}", other),
                )),
            }
        }
    }))
}

fn store_params(value: &str) -> HashMap<String, serde_json::Value> {
    HashMap::from([
        ("op".to_string(), json!("store")),
        ("value".to_string(), json!(value)),
    ])
}

fn list_params() -> HashMap<String, serde_json::Value> {
    HashMap::from([("op".to_string(), json!("list"))])
}

#[tokio::test]
async fn test_tenants_never_observe_each_other() {
    let storage = Arc::new(DashMap::new());
    let tool = tenant_store_tool(storage);

    let tenant_a = ExecutionContext::new().with_tenant_id("tenant-a");
    let tenant_b = ExecutionContext::new().with_tenant_id("tenant-b");

    let store_a = {
        let tool = Arc::clone(&tool);
        let ctx = tenant_a.clone();
        tokio::spawn(ExecutionContext::scope(ctx.clone(), async move {
            tool.execute_validated(store_params("x"), &ctx).await
        }))
    };
    let store_b = {
        let tool = Arc::clone(&tool);
        let ctx = tenant_b.clone();
        tokio::spawn(ExecutionContext::scope(ctx.clone(), async move {
            tool.execute_validated(store_params("y"), &ctx).await
        }))
    };

    store_a.await.unwrap().unwrap();
    store_b.await.unwrap().unwrap();

    let listed_a = ExecutionContext::scope(tenant_a.clone(), async {
        tool.execute_validated(list_params(), &tenant_a).await
    })
    .await
    .unwrap();
    assert_eq!(listed_a.result["values"], json!(["x"]));

    let listed_b = ExecutionContext::scope(tenant_b.clone(), async {
        tool.execute_validated(list_params(), &tenant_b).await
    })
    .await
    .unwrap();
    assert_eq!(listed_b.result["values"], json!(["y"]));
}

#[tokio::test]
async fn test_missing_tenant_is_a_config_error() {
    let storage = Arc::new(DashMap::new());
    let tool = tenant_store_tool(storage);

    let err = tool
        .execute_validated(store_params("x"), &ExecutionContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TOOL_ERROR");
    assert_eq!(err.root_cause().code(), "CONFIGURATION_ERROR");
}

#[tokio::test]
async fn test_context_survives_recover_with_async() {
    let ctx = ExecutionContext::new().with_tenant_id("resilient");

    let observed = ExecutionContext::scope(ctx, async {
        let failing: AorResult<String> = Err(AorError::network("first attempt failed"));
        recover_with_async(failing, |_e| async {
            // The fallback future still sees the ambient scope.
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(current_tenant_id().unwrap_or_else(|| "lost".to_string()))
        })
        .await
    })
    .await
    .unwrap();

    assert_eq!(observed, "resilient");
}

#[tokio::test]
async fn test_context_survives_catching_async() {
    let ctx = ExecutionContext::new().with_tenant_id("caught");

    let observed = ExecutionContext::scope(ctx, async {
        catching_async(async {
            tokio::task::yield_now().await;
            Ok(current_tenant_id())
        })
        .await
    })
    .await
    .unwrap();

    assert_eq!(observed.as_deref(), Some("caught"));
}
