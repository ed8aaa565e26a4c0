// AOR Core - Context-keyed tool cache
//
// Wraps any tool with a TTL + LRU cache keyed by the canonicalized
// parameter map and the caller's identity fingerprint (tenant|user|session).
// Only SUCCESS results are cached; validation failures and HITL waits never
// are. LRU bookkeeping uses a monotonic access counter so eviction order is
// deterministic under test.

use crate::context::ExecutionContext;
use crate::result::AorResult;
use crate::schema::{OutputValidator, ToolSchema};
use crate::tool::{Tool, ToolRef, ToolResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Builds a cache key from the parameter map and execution context.
pub type CacheKeyBuilder =
    Arc<dyn Fn(&HashMap<String, serde_json::Value>, &ExecutionContext) -> String + Send + Sync>;

/// Cache behavior knobs.
#[derive(Clone)]
pub struct CacheConfig {
    /// Eviction threshold; an insert at this size evicts the LRU entry first.
    pub max_size: usize,

    /// Entry lifetime; expired entries read as misses and are removed.
    pub ttl: Duration,

    /// Custom key function; overrides the default hash when set.
    pub key_builder: Option<CacheKeyBuilder>,

    /// Honor `bypass_cache=true` in the parameter map.
    pub respect_bypass: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl: Duration::from_secs(300),
            key_builder: None,
            respect_bypass: true,
        }
    }
}

impl std::fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("max_size", &self.max_size)
            .field("ttl", &self.ttl)
            .field("custom_key_builder", &self.key_builder.is_some())
            .field("respect_bypass", &self.respect_bypass)
            .finish()
    }
}

/// Cache counters snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub hit_rate: f64,
}

struct CacheEntry {
    value: ToolResult,
    created_at: Instant,
    hit_count: AtomicU64,
    last_accessed: AtomicU64,
}

/// Caching wrapper around any tool.
pub struct CachedTool {
    inner: ToolRef,
    config: CacheConfig,
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    access_tick: AtomicU64,
}

impl CachedTool {
    pub fn new(inner: ToolRef, config: CacheConfig) -> Self {
        Self {
            inner,
            config,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            access_tick: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: ToolRef) -> Self {
        Self::new(inner, CacheConfig::default())
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            size: self.entries.len(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    /// Whether a key currently resides in the cache (ignores TTL).
    pub fn contains(&self, params: &HashMap<String, serde_json::Value>, ctx: &ExecutionContext) -> bool {
        self.entries.contains_key(&self.key_for(params, ctx))
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn key_for(
        &self,
        params: &HashMap<String, serde_json::Value>,
        ctx: &ExecutionContext,
    ) -> String {
        if let Some(builder) = &self.config.key_builder {
            return builder(params, ctx);
        }
        default_cache_key(params, ctx)
    }

    fn next_tick(&self) -> u64 {
        self.access_tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn lookup(&self, key: &str) -> Option<ToolResult> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.created_at.elapsed() > self.config.ttl {
                    true
                } else {
                    entry.hit_count.fetch_add(1, Ordering::Relaxed);
                    entry.last_accessed.store(self.next_tick(), Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
            }
            None => return None,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    fn insert(&self, key: String, value: ToolResult) {
        if self.entries.len() >= self.config.max_size && !self.entries.contains_key(&key) {
            self.evict_lru();
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
                hit_count: AtomicU64::new(0),
                last_accessed: AtomicU64::new(self.next_tick()),
            },
        );
    }

    /// Strict LRU over the access counter, ties broken by key order.
    fn evict_lru(&self) {
        let mut victim: Option<(u64, String)> = None;
        for entry in self.entries.iter() {
            let accessed = entry.last_accessed.load(Ordering::Relaxed);
            let candidate = (accessed, entry.key().clone());
            victim = match victim {
                None => Some(candidate),
                Some(current) if candidate < current => Some(candidate),
                Some(current) => Some(current),
            };
        }
        if let Some((_, key)) = victim {
            debug!(%key, "evicting LRU cache entry");
            self.entries.remove(&key);
        }
    }
}

/// SHA-256 over sorted params (keys starting with `__` excluded) plus the
/// identity fingerprint of the execution context.
pub fn default_cache_key(
    params: &HashMap<String, serde_json::Value>,
    ctx: &ExecutionContext,
) -> String {
    let mut keys: Vec<&String> = params
        .keys()
        .filter(|k| !k.starts_with("__"))
        .collect();
    keys.sort();

    let mut canonical = String::new();
    for key in keys {
        canonical.push_str(key);
        canonical.push('=');
        canonical.push_str(&params[key].to_string());
        canonical.push(';');
    }
    canonical.push_str("::");
    canonical.push_str(&ctx.fingerprint());

    let digest = Sha256::digest(canonical.as_bytes());
    format!("{:x}", digest)
}

#[async_trait]
impl Tool for CachedTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn schema(&self) -> &ToolSchema {
        self.inner.schema()
    }

    fn timeout(&self) -> Option<Duration> {
        self.inner.timeout()
    }

    fn output_validator(&self) -> Option<&OutputValidator> {
        self.inner.output_validator()
    }

    async fn execute(
        &self,
        params: HashMap<String, serde_json::Value>,
        ctx: &ExecutionContext,
    ) -> AorResult<ToolResult> {
        if self.config.respect_bypass
            && params
                .get("bypass_cache")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        {
            // Delegate without recording.
            return self.inner.execute(params, ctx).await;
        }

        let key = self.key_for(&params, ctx);

        if let Some(cached) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(tool = %self.name(), "cache hit");
            return Ok(cached);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let result = self.inner.execute(params, ctx).await?;

        if result.is_success() {
            self.insert(key, result.clone());
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ParameterSpec, ParameterType};
    use crate::tool::FnTool;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counting_tool(counter: Arc<AtomicUsize>) -> ToolRef {
        Arc::new(FnTool::new(
            "expensive_query",
            ToolSchema::new()
                .parameter(ParameterSpec::new("id", ParameterType::Integer).required()),
            move |params, _ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(ToolResult::success(json!({
                        "id": params.get("id").cloned().unwrap_or_default()
                    })))
                }
            },
        ))
    }

    fn params(id: i64) -> HashMap<String, serde_json::Value> {
        HashMap::from([("id".to_string(), json!(id))])
    }

    #[tokio::test]
    async fn test_lru_with_ttl_scenario() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cached = CachedTool::new(
            counting_tool(Arc::clone(&counter)),
            CacheConfig {
                max_size: 2,
                ttl: Duration::from_secs(10),
                ..CacheConfig::default()
            },
        );
        let ctx = ExecutionContext::new();

        // id=1, id=2, id=1, id=3, id=2, id=1
        for id in [1, 2, 1, 3, 2, 1] {
            cached.execute(params(id), &ctx).await.unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 4);
        let stats = cached.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 4);
        assert!(cached.contains(&params(1), &ctx));
    }

    #[tokio::test]
    async fn test_hits_plus_misses_equals_calls() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cached = CachedTool::with_defaults(counting_tool(counter));
        let ctx = ExecutionContext::new();

        let total = 17;
        for i in 0..total {
            cached.execute(params(i % 5), &ctx).await.unwrap();
        }

        let stats = cached.stats();
        assert_eq!(stats.hits + stats.misses, total as u64);
        assert_eq!(stats.misses, 5);
    }

    #[tokio::test]
    async fn test_lru_eviction_determinism() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cached = CachedTool::new(
            counting_tool(counter),
            CacheConfig {
                max_size: 3,
                ttl: Duration::from_secs(10),
                ..CacheConfig::default()
            },
        );
        let ctx = ExecutionContext::new();

        // Fill k1..k3, then insert k4: k1 is evicted.
        for id in [1, 2, 3, 4] {
            cached.execute(params(id), &ctx).await.unwrap();
        }
        assert!(!cached.contains(&params(1), &ctx));
        assert!(cached.contains(&params(2), &ctx));

        cached.clear();

        // Fill k1..k3, touch k1, insert k4: k2 is evicted.
        for id in [1, 2, 3] {
            cached.execute(params(id), &ctx).await.unwrap();
        }
        cached.execute(params(1), &ctx).await.unwrap();
        cached.execute(params(4), &ctx).await.unwrap();
        assert!(cached.contains(&params(1), &ctx));
        assert!(!cached.contains(&params(2), &ctx));
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_a_miss() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cached = CachedTool::new(
            counting_tool(Arc::clone(&counter)),
            CacheConfig {
                max_size: 10,
                ttl: Duration::from_millis(30),
                ..CacheConfig::default()
            },
        );
        let ctx = ExecutionContext::new();

        cached.execute(params(1), &ctx).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        cached.execute(params(1), &ctx).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        let stats = cached.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn test_context_fingerprint_partitions_cache() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cached = CachedTool::with_defaults(counting_tool(Arc::clone(&counter)));

        let tenant_a = ExecutionContext::new().with_tenant_id("a");
        let tenant_b = ExecutionContext::new().with_tenant_id("b");

        cached.execute(params(1), &tenant_a).await.unwrap();
        cached.execute(params(1), &tenant_b).await.unwrap();
        cached.execute(params(1), &tenant_a).await.unwrap();

        // Distinct tenants never share entries.
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(cached.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_bypass_delegates_without_recording() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cached = CachedTool::with_defaults(counting_tool(Arc::clone(&counter)));
        let ctx = ExecutionContext::new();

        let mut p = params(1);
        p.insert("bypass_cache".to_string(), json!(true));

        cached.execute(p.clone(), &ctx).await.unwrap();
        cached.execute(p, &ctx).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        let stats = cached.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.size, 0);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let flaky = {
            let attempts = Arc::clone(&attempts);
            Arc::new(FnTool::new("flaky", ToolSchema::new(), move |_p, _c| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok(ToolResult::error("always fails"))
                }
            }))
        };
        let cached = CachedTool::with_defaults(flaky);
        let ctx = ExecutionContext::new();

        cached.execute(HashMap::new(), &ctx).await.unwrap();
        cached.execute(HashMap::new(), &ctx).await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(cached.stats().size, 0);
    }

    #[test]
    fn test_default_key_excludes_internal_params() {
        let ctx = ExecutionContext::new().with_tenant_id("t");
        let base = HashMap::from([("a".to_string(), json!(1))]);
        let mut with_internal = base.clone();
        with_internal.insert("__trace".to_string(), json!("xyz"));

        assert_eq!(
            default_cache_key(&base, &ctx),
            default_cache_key(&with_internal, &ctx)
        );
    }

    #[test]
    fn test_custom_key_builder_overrides_default() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cached = CachedTool::new(
            counting_tool(counter),
            CacheConfig {
                key_builder: Some(Arc::new(|_, _| "constant".to_string())),
                ..CacheConfig::default()
            },
        );
        let ctx = ExecutionContext::new();
        assert_eq!(cached.key_for(&params(1), &ctx), "constant");
        assert_eq!(cached.key_for(&params(2), &ctx), "constant");
    }
}
