// AOR Graph - Idempotency store
//
// Deduplicates graph runs by a caller-supplied key within a TTL. A hit
// returns the cached report without executing any node.

use crate::runner::RunReport;
use aor_core::AorResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Storage contract for run deduplication.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Cached report for the key, if present and unexpired.
    async fn get(&self, key: &str) -> AorResult<Option<RunReport>>;

    async fn put(&self, key: &str, report: RunReport, ttl: Duration) -> AorResult<()>;
}

struct StoredEntry {
    report: RunReport,
    created_at: Instant,
    ttl: Duration,
}

/// In-memory reference implementation with eviction on read.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    entries: DashMap<String, StoredEntry>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> AorResult<Option<RunReport>> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.created_at.elapsed() > entry.ttl {
                    true
                } else {
                    return Ok(Some(entry.report.clone()));
                }
            }
            None => return Ok(None),
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, report: RunReport, ttl: Duration) -> AorResult<()> {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                report,
                created_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunState;

    fn report(run_id: &str) -> RunReport {
        RunReport {
            graph_id: "g".to_string(),
            run_id: run_id.to_string(),
            status: RunState::Success,
            result: Some(serde_json::json!("done")),
            error: None,
            duration_ms: 1,
            node_reports: Vec::new(),
            resumption_token: None,
        }
    }

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let store = InMemoryIdempotencyStore::new();
        store
            .put("key", report("run-1"), Duration::from_secs(60))
            .await
            .unwrap();

        let cached = store.get("key").await.unwrap().unwrap();
        assert_eq!(cached.run_id, "run-1");
    }

    #[tokio::test]
    async fn test_expired_entry_is_evicted() {
        let store = InMemoryIdempotencyStore::new();
        store
            .put("key", report("run-1"), Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.get("key").await.unwrap().is_none());
        assert_eq!(store.len(), 0);
    }
}
