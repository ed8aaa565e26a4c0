// AOR Graph - Checkpoint store
//
// The runner writes a checkpoint after every successful node transition and
// when a run suspends for HITL. External bindings (Redis, Postgres) plug in
// behind the trait; the in-memory store is the reference implementation.

use aor_core::AorResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Persisted snapshot of a graph run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub run_id: String,

    pub graph_id: String,

    /// The node that just completed (or is suspended, for HITL waits)
    pub node_id: String,

    /// Snapshot of the run's accumulated state
    pub state: HashMap<String, serde_json::Value>,

    /// Middleware state keyed by middleware name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub middleware_state: HashMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,

    /// Set while the run is suspended awaiting a HITL response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_resume_token: Option<String>,
}

impl Checkpoint {
    pub fn new(
        run_id: impl Into<String>,
        graph_id: impl Into<String>,
        node_id: impl Into<String>,
        state: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            graph_id: graph_id.into(),
            node_id: node_id.into(),
            state,
            middleware_state: HashMap::new(),
            created_at: Utc::now(),
            pending_resume_token: None,
        }
    }

    pub fn with_middleware_state(
        mut self,
        middleware_state: HashMap<String, serde_json::Value>,
    ) -> Self {
        self.middleware_state = middleware_state;
        self
    }

    pub fn with_resume_token(mut self, token: impl Into<String>) -> Self {
        self.pending_resume_token = Some(token.into());
        self
    }
}

/// Storage contract for checkpoints. One checkpoint per run id: `save`
/// replaces the prior snapshot.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: Checkpoint) -> AorResult<()>;

    async fn load(&self, run_id: &str) -> AorResult<Option<Checkpoint>>;

    /// Find the suspended run holding the given resume token.
    async fn find_by_token(&self, token: &str) -> AorResult<Option<Checkpoint>>;

    async fn delete(&self, run_id: &str) -> AorResult<()>;
}

/// In-memory reference implementation.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: DashMap<String, Checkpoint>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> AorResult<()> {
        self.checkpoints
            .insert(checkpoint.run_id.clone(), checkpoint);
        Ok(())
    }

    async fn load(&self, run_id: &str) -> AorResult<Option<Checkpoint>> {
        Ok(self.checkpoints.get(run_id).map(|entry| entry.value().clone()))
    }

    async fn find_by_token(&self, token: &str) -> AorResult<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .iter()
            .find(|entry| entry.pending_resume_token.as_deref() == Some(token))
            .map(|entry| entry.value().clone()))
    }

    async fn delete(&self, run_id: &str) -> AorResult<()> {
        self.checkpoints.remove(run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_load_replace() {
        let store = InMemoryCheckpointStore::new();
        let state = HashMap::from([("k".to_string(), json!(1))]);

        store
            .save(Checkpoint::new("run-1", "g", "n1", state.clone()))
            .await
            .unwrap();
        store
            .save(Checkpoint::new("run-1", "g", "n2", state))
            .await
            .unwrap();

        let loaded = store.load("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.node_id, "n2");
        assert_eq!(store.len(), 1);

        store.delete("run-1").await.unwrap();
        assert!(store.load("run-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_token() {
        let store = InMemoryCheckpointStore::new();
        store
            .save(
                Checkpoint::new("run-1", "g", "hitl", HashMap::new())
                    .with_resume_token("token-9"),
            )
            .await
            .unwrap();
        store
            .save(Checkpoint::new("run-2", "g", "n1", HashMap::new()))
            .await
            .unwrap();

        let found = store.find_by_token("token-9").await.unwrap().unwrap();
        assert_eq!(found.run_id, "run-1");
        assert!(store.find_by_token("other").await.unwrap().is_none());
    }

    #[test]
    fn test_checkpoint_serde_round_trip() {
        let checkpoint = Checkpoint::new(
            "run-1",
            "g",
            "n1",
            HashMap::from([("x".to_string(), json!({"deep": [1, 2]}))]),
        )
        .with_resume_token("t");

        let encoded = serde_json::to_string(&checkpoint).unwrap();
        let decoded: Checkpoint = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.run_id, "run-1");
        assert_eq!(decoded.pending_resume_token.as_deref(), Some("t"));
        assert_eq!(decoded.state["x"], json!({"deep": [1, 2]}));
    }
}
