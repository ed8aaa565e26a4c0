// AOR Graph - Graph structure and construction-time validation
//
// A graph is a DAG of nodes with conditional edges, validated once at
// construction: every edge endpoint must exist, the entry point must exist,
// and at least one terminal node must be reachable from the entry.

use crate::middleware::Middleware;
use crate::node::{MetadataPolicy, Node, NodeRef, NodeResult};
use crate::transformer::MessageTransformer;
use aor_core::{AorError, AorResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Edge predicate over the completed node's result.
pub type EdgeCondition = Arc<dyn Fn(&NodeResult) -> bool + Send + Sync>;

/// Directed edge. Declaration order matters: the runner takes the first
/// matching edge.
#[derive(Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub condition: Option<EdgeCondition>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    pub fn when<F>(mut self, condition: F) -> Self
    where
        F: Fn(&NodeResult) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn matches(&self, result: &NodeResult) -> bool {
        self.condition.as_ref().map_or(true, |c| c(result))
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

/// Per-node schema validation invoked before each node runs.
#[async_trait]
pub trait ValidationPipeline: Send + Sync {
    async fn validate(&self, node_id: &str, input: &serde_json::Value) -> AorResult<()>;
}

/// A validated, executable graph.
pub struct Graph {
    pub id: String,
    nodes: HashMap<String, NodeRef>,
    edges: Vec<Edge>,
    entry_point: String,
    pub(crate) middleware: Vec<Arc<dyn Middleware>>,
    pub(crate) transformers: Vec<Arc<dyn MessageTransformer>>,
    pub(crate) validation: Option<Arc<dyn ValidationPipeline>>,
    pub(crate) metadata_policy: MetadataPolicy,
}

impl Graph {
    pub fn builder(id: impl Into<String>) -> GraphBuilder {
        GraphBuilder::new(id)
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn node(&self, id: &str) -> Option<&NodeRef> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.keys().map(|k| k.as_str()).collect()
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn edges_from<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from == node_id)
    }

    /// First matching edge target for a completed node, honoring an
    /// explicit `next_edges` restriction on the result.
    pub fn select_next(&self, node_id: &str, result: &NodeResult) -> Option<String> {
        self.edges_from(node_id)
            .filter(|edge| match &result.next_edges {
                Some(allowed) => allowed.contains(&edge.to),
                None => true,
            })
            .find(|edge| edge.matches(result))
            .map(|edge| edge.to.clone())
    }

    fn has_outgoing(&self, node_id: &str) -> bool {
        self.edges.iter().any(|e| e.from == node_id)
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .field("entry_point", &self.entry_point)
            .finish()
    }
}

/// Builder producing a validated [`Graph`].
pub struct GraphBuilder {
    id: String,
    nodes: HashMap<String, NodeRef>,
    edges: Vec<Edge>,
    entry_point: Option<String>,
    middleware: Vec<Arc<dyn Middleware>>,
    transformers: Vec<Arc<dyn MessageTransformer>>,
    validation: Option<Arc<dyn ValidationPipeline>>,
    metadata_policy: MetadataPolicy,
}

impl GraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: HashMap::new(),
            edges: Vec::new(),
            entry_point: None,
            middleware: Vec::new(),
            transformers: Vec::new(),
            validation: None,
            metadata_policy: MetadataPolicy::default(),
        }
    }

    pub fn add_node<N: Node + 'static>(mut self, node: N) -> Self {
        self.nodes.insert(node.id().to_string(), Arc::new(node));
        self
    }

    pub fn add_node_ref(mut self, node: NodeRef) -> Self {
        self.nodes.insert(node.id().to_string(), node);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    pub fn add_edge_when<F>(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: F,
    ) -> Self
    where
        F: Fn(&NodeResult) -> bool + Send + Sync + 'static,
    {
        self.edges.push(Edge::new(from, to).when(condition));
        self
    }

    pub fn entry_point(mut self, node_id: impl Into<String>) -> Self {
        self.entry_point = Some(node_id.into());
        self
    }

    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn middleware_ref(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn transformer<T: MessageTransformer + 'static>(mut self, transformer: T) -> Self {
        self.transformers.push(Arc::new(transformer));
        self
    }

    pub fn transformer_ref(mut self, transformer: Arc<dyn MessageTransformer>) -> Self {
        self.transformers.push(transformer);
        self
    }

    pub fn validation<V: ValidationPipeline + 'static>(mut self, pipeline: V) -> Self {
        self.validation = Some(Arc::new(pipeline));
        self
    }

    pub fn metadata_policy(mut self, policy: MetadataPolicy) -> Self {
        self.metadata_policy = policy;
        self
    }

    /// Validate and produce the graph.
    pub fn build(self) -> AorResult<Graph> {
        let entry_point = self
            .entry_point
            .ok_or_else(|| AorError::config_field("entry_point", "graph entry point is required"))?;

        if self.nodes.is_empty() {
            return Err(AorError::config("graph requires at least one node"));
        }

        if !self.nodes.contains_key(&entry_point) {
            return Err(AorError::config_field(
                "entry_point",
                format!("entry point '{}' is not a node", entry_point),
            ));
        }

        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.from) {
                return Err(AorError::config(format!(
                    "edge references unknown node '{}'",
                    edge.from
                )));
            }
            if !self.nodes.contains_key(&edge.to) {
                return Err(AorError::config(format!(
                    "edge references unknown node '{}'",
                    edge.to
                )));
            }
        }

        let graph = Graph {
            id: self.id,
            nodes: self.nodes,
            edges: self.edges,
            entry_point,
            middleware: self.middleware,
            transformers: self.transformers,
            validation: self.validation,
            metadata_policy: self.metadata_policy,
        };

        // At least one terminal must be reachable from the entry, or every
        // run would walk edges forever.
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([graph.entry_point.clone()]);
        let mut terminal_reachable = false;
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if !graph.has_outgoing(&current) {
                terminal_reachable = true;
            }
            for edge in graph.edges_from(&current) {
                queue.push_back(edge.to.clone());
            }
        }
        if !terminal_reachable {
            return Err(AorError::config(format!(
                "graph '{}' has no terminal node reachable from '{}'",
                graph.id, graph.entry_point
            )));
        }

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeContext, OutputNode};
    use serde_json::json;

    fn noop(id: &str) -> OutputNode {
        OutputNode::passthrough(id)
    }

    fn two_node_builder() -> GraphBuilder {
        Graph::builder("g")
            .add_node(noop("a"))
            .add_node(noop("b"))
            .add_edge("a", "b")
            .entry_point("a")
    }

    #[test]
    fn test_build_valid_graph() {
        let graph = two_node_builder().build().unwrap();
        assert_eq!(graph.entry_point(), "a");
        assert_eq!(graph.node_ids().len(), 2);
    }

    #[test]
    fn test_missing_entry_point_fails() {
        let err = Graph::builder("g").add_node(noop("a")).build().unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");

        let err = Graph::builder("g")
            .add_node(noop("a"))
            .entry_point("ghost")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_dangling_edge_fails() {
        let err = Graph::builder("g")
            .add_node(noop("a"))
            .add_edge("a", "ghost")
            .entry_point("a")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_cycle_without_terminal_fails() {
        let err = Graph::builder("g")
            .add_node(noop("a"))
            .add_node(noop("b"))
            .add_edge("a", "b")
            .add_edge("b", "a")
            .entry_point("a")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_first_matching_edge_wins() {
        let graph = Graph::builder("g")
            .add_node(noop("a"))
            .add_node(noop("first"))
            .add_node(noop("second"))
            .add_edge_when("a", "first", |_| true)
            .add_edge_when("a", "second", |_| true)
            .entry_point("a")
            .build()
            .unwrap();

        let next = graph.select_next("a", &NodeResult::new(json!(1)));
        assert_eq!(next.as_deref(), Some("first"));
    }

    #[test]
    fn test_conditional_edge_selection() {
        let graph = Graph::builder("g")
            .add_node(noop("a"))
            .add_node(noop("high"))
            .add_node(noop("low"))
            .add_edge_when("a", "high", |r| {
                r.data.get("score").and_then(|s| s.as_i64()).unwrap_or(0) > 5
            })
            .add_edge("a", "low")
            .entry_point("a")
            .build()
            .unwrap();

        let high = graph.select_next("a", &NodeResult::new(json!({"score": 9})));
        assert_eq!(high.as_deref(), Some("high"));

        let low = graph.select_next("a", &NodeResult::new(json!({"score": 2})));
        assert_eq!(low.as_deref(), Some("low"));
    }

    #[test]
    fn test_next_edges_restriction() {
        let graph = Graph::builder("g")
            .add_node(noop("a"))
            .add_node(noop("x"))
            .add_node(noop("y"))
            .add_edge("a", "x")
            .add_edge("a", "y")
            .entry_point("a")
            .build()
            .unwrap();

        let restricted =
            NodeResult::new(json!(1)).with_next_edges(vec!["y".to_string()]);
        assert_eq!(graph.select_next("a", &restricted).as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn test_no_matching_edge_is_terminal() {
        let graph = Graph::builder("g")
            .add_node(noop("a"))
            .add_node(noop("b"))
            .add_edge_when("a", "b", |_| false)
            .entry_point("a")
            .build()
            .unwrap();

        // Exercise the node too, so the graph is not just topology.
        let ctx = NodeContext::new("g", "r", Default::default(), None);
        ctx.set(crate::node::PREVIOUS_KEY, json!("v"));
        let result = graph.node("a").unwrap().run(&ctx).await.unwrap();
        assert!(graph.select_next("a", &result).is_none());
    }
}
