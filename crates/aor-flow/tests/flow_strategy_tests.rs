// End-to-end flow scenarios: conditional sequential chains, competition
// cancellation, and per-strategy call-count invariants.

use aor_core::{AgentRef, AgentRegistry, Comm, FnAgent};
use aor_flow::{FlowDefinition, FlowStep, FlowStrategy, MultiAgentFlow};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn analyzer() -> AgentRef {
    Arc::new(FnAgent::new("analyzer", |msg: Comm| async move {
        Ok(msg
            .reply(format!("Analysis: {}", msg.content), "analyzer")
            .with_data_entry("analyzed", json!("true")))
    }))
}

fn processor() -> AgentRef {
    Arc::new(FnAgent::new("processor", |msg: Comm| async move {
        Ok(msg.reply(format!("Processed: {}", msg.content), "processor"))
    }))
}

fn delayed_agent(id: &str, delay: Duration, completions: Arc<AtomicUsize>) -> AgentRef {
    let id_owned = id.to_string();
    Arc::new(FnAgent::new(id.to_string(), move |msg: Comm| {
        let id = id_owned.clone();
        let completions = Arc::clone(&completions);
        async move {
            tokio::time::sleep(delay).await;
            completions.fetch_add(1, Ordering::SeqCst);
            Ok(msg.reply(format!("{} finished", id), id.clone()))
        }
    }))
}

#[tokio::test]
async fn test_sequential_flow_with_condition() {
    let flow = MultiAgentFlow::new("triage")
        .step(FlowStep::with_agent("analyze", analyzer()))
        .step(
            FlowStep::with_agent("process", processor())
                .when(|msg| msg.data_str("analyzed") == Some("true")),
        );

    let reply = flow.process(Comm::new("Raw", "user")).await.unwrap();

    assert_eq!(reply.content, "Processed: Analysis: Raw");
    assert_eq!(reply.data["flow_strategy"], json!("SEQUENTIAL"));
    assert_eq!(reply.data["completed_steps"], json!(2));
}

#[tokio::test]
async fn test_sequential_condition_skips_step() {
    let flow = MultiAgentFlow::new("triage")
        .step(FlowStep::with_agent("analyze", analyzer()))
        .step(
            FlowStep::with_agent("process", processor())
                .when(|msg| msg.data_str("analyzed") == Some("never")),
        );

    let reply = flow.process(Comm::new("Raw", "user")).await.unwrap();
    assert_eq!(reply.content, "Analysis: Raw");
    assert_eq!(reply.data["completed_steps"], json!(1));
    assert_eq!(reply.data["skipped_steps"], json!(1));
}

#[tokio::test]
async fn test_competition_cancels_losers() {
    let completions = Arc::new(AtomicUsize::new(0));

    let flow = MultiAgentFlow::new("race")
        .with_strategy(FlowStrategy::Competition)
        .step(FlowStep::with_agent(
            "fast",
            delayed_agent("fast", Duration::from_millis(100), Arc::clone(&completions)),
        ))
        .step(FlowStep::with_agent(
            "medium",
            delayed_agent("medium", Duration::from_millis(300), Arc::clone(&completions)),
        ))
        .step(FlowStep::with_agent(
            "slow",
            delayed_agent("slow", Duration::from_millis(500), Arc::clone(&completions)),
        ));

    let reply = flow.process(Comm::new("go", "user")).await.unwrap();
    assert_eq!(reply.content, "fast finished");
    assert_eq!(reply.data["flow_strategy"], json!("COMPETITION"));

    // The losers observe cancellation at their sleep and never complete.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sequential_exact_call_counts() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut flow = MultiAgentFlow::new("counting");
    for i in 0..4 {
        let calls = Arc::clone(&calls);
        let agent: AgentRef = Arc::new(FnAgent::new(format!("a{}", i), move |msg: Comm| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(msg.reply(msg.content.clone(), "a"))
            }
        }));
        flow = flow.step(FlowStep::with_agent(format!("s{}", i), agent));
    }

    flow.process(Comm::new("x", "user")).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_parallel_exact_call_counts_and_merge_entries() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut flow = MultiAgentFlow::new("fanout").with_strategy(FlowStrategy::Parallel);
    for i in 0..5 {
        let calls = Arc::clone(&calls);
        let agent: AgentRef = Arc::new(FnAgent::new(format!("a{}", i), move |msg: Comm| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(msg.reply(format!("r{}", calls.load(Ordering::SeqCst)), "a"))
            }
        }));
        flow = flow.step(FlowStep::with_agent(format!("s{}", i), agent));
    }

    let reply = flow.process(Comm::new("x", "user")).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(
        reply.data["per_agent_results"].as_object().unwrap().len(),
        5
    );
}

#[tokio::test]
async fn test_declarative_flow_definition_end_to_end() {
    let registry = Arc::new(AgentRegistry::new());
    registry.register(analyzer());
    registry.register(processor());

    let definition = FlowDefinition::from_yaml(
        r#"
apiVersion: aor.dev/v1
kind: Flow
metadata:
  name: declared-triage
spec:
  strategy: SEQUENTIAL
  steps:
    - id: analyze
      agent: analyzer
    - id: process
      agent: processor
      when: data.analyzed == "true"
"#,
    )
    .unwrap();

    let flow = definition.build(registry).unwrap();
    let reply = flow.process(Comm::new("Raw", "user")).await.unwrap();
    assert_eq!(reply.content, "Processed: Analysis: Raw");
    assert_eq!(reply.data["completed_steps"], json!(2));
}
