use std::collections::HashMap;

use chrono::{Duration, Utc};
use cortex::decision::{DecisionStore, InMemoryDecisionStore};
use cortex::explain::explain;
use cortex::models::{Decision, DecisionRef, PipelineResult, ResourceKind, StepOutcome};
use uuid::Uuid;

fn result(target: &str) -> PipelineResult {
    PipelineResult {
        raw_in_weights: HashMap::from([("h1".to_string(), 0.0), ("h2".to_string(), 0.0)]),
        normalized_in_weights: HashMap::from([("h1".to_string(), 0.0), ("h2".to_string(), 0.0)]),
        aggregated_out_weights: HashMap::from([("h1".to_string(), 1.0), ("h2".to_string(), 1.0)]),
        ordered_hosts: vec!["h1".to_string(), "h2".to_string()],
        target_host: Some(target.to_string()),
        step_results: vec![StepOutcome {
            step_key: "Weigh".to_string(),
            activations: HashMap::from([("h1".to_string(), 1.0), ("h2".to_string(), 1.0)]),
            stats: HashMap::new(),
            skipped: false,
        }],
        application_order: vec!["Weigh".to_string()],
    }
}

fn decision(name: &str, precedence: u64, creation_time: chrono::DateTime<Utc>, target: &str) -> Decision {
    Decision {
        uid: Uuid::new_v4(),
        name: name.to_string(),
        namespace: "default".to_string(),
        resource_id: "pod-chain".to_string(),
        scheduling_domain: "default".to_string(),
        resource_kind: ResourceKind::Pod,
        pipeline_ref: "pods".to_string(),
        pod_ref: None,
        creation_time,
        result: result(target),
        conditions: Vec::new(),
        precedence,
        history: Vec::new(),
        explanation: None,
    }
}

/// Seed scenario: history target hosts [h1, h1, h2], current target h1.
/// Expect the chain to collapse the two leading h1 decisions into one group
/// and flag a loop once h1 reappears after the chain moved to h2.
#[tokio::test]
async fn history_h1_h1_h2_then_h1_again_reports_a_loop() {
    let store = InMemoryDecisionStore::new();
    let t0 = Utc::now() - Duration::hours(3);

    let d0 = decision("d0", 0, t0, "h1");
    store.save(d0.clone()).await.unwrap();
    let d1 = decision("d1", 1, t0 + Duration::hours(1), "h1");
    store.save(d1.clone()).await.unwrap();
    let d2 = decision("d2", 2, t0 + Duration::hours(2), "h2");
    store.save(d2.clone()).await.unwrap();

    let history_refs = vec![&d0, &d1, &d2]
        .into_iter()
        .map(|d| DecisionRef {
            name: d.name.clone(),
            uid: d.uid,
            namespace: d.namespace.clone(),
        })
        .collect();

    let mut current = decision("d3", 3, t0 + Duration::hours(3), "h1");
    current.history = history_refs;

    let text = explain(&current, &store).await;
    let chain_line = text.lines().last().unwrap();
    assert!(chain_line.starts_with("Chain (loop detected): "), "got: {chain_line}");
    assert!(chain_line.contains("2 decisions"));
    assert!(chain_line.contains("h1"));
    assert!(chain_line.contains("h2"));
}

/// A chain that never revisits a host it already left reports no loop.
#[tokio::test]
async fn monotonic_chain_reports_no_loop() {
    let store = InMemoryDecisionStore::new();
    let t0 = Utc::now() - Duration::hours(2);

    let d0 = decision("d0", 0, t0, "h1");
    store.save(d0.clone()).await.unwrap();
    let d1 = decision("d1", 1, t0 + Duration::hours(1), "h2");
    store.save(d1.clone()).await.unwrap();

    let history_refs = vec![&d0, &d1]
        .into_iter()
        .map(|d| DecisionRef {
            name: d.name.clone(),
            uid: d.uid,
            namespace: d.namespace.clone(),
        })
        .collect();

    let mut current = decision("d2", 2, t0 + Duration::hours(2), "h2");
    current.history = history_refs;

    let text = explain(&current, &store).await;
    let chain_line = text.lines().last().unwrap();
    assert!(chain_line.starts_with("Chain: "), "got: {chain_line}");
}
