//! Decision persistence: the `DecisionStore` seam, an in-memory reference
//! implementation, precedence computation, and a `Consumer` that turns a
//! finished pipeline run into a `Decision`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Condition, Decision, DecisionRef, PipelineRequest, PipelineResult};
use crate::pipeline::Consumer;

/// Persistence boundary for `Decision` records. No concrete database ships
/// with this crate; `InMemoryDecisionStore` below is a reference
/// implementation good enough to run and test the rest of the pipeline.
#[async_trait]
pub trait DecisionStore: Send + Sync {
    async fn save(&self, decision: Decision) -> anyhow::Result<()>;
    async fn get(&self, namespace: &str, name: &str) -> anyhow::Result<Option<Decision>>;
    /// All prior decisions for `resource_id`, in creation-time order,
    /// oldest first.
    async fn history_for_resource(&self, resource_id: &str) -> anyhow::Result<Vec<Decision>>;
}

/// A prior Decision's precedence is the count of Decisions for the same
/// resource created at or before it.
pub fn compute_precedence(history: &[Decision], resource_id: &str, creation_time: DateTime<Utc>) -> u64 {
    history
        .iter()
        .filter(|d| d.resource_id == resource_id && d.creation_time <= creation_time)
        .count() as u64
}

pub struct InMemoryDecisionStore {
    decisions: tokio::sync::RwLock<Vec<Decision>>,
}

impl Default for InMemoryDecisionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDecisionStore {
    pub fn new() -> Self {
        Self {
            decisions: tokio::sync::RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DecisionStore for InMemoryDecisionStore {
    async fn save(&self, decision: Decision) -> anyhow::Result<()> {
        self.decisions.write().await.push(decision);
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> anyhow::Result<Option<Decision>> {
        Ok(self
            .decisions
            .read()
            .await
            .iter()
            .find(|d| d.namespace == namespace && d.name == name)
            .cloned())
    }

    async fn history_for_resource(&self, resource_id: &str) -> anyhow::Result<Vec<Decision>> {
        let mut matches: Vec<Decision> = self
            .decisions
            .read()
            .await
            .iter()
            .filter(|d| d.resource_id == resource_id)
            .cloned()
            .collect();
        matches.sort_by_key(|d| d.creation_time);
        Ok(matches)
    }
}

/// Reads a well-known `resource_id` field out of a request's opaque domain
/// payload, falling back to the trace's request id so every request still
/// produces a decision even when the caller didn't set one.
fn resource_id_for(request: &PipelineRequest) -> String {
    request
        .domain
        .get("resource_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| request.trace.request_id.to_string())
}

/// Reference `Consumer`: persists a `Decision` built from the finished run,
/// with precedence and history refs resolved from the store.
pub struct DecisionConsumer {
    store: Arc<dyn DecisionStore>,
}

impl DecisionConsumer {
    pub fn new(store: Arc<dyn DecisionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Consumer for DecisionConsumer {
    async fn consume(&self, request: &PipelineRequest, result: &PipelineResult) -> anyhow::Result<()> {
        let resource_id = resource_id_for(request);
        let namespace = request
            .trace
            .project_id
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let creation_time = Utc::now();

        let history = self.store.history_for_resource(&resource_id).await?;
        let precedence = compute_precedence(&history, &resource_id, creation_time);
        let history_refs: Vec<DecisionRef> = history
            .iter()
            .map(|d| DecisionRef {
                name: d.name.clone(),
                uid: d.uid,
                namespace: d.namespace.clone(),
            })
            .collect();

        let mut conditions = Vec::new();
        if result.target_host.is_none() {
            conditions.push(Condition {
                kind: "Unschedulable".to_string(),
                message: format!("{} host(s) evaluated, none selected", result.ordered_hosts.len()),
            });
        }

        let decision = Decision {
            uid: Uuid::new_v4(),
            name: request.trace.request_id.to_string(),
            namespace,
            resource_id,
            scheduling_domain: request.pipeline_name.clone(),
            resource_kind: request.resource_kind,
            pipeline_ref: request.pipeline_name.clone(),
            pod_ref: None,
            creation_time,
            result: result.clone(),
            conditions,
            precedence,
            history: history_refs,
            explanation: None,
        };

        self.store.save(decision).await
    }
}
