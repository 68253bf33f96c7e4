//! The data model: subjects, requests/results, decisions, queue items,
//! observer-cache nodes, topology nodes, and gang workloads.
//!
//! A `Subject` is a candidate placement target (host, machine pool, storage
//! pool) — represented as a plain `String` key.

use std::collections::HashMap;
use std::ops::{Add, Sub};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Subject = String;

/// The resource kind a pipeline schedules for. The engine is generic over the
/// request payload but the registry, wrappers, and `Decision` key on this —
/// a tagged variant at the controller boundary rather than a type parameter
/// threaded through every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Compute,
    Volume,
    Share,
    BareMetal,
    Pod,
}

/// A quantity vector over named resources (cpu, memory, iops, ...), so the
/// same topology/cache machinery serves compute, storage and bare-metal
/// resource kinds without hardcoding a cpu/memory pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources(pub HashMap<String, f64>);

impl Resources {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn get(&self, name: &str) -> f64 {
        self.0.get(name).copied().unwrap_or(0.0)
    }

    /// `true` if every resource this requests fits within `other`.
    pub fn fits_within(&self, other: &Resources) -> bool {
        self.0.iter().all(|(k, v)| other.get(k) >= *v)
    }
}

impl Add for &Resources {
    type Output = Resources;
    fn add(self, rhs: Self) -> Resources {
        let mut out = self.0.clone();
        for (k, v) in &rhs.0 {
            *out.entry(k.clone()).or_insert(0.0) += v;
        }
        Resources(out)
    }
}

impl Sub for &Resources {
    type Output = Resources;
    fn sub(self, rhs: Self) -> Resources {
        let mut out = self.0.clone();
        for (k, v) in &rhs.0 {
            *out.entry(k.clone()).or_insert(0.0) -= v;
        }
        Resources(out)
    }
}

/// Observer-cache image of a compute host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub taints: Vec<String>,
    pub capacity: Resources,
    pub allocatable: Resources,
    /// Names of pods currently bound to this node.
    pub bound_pods: Vec<String>,
}

/// A topology-aggregate bucket at a named level; leaves are physical nodes.
#[derive(Debug, Clone, Default)]
pub struct TopologyNode {
    pub level: String,
    pub name: String,
    pub capacity: Resources,
    pub allocatable: Resources,
    /// Names one level down the chain (rack names under a zone, node names
    /// under the finest configured level).
    pub children: Vec<String>,
    /// Every physical node this aggregate ultimately contains, regardless of
    /// how many levels separate them.
    pub leaf_nodes: Vec<String>,
}

/// One pod template replicated `replicas` times within a `PodGroupSet`.
#[derive(Debug, Clone)]
pub struct PodGroup {
    pub name: String,
    pub replicas: u32,
    pub resources: Resources,
}

/// An atomic gang workload: every replica of every group places, or none do.
#[derive(Debug, Clone)]
pub struct PodGroupSet {
    pub namespace: String,
    pub name: String,
    pub groups: Vec<PodGroup>,
}

impl PodGroupSet {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn total_replicas(&self) -> u32 {
        self.groups.iter().map(|g| g.replicas).sum()
    }
}

/// The kind of workload a `SchedulingItem` wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Pod,
    PodGroupSet,
}

/// A queue entry wrapping a workload.
#[derive(Debug, Clone)]
pub struct SchedulingItem {
    pub namespace: String,
    pub name: String,
    pub kind: ItemKind,
    pub priority: i64,
    pub enqueue_time: DateTime<Utc>,
    pub attempts: u32,
}

impl SchedulingItem {
    pub fn new(namespace: &str, name: &str, kind: ItemKind, priority: i64) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind,
            priority,
            enqueue_time: Utc::now(),
            attempts: 0,
        }
    }

    /// Dedup key: a second enqueue of the same namespace/name replaces the
    /// pending item rather than creating a duplicate.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Trace context carried through a `PipelineRequest`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceContext {
    pub request_id: Uuid,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
}

/// The work item handed to `Pipeline::run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub pipeline_name: String,
    pub resource_kind: ResourceKind,
    pub subjects: Vec<Subject>,
    pub weights: HashMap<Subject, f64>,
    /// Opaque domain payload, passed untouched through the engine.
    pub domain: serde_json::Value,
    pub trace: TraceContext,
}

impl PipelineRequest {
    pub fn new(pipeline_name: &str, resource_kind: ResourceKind, subjects: Vec<Subject>) -> Self {
        let weights = subjects.iter().map(|s| (s.clone(), 0.0)).collect();
        Self {
            pipeline_name: pipeline_name.to_string(),
            resource_kind,
            subjects,
            weights,
            domain: serde_json::Value::Null,
            trace: TraceContext::default(),
        }
    }
}

/// One step's contribution, keyed by step name (or "name/alias" when an
/// alias is configured).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_key: String,
    pub activations: HashMap<Subject, f64>,
    pub stats: HashMap<String, HashMap<Subject, f64>>,
    pub skipped: bool,
}

/// Full run trace, emitted once and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub raw_in_weights: HashMap<Subject, f64>,
    pub normalized_in_weights: HashMap<Subject, f64>,
    pub aggregated_out_weights: HashMap<Subject, f64>,
    pub ordered_hosts: Vec<Subject>,
    pub target_host: Option<Subject>,
    pub step_results: Vec<StepOutcome>,
    pub application_order: Vec<String>,
}

/// A reference to a prior `Decision`, resolved on demand rather than stored
/// as a pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRef {
    pub name: String,
    pub uid: Uuid,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub kind: String,
    pub message: String,
}

/// The persisted, explainable record of one pipeline execution for one
/// resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub uid: Uuid,
    pub name: String,
    pub namespace: String,
    pub resource_id: String,
    pub scheduling_domain: String,
    pub resource_kind: ResourceKind,
    pub pipeline_ref: String,
    pub pod_ref: Option<String>,
    pub creation_time: DateTime<Utc>,
    pub result: PipelineResult,
    pub conditions: Vec<Condition>,
    pub precedence: u64,
    pub history: Vec<DecisionRef>,
    pub explanation: Option<String>,
}

/// A gang or single-pod placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub pod_name: String,
    pub node_name: String,
}
