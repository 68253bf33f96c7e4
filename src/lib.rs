//! Cortex: a pluggable filter-weigher scheduling pipeline, scheduling queue,
//! and topology-aware gang scheduler for cloud resources (compute, volumes,
//! shares, bare-metal, pods).

pub mod cache;
pub mod controller;
pub mod decision;
pub mod error;
pub mod explain;
pub mod math;
pub mod models;
pub mod pipeline;
pub mod pod_scheduler;
pub mod queue;
pub mod sinks;
pub mod step;
pub mod topology;
pub mod wrappers;

pub use error::{CortexError, Result, StepError};
pub use models::{
    Decision, DecisionRef, ItemKind, Node, PipelineRequest, PipelineResult, Placement, PodGroup,
    PodGroupSet, Resources, ResourceKind, SchedulingItem, Subject, TopologyNode, TraceContext,
};
pub use pipeline::{Consumer, EventSink, Pipeline, PipelineBuilder};
pub use step::{Step, StepKind, StepRegistry, StepResult};
