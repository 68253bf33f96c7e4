//! Pipeline engine: an ordered list of wrapped steps plus a `Consumer` that
//! persists the resulting `Decision`.

pub mod engine;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CortexError;
use crate::models::{PipelineRequest, PipelineResult, ResourceKind};
use crate::step::Step;

/// Fire-and-forget publisher for a finished pipeline run.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, topic: &str, envelope: serde_json::Value);
}

/// Persists a `Decision` from a finished run. Consumer errors never fail the
/// run itself; they are logged and surfaced only to whoever inspects the
/// consumer directly.
#[async_trait]
pub trait Consumer: Send + Sync {
    async fn consume(
        &self,
        request: &PipelineRequest,
        result: &PipelineResult,
    ) -> anyhow::Result<()>;
}

/// A no-op consumer, useful for pipelines under test that don't care about
/// Decision persistence.
pub struct NullConsumer;

#[async_trait]
impl Consumer for NullConsumer {
    async fn consume(&self, _: &PipelineRequest, _: &PipelineResult) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A no-op event sink.
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn publish(&self, _topic: &str, _envelope: serde_json::Value) {}
}

/// Ordered list of wrapped steps plus config.
pub struct Pipeline {
    pub name: String,
    pub resource_kind: ResourceKind,
    pub scheduling_domain: String,
    pub preselect_all_hosts: bool,
    pub(crate) steps: Vec<Box<dyn Step>>,
    pub(crate) event_sink: Arc<dyn EventSink>,
    pub(crate) consumer: Arc<dyn Consumer>,
}

impl Pipeline {
    pub fn builder(name: &str, resource_kind: ResourceKind, scheduling_domain: &str) -> PipelineBuilder {
        PipelineBuilder {
            name: name.to_string(),
            resource_kind,
            scheduling_domain: scheduling_domain.to_string(),
            preselect_all_hosts: false,
            steps: Vec::new(),
            event_sink: Arc::new(NullEventSink),
            consumer: Arc::new(NullConsumer),
        }
    }

    pub async fn run(&self, request: PipelineRequest) -> Result<PipelineResult, CortexError> {
        engine::run(self, request).await
    }
}

pub struct PipelineBuilder {
    name: String,
    resource_kind: ResourceKind,
    scheduling_domain: String,
    preselect_all_hosts: bool,
    steps: Vec<Box<dyn Step>>,
    event_sink: Arc<dyn EventSink>,
    consumer: Arc<dyn Consumer>,
}

impl PipelineBuilder {
    pub fn preselect_all_hosts(mut self, v: bool) -> Self {
        self.preselect_all_hosts = v;
        self
    }

    pub fn step(mut self, step: Box<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn consumer(mut self, consumer: Arc<dyn Consumer>) -> Self {
        self.consumer = consumer;
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            name: self.name,
            resource_kind: self.resource_kind,
            scheduling_domain: self.scheduling_domain,
            preselect_all_hosts: self.preselect_all_hosts,
            steps: self.steps,
            event_sink: self.event_sink,
            consumer: self.consumer,
        }
    }
}
