//! Pipeline controller: reconciles declarative `PipelineConfig` objects,
//! (re)constructs `Pipeline`s by name through a per-kind `StepRegistry`, and
//! exposes an admission-style `validate`.
//!
//! Reconcile owns the object wholesale: on success the new pipeline replaces
//! the old one outright; on failure the previous version is retained
//! untouched. No controller-runtime bootstrap or leader election lives
//! here — callers own scheduling when and how often to reconcile.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::models::ResourceKind;
use crate::pipeline::{Consumer, EventSink, Pipeline, PipelineBuilder};
use crate::step::{Storage, StepRegistry};
use crate::wrappers::{compose, MetricsSink, ScopeMatcher, ScopeOp, WrapConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PipelineType {
    FilterWeigher,
}

/// One configured step within a `PipelineConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    pub alias: Option<String>,
    #[serde(default)]
    pub options: serde_json::Value,
    /// Validation names disabled for this step, e.g. "SameSubjectNumberInOut".
    #[serde(default)]
    pub disabled_validations: Vec<String>,
}

/// Declarative Pipeline config object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub resource_kind: ResourceKind,
    pub scheduling_domain: String,
    pub pipeline_type: PipelineType,
    #[serde(default)]
    pub preselect_all_hosts: bool,
    #[serde(default)]
    pub filters: Vec<StepConfig>,
    #[serde(default)]
    pub weighers: Vec<StepConfig>,
}

/// Outcome of one `reconcile` call: filter and weigher construction errors
/// are collected separately, and a pipeline only commits when
/// `filter_errors` is empty.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub filter_errors: Vec<String>,
    pub weigher_errors: Vec<String>,
    pub committed: bool,
}

impl ReconcileOutcome {
    pub fn is_ok(&self) -> bool {
        self.filter_errors.is_empty()
    }
}

pub struct PipelineController {
    registries: HashMap<ResourceKind, StepRegistry>,
    pipelines: RwLock<HashMap<String, Arc<Pipeline>>>,
    storage: Arc<dyn Storage>,
    metrics: Arc<dyn MetricsSink>,
}

impl PipelineController {
    pub fn new(storage: Arc<dyn Storage>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            registries: HashMap::new(),
            pipelines: RwLock::new(HashMap::new()),
            storage,
            metrics,
        }
    }

    pub fn register_kind(&mut self, kind: ResourceKind, registry: StepRegistry) {
        self.registries.insert(kind, registry);
    }

    /// Read-locked lookup used by the pod scheduler / external-request
    /// handlers at `Run` time.
    pub fn get(&self, name: &str) -> Option<Arc<Pipeline>> {
        self.pipelines.read().expect("pipelines lock poisoned").get(name).cloned()
    }

    pub fn delete(&self, name: &str) {
        self.pipelines.write().expect("pipelines lock poisoned").remove(name);
    }

    /// Admission-style check: every step the config names must be known in
    /// its resource kind's registry, and its options must pass that step's
    /// own `validate_options`.
    pub fn validate(&self, config: &PipelineConfig) -> Vec<String> {
        let mut errors = Vec::new();
        let Some(registry) = self.registries.get(&config.resource_kind) else {
            errors.push(format!(
                "no step registry configured for resource kind {:?}",
                config.resource_kind
            ));
            return errors;
        };
        for step_cfg in config.filters.iter().chain(config.weighers.iter()) {
            match registry.construct(&step_cfg.name) {
                None => errors.push(format!("unknown step name {}", step_cfg.name)),
                Some(step) => {
                    if let Err(e) = step.validate_options(&step_cfg.options) {
                        errors.push(format!("{}: {e}", step_cfg.name));
                    }
                }
            }
        }
        errors
    }

    fn build_steps(
        &self,
        registry: &StepRegistry,
        configs: &[StepConfig],
        metrics: &Arc<dyn MetricsSink>,
    ) -> (Vec<Box<dyn crate::step::Step>>, Vec<String>) {
        let mut steps = Vec::new();
        let mut errors = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for step_cfg in configs {
            let dedup_key = (step_cfg.name.clone(), step_cfg.alias.clone());
            if !seen.insert(dedup_key) {
                errors.push(format!(
                    "duplicate step (name, alias) pair: ({}, {:?})",
                    step_cfg.name, step_cfg.alias
                ));
                continue;
            }
            let Some(mut step) = registry.construct(&step_cfg.name) else {
                errors.push(format!("unknown step name {}", step_cfg.name));
                continue;
            };
            if let Err(e) = step.init(
                step_cfg.alias.clone(),
                self.storage.clone(),
                step_cfg.options.clone(),
            ) {
                errors.push(format!("{} init failed: {e:#}", step_cfg.name));
                continue;
            }
            let wrap_cfg = WrapConfig {
                scope: None::<(Box<dyn ScopeMatcher>, ScopeOp)>,
                same_subject_number_check_enabled: !step_cfg
                    .disabled_validations
                    .iter()
                    .any(|v| v == "SameSubjectNumberInOut"),
                metrics: metrics.clone(),
            };
            steps.push(compose(step, wrap_cfg));
        }
        (steps, errors)
    }

    /// On create/update: attempts to construct every step, committing the
    /// new pipeline only if filter construction was entirely clean. The
    /// previous pipeline (if any) is left in place otherwise.
    pub fn reconcile(
        &self,
        config: &PipelineConfig,
        consumer: Arc<dyn Consumer>,
        event_sink: Arc<dyn EventSink>,
    ) -> ReconcileOutcome {
        let Some(registry) = self.registries.get(&config.resource_kind) else {
            return ReconcileOutcome {
                filter_errors: vec![format!(
                    "no step registry configured for resource kind {:?}",
                    config.resource_kind
                )],
                weigher_errors: Vec::new(),
                committed: false,
            };
        };

        let (filter_steps, filter_errors) =
            self.build_steps(registry, &config.filters, &self.metrics);
        let (weigher_steps, weigher_errors) =
            self.build_steps(registry, &config.weighers, &self.metrics);

        if !filter_errors.is_empty() {
            log::warn!(
                "pipeline {} reconcile rejected, retaining previous version: {filter_errors:?}",
                config.name
            );
            return ReconcileOutcome {
                filter_errors,
                weigher_errors,
                committed: false,
            };
        }

        let mut builder: PipelineBuilder =
            Pipeline::builder(&config.name, config.resource_kind, &config.scheduling_domain)
                .preselect_all_hosts(config.preselect_all_hosts)
                .event_sink(event_sink)
                .consumer(consumer);
        for step in filter_steps {
            builder = builder.step(step);
        }
        for step in weigher_steps {
            builder = builder.step(step);
        }
        let pipeline = Arc::new(builder.build());

        self.pipelines
            .write()
            .expect("pipelines lock poisoned")
            .insert(config.name.clone(), pipeline);
        log::debug!("pipeline {} committed", config.name);

        ReconcileOutcome {
            filter_errors: Vec::new(),
            weigher_errors,
            committed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::NullConsumer;
    use crate::step::{Step, StepError, StepKind, StepResult};
    use crate::wrappers::LogMetricsSink;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct AlwaysOk;
    impl Step for AlwaysOk {
        fn name(&self) -> &str {
            "AlwaysOk"
        }
        fn kind(&self) -> StepKind {
            StepKind::Filter
        }
        fn init(
            &mut self,
            _: Option<String>,
            _: Arc<dyn Storage>,
            _: serde_json::Value,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        fn run(
            &self,
            _: &crate::models::TraceContext,
            _: &crate::models::PipelineRequest,
            input: &HashMap<crate::models::Subject, f64>,
        ) -> Result<StepResult, StepError> {
            Ok(StepResult::new(input.clone()))
        }
    }

    struct NullStorage;
    #[async_trait]
    impl Storage for NullStorage {
        async fn select_timed(
            &self,
            _: &str,
            _: &str,
            _: &[serde_json::Value],
        ) -> anyhow::Result<Vec<serde_json::Value>> {
            Ok(Vec::new())
        }
    }

    fn controller() -> PipelineController {
        let mut registry = StepRegistry::new();
        registry.register("AlwaysOk", || Box::new(AlwaysOk));
        let mut ctrl = PipelineController::new(Arc::new(NullStorage), Arc::new(LogMetricsSink));
        ctrl.register_kind(ResourceKind::Compute, registry);
        ctrl
    }

    fn base_config() -> PipelineConfig {
        PipelineConfig {
            name: "p1".to_string(),
            resource_kind: ResourceKind::Compute,
            scheduling_domain: "default".to_string(),
            pipeline_type: PipelineType::FilterWeigher,
            preselect_all_hosts: false,
            filters: vec![StepConfig {
                name: "AlwaysOk".to_string(),
                alias: None,
                options: serde_json::Value::Null,
                disabled_validations: vec![],
            }],
            weighers: vec![],
        }
    }

    #[test]
    fn unknown_step_rejects_and_retains_previous() {
        let ctrl = controller();
        let outcome = ctrl.reconcile(&base_config(), Arc::new(NullConsumer), Arc::new(crate::pipeline::NullEventSink));
        assert!(outcome.committed);
        assert!(ctrl.get("p1").is_some());

        let mut bad = base_config();
        bad.filters[0].name = "Missing".to_string();
        let outcome = ctrl.reconcile(&bad, Arc::new(NullConsumer), Arc::new(crate::pipeline::NullEventSink));
        assert!(!outcome.committed);
        assert!(!outcome.filter_errors.is_empty());
        // previous pipeline is retained
        assert!(ctrl.get("p1").is_some());
    }

    #[test]
    fn duplicate_name_alias_is_a_config_error() {
        let ctrl = controller();
        let mut cfg = base_config();
        cfg.filters.push(cfg.filters[0].clone());
        let outcome = ctrl.reconcile(&cfg, Arc::new(NullConsumer), Arc::new(crate::pipeline::NullEventSink));
        assert!(!outcome.committed);
    }

    #[test]
    fn delete_removes_pipeline() {
        let ctrl = controller();
        ctrl.reconcile(&base_config(), Arc::new(NullConsumer), Arc::new(crate::pipeline::NullEventSink));
        ctrl.delete("p1");
        assert!(ctrl.get("p1").is_none());
    }
}
