//! `Pipeline::run`: normalize inputs, fold step activations, order and
//! select a target, publish a trace, hand off to the consumer.

use std::collections::HashMap;

use crate::error::{CortexError, StepError};
use crate::math::min_max_scale;
use crate::models::{PipelineRequest, PipelineResult, StepOutcome, Subject};
use crate::pipeline::Pipeline;
use crate::wrappers::validation::ValidationViolation;

pub(super) async fn run(
    pipeline: &Pipeline,
    request: PipelineRequest,
) -> Result<PipelineResult, CortexError> {
    if pipeline.preselect_all_hosts && request.subjects.is_empty() {
        return Err(CortexError::Config(format!(
            "pipeline {} requires preselected hosts but the inventory is empty",
            pipeline.name
        )));
    }

    let raw_in_weights = request.weights.clone();
    let normalized_in_weights = min_max_scale(&raw_in_weights);
    let mut aggregated: HashMap<Subject, f64> = normalized_in_weights.clone();

    let mut step_results = Vec::with_capacity(pipeline.steps.len());
    let mut application_order = Vec::with_capacity(pipeline.steps.len());

    for step in &pipeline.steps {
        let step_key = step.key();
        application_order.push(step_key.clone());

        match step.run(&request.trace, &request, &aggregated) {
            Ok(outcome) => {
                log::trace!(
                    "step {step_key} produced {} activation(s) for request {}",
                    outcome.activations.len(),
                    request.trace.request_id
                );
                let mut next = HashMap::with_capacity(aggregated.len());
                for (subject, weight) in &aggregated {
                    if let Some(delta) = outcome.activations.get(subject) {
                        next.insert(subject.clone(), weight + delta);
                    }
                }
                aggregated = next;
                step_results.push(StepOutcome {
                    step_key,
                    activations: outcome.activations,
                    stats: outcome.stats,
                    skipped: false,
                });
            }
            Err(StepError::Skipped) => {
                log::trace!("step {step_key} skipped for request {}", request.trace.request_id);
                step_results.push(StepOutcome {
                    step_key,
                    activations: HashMap::new(),
                    stats: HashMap::new(),
                    skipped: true,
                });
            }
            Err(StepError::Failed(source)) => {
                if let Some(violation) = source.downcast_ref::<ValidationViolation>() {
                    log::warn!("safety incident: {violation}");
                    return Err(CortexError::ValidationFailure {
                        step: violation.step.clone(),
                    });
                }
                log::warn!("step {step_key} failed: {source:#}");
                return Err(CortexError::StepFailure {
                    step: step_key,
                    source,
                });
            }
        }
    }

    let mut ordered_hosts: Vec<Subject> = aggregated.keys().cloned().collect();
    ordered_hosts.sort_by(|a, b| {
        let wa = aggregated[a];
        let wb = aggregated[b];
        wb.partial_cmp(&wa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(b))
    });
    let target_host = ordered_hosts.first().cloned();

    let result = PipelineResult {
        raw_in_weights,
        normalized_in_weights,
        aggregated_out_weights: aggregated,
        ordered_hosts,
        target_host,
        step_results,
        application_order,
    };

    let topic = format!(
        "cortex/scheduler/{:?}/pipeline/finished",
        pipeline.resource_kind
    )
    .to_lowercase();
    let envelope = serde_json::json!({
        "request_id": request.trace.request_id,
        "pipeline": pipeline.name,
        "result": &result,
    });
    pipeline.event_sink.publish(&topic, envelope).await;

    if let Err(e) = pipeline.consumer.consume(&request, &result).await {
        log::warn!("decision consumer failed for request {}: {e:#}", request.trace.request_id);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceKind;
    use crate::pipeline::Pipeline;
    use crate::step::{Step, StepKind, StepResult, Storage};
    use std::collections::HashMap as Map;
    use std::sync::Arc;

    struct Filter(Vec<&'static str>);
    impl Step for Filter {
        fn name(&self) -> &str {
            "Filter"
        }
        fn kind(&self) -> StepKind {
            StepKind::Filter
        }
        fn init(&mut self, _: Option<String>, _: Arc<dyn Storage>, _: serde_json::Value) -> anyhow::Result<()> {
            Ok(())
        }
        fn run(
            &self,
            _: &crate::models::TraceContext,
            _: &PipelineRequest,
            input: &Map<Subject, f64>,
        ) -> Result<StepResult, StepError> {
            let keep: Map<Subject, f64> = input
                .iter()
                .filter(|(k, _)| self.0.contains(&k.as_str()))
                .map(|(k, _)| (k.clone(), 0.0))
                .collect();
            Ok(StepResult::new(keep))
        }
    }

    struct Weigh(Map<&'static str, f64>);
    impl Step for Weigh {
        fn name(&self) -> &str {
            "Weigh"
        }
        fn kind(&self) -> StepKind {
            StepKind::Weigher
        }
        fn init(&mut self, _: Option<String>, _: Arc<dyn Storage>, _: serde_json::Value) -> anyhow::Result<()> {
            Ok(())
        }
        fn run(
            &self,
            _: &crate::models::TraceContext,
            _: &PipelineRequest,
            input: &Map<Subject, f64>,
        ) -> Result<StepResult, StepError> {
            let out = input
                .keys()
                .map(|k| (k.clone(), *self.0.get(k.as_str()).unwrap_or(&0.0)))
                .collect();
            Ok(StepResult::new(out))
        }
    }

    #[tokio::test]
    async fn three_hosts_one_filter_one_weigher() {
        let pipeline = Pipeline::builder("p", ResourceKind::Compute, "default")
            .step(Box::new(Filter(vec!["a", "b"])))
            .step(Box::new(Weigh(Map::from([("a", 1.0), ("b", 2.0)]))))
            .build();
        let request = PipelineRequest::new(
            "p",
            ResourceKind::Compute,
            vec!["a".into(), "b".into(), "c".into()],
        );
        let result = pipeline.run(request).await.unwrap();
        assert_eq!(result.ordered_hosts, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(result.target_host, Some("b".to_string()));
    }

    #[tokio::test]
    async fn all_hosts_filtered_yields_no_target() {
        let pipeline = Pipeline::builder("p", ResourceKind::Compute, "default")
            .step(Box::new(Filter(vec![])))
            .build();
        let request = PipelineRequest::new("p", ResourceKind::Compute, vec!["a".into()]);
        let result = pipeline.run(request).await.unwrap();
        assert!(result.target_host.is_none());
        assert!(result.ordered_hosts.is_empty());
    }

    #[tokio::test]
    async fn preselect_all_with_empty_inventory_errors() {
        let pipeline = Pipeline::builder("p", ResourceKind::Compute, "default")
            .preselect_all_hosts(true)
            .build();
        let request = PipelineRequest::new("p", ResourceKind::Compute, vec![]);
        let err = pipeline.run(request).await.unwrap_err();
        assert!(matches!(err, CortexError::Config(_)));
    }

    #[tokio::test]
    async fn validation_violation_aborts_run_when_enabled() {
        use crate::wrappers::{compose, WrapConfig};

        struct Ghost;
        impl Step for Ghost {
            fn name(&self) -> &str {
                "Ghost"
            }
            fn kind(&self) -> StepKind {
                StepKind::Weigher
            }
            fn init(&mut self, _: Option<String>, _: Arc<dyn Storage>, _: serde_json::Value) -> anyhow::Result<()> {
                Ok(())
            }
            fn run(
                &self,
                _: &crate::models::TraceContext,
                _: &PipelineRequest,
                input: &Map<Subject, f64>,
            ) -> Result<StepResult, StepError> {
                let mut out: Map<Subject, f64> = input.keys().map(|k| (k.clone(), 0.0)).collect();
                out.insert("ghost".to_string(), 1.0);
                Ok(StepResult::new(out))
            }
        }

        let wrapped = compose(Box::new(Ghost), WrapConfig::default());
        let pipeline = Pipeline::builder("p", ResourceKind::Compute, "default")
            .step(wrapped)
            .build();
        let request = PipelineRequest::new("p", ResourceKind::Compute, vec!["a".into()]);
        let err = pipeline.run(request).await.unwrap_err();
        assert!(matches!(err, CortexError::ValidationFailure { .. }));
    }
}
