//! Validation wrapper: after `run`, verify that a filter's output subjects
//! are a subset of its input and a weigher's output subjects equal its
//! input, unless `SameSubjectNumberInOut` is explicitly disabled for this
//! step.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::StepError;
use crate::models::{PipelineRequest, Subject, TraceContext};
use crate::step::{Step, StepKind, StepResult, Storage};

/// Marker error so the engine can recognize a subject-count violation (and
/// log it as a safety incident) without string-matching the message.
#[derive(Debug)]
pub struct ValidationViolation {
    pub step: String,
}

impl fmt::Display for ValidationViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "safety: number of (deduplicated) subjects changed during step execution ({})",
            self.step
        )
    }
}

impl std::error::Error for ValidationViolation {}

pub struct ValidationWrapper {
    inner: Box<dyn Step>,
    same_subject_number_check_enabled: bool,
}

impl ValidationWrapper {
    pub fn new(inner: Box<dyn Step>, same_subject_number_check_enabled: bool) -> Self {
        Self {
            inner,
            same_subject_number_check_enabled,
        }
    }
}

impl Step for ValidationWrapper {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn alias(&self) -> Option<&str> {
        self.inner.alias()
    }

    fn kind(&self) -> StepKind {
        self.inner.kind()
    }

    fn init(
        &mut self,
        alias: Option<String>,
        storage: Arc<dyn Storage>,
        opts: Value,
    ) -> anyhow::Result<()> {
        self.inner.init(alias, storage, opts)
    }

    fn run(
        &self,
        trace: &TraceContext,
        request: &PipelineRequest,
        input: &HashMap<Subject, f64>,
    ) -> Result<StepResult, StepError> {
        let result = self.inner.run(trace, request, input)?;

        if self.same_subject_number_check_enabled {
            let in_bounds = result.activations.keys().all(|k| input.contains_key(k));
            let ok = match self.kind() {
                StepKind::Filter => in_bounds,
                StepKind::Weigher => in_bounds && result.activations.len() == input.len(),
            };
            if !ok {
                return Err(StepError::Failed(
                    ValidationViolation {
                        step: self.key(),
                    }
                    .into(),
                ));
            }
        }

        Ok(result)
    }

    fn required_knowledges(&self) -> Vec<String> {
        self.inner.required_knowledges()
    }

    fn validate_options(&self, opts: &Value) -> Result<(), String> {
        self.inner.validate_options(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceKind;

    struct AddsGhostSubject;
    impl Step for AddsGhostSubject {
        fn name(&self) -> &str {
            "Ghost"
        }
        fn kind(&self) -> StepKind {
            StepKind::Weigher
        }
        fn init(&mut self, _: Option<String>, _: Arc<dyn Storage>, _: Value) -> anyhow::Result<()> {
            Ok(())
        }
        fn run(
            &self,
            _: &TraceContext,
            _: &PipelineRequest,
            input: &HashMap<Subject, f64>,
        ) -> Result<StepResult, StepError> {
            let mut out: HashMap<Subject, f64> = input.keys().map(|k| (k.clone(), 0.0)).collect();
            out.insert("ghost".to_string(), 1.0);
            Ok(StepResult::new(out))
        }
    }

    fn request() -> PipelineRequest {
        PipelineRequest::new("p", ResourceKind::Compute, vec!["a".into()])
    }

    #[test]
    fn violation_is_rejected_when_enabled() {
        let wrapper = ValidationWrapper::new(Box::new(AddsGhostSubject), true);
        let input = HashMap::from([("a".to_string(), 0.0)]);
        let err = wrapper.run(&TraceContext::default(), &request(), &input).unwrap_err();
        match err {
            StepError::Failed(e) => assert!(e.downcast_ref::<ValidationViolation>().is_some()),
            StepError::Skipped => panic!("expected failure"),
        }
    }

    #[test]
    fn violation_is_ignored_when_disabled() {
        let wrapper = ValidationWrapper::new(Box::new(AddsGhostSubject), false);
        let input = HashMap::from([("a".to_string(), 0.0)]);
        let result = wrapper.run(&TraceContext::default(), &request(), &input).unwrap();
        assert!(result.activations.contains_key("ghost"));
    }
}
