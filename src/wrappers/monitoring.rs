//! Monitoring wrapper: times the step, emits duration and
//! output-size-reduction metrics, and counts skipped runs.
//!
//! The concrete metrics backend (Prometheus, a KPI exporter, ...) lives
//! outside this crate; `MetricsSink` is the seam, with a `log`-backed
//! reference implementation so the crate is runnable without one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::StepError;
use crate::models::{PipelineRequest, Subject, TraceContext};
use crate::step::{Step, StepKind, StepResult, Storage};

pub trait MetricsSink: Send + Sync {
    fn record_duration(&self, step_key: &str, elapsed: Duration);
    fn record_output_reduction(&self, step_key: &str, before: usize, after: usize);
    fn record_skip(&self, step_key: &str);
}

pub struct LogMetricsSink;

impl MetricsSink for LogMetricsSink {
    fn record_duration(&self, step_key: &str, elapsed: Duration) {
        log::trace!("step {step_key} took {elapsed:?}");
    }

    fn record_output_reduction(&self, step_key: &str, before: usize, after: usize) {
        if after < before {
            log::debug!("step {step_key} reduced subjects {before} -> {after}");
        }
    }

    fn record_skip(&self, step_key: &str) {
        log::trace!("step {step_key} skipped");
    }
}

pub struct MonitoringWrapper {
    inner: Box<dyn Step>,
    metrics: Arc<dyn MetricsSink>,
}

impl MonitoringWrapper {
    pub fn new(inner: Box<dyn Step>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { inner, metrics }
    }
}

impl Step for MonitoringWrapper {
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
        let before = input.len();
        let start = Instant::now();
        let result = self.inner.run(trace, request, input);
        self.metrics.record_duration(&self.key(), start.elapsed());
        match &result {
            Ok(r) => self
                .metrics
                .record_output_reduction(&self.key(), before, r.activations.len()),
            Err(StepError::Skipped) => self.metrics.record_skip(&self.key()),
            Err(StepError::Failed(_)) => {}
        }
        result
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
    use std::sync::Mutex;

    struct Echo;
    impl Step for Echo {
        fn name(&self) -> &str {
            "Echo"
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
            Ok(StepResult::new(input.clone()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        skips: Mutex<u32>,
    }

    impl MetricsSink for RecordingSink {
        fn record_duration(&self, _: &str, _: Duration) {}
        fn record_output_reduction(&self, _: &str, _: usize, _: usize) {}
        fn record_skip(&self, _: &str) {
            *self.skips.lock().unwrap() += 1;
        }
    }

    #[test]
    fn records_skip_count() {
        struct AlwaysSkip;
        impl Step for AlwaysSkip {
            fn name(&self) -> &str {
                "AlwaysSkip"
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
                _: &HashMap<Subject, f64>,
            ) -> Result<StepResult, StepError> {
                Err(StepError::Skipped)
            }
        }

        let sink = Arc::new(RecordingSink::default());
        let wrapper = MonitoringWrapper::new(Box::new(AlwaysSkip), sink.clone());
        let request = PipelineRequest::new("p", ResourceKind::Compute, vec!["a".into()]);
        let input = HashMap::from([("a".to_string(), 0.0)]);
        let err = wrapper.run(&TraceContext::default(), &request, &input).unwrap_err();
        assert!(err.is_skipped());
        assert_eq!(*sink.skips.lock().unwrap(), 1);
    }
}
