//! Scope wrapper: only run the inner step against subjects (and requests)
//! that match its declared scope; everything else passes through untouched.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::StepError;
use crate::models::{PipelineRequest, Subject, TraceContext};
use crate::step::{Step, StepKind, StepResult, Storage};

/// Set operation applied between the scope matcher and the step's input
/// subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeOp {
    /// Keep only matching subjects in the inner step's view.
    Intersection,
    /// Remove matching subjects from the inner step's view (inner sees the
    /// rest).
    Difference,
}

/// Whether a request as a whole is in scope for this step at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestScopeAction {
    Apply,
    Skip,
}

/// Domain traits of hosts, request tags, etc. — the predicate a `Scope`
/// wrapper consults.
pub trait ScopeMatcher: Send + Sync {
    fn matches_subject(&self, subject: &Subject, request: &PipelineRequest) -> bool;

    fn request_action(&self, _request: &PipelineRequest) -> RequestScopeAction {
        RequestScopeAction::Apply
    }
}

pub struct ScopeWrapper {
    inner: Box<dyn Step>,
    matcher: Box<dyn ScopeMatcher>,
    op: ScopeOp,
}

impl ScopeWrapper {
    pub fn new(inner: Box<dyn Step>, matcher: Box<dyn ScopeMatcher>, op: ScopeOp) -> Self {
        Self { inner, matcher, op }
    }
}

impl Step for ScopeWrapper {
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
        if self.matcher.request_action(request) == RequestScopeAction::Skip {
            return Err(StepError::Skipped);
        }

        let mut scoped = HashMap::new();
        let mut unscoped = HashMap::new();
        for (subject, weight) in input {
            let matches = self.matcher.matches_subject(subject, request);
            let in_scope = match self.op {
                ScopeOp::Intersection => matches,
                ScopeOp::Difference => !matches,
            };
            if in_scope {
                scoped.insert(subject.clone(), *weight);
            } else {
                unscoped.insert(subject.clone(), *weight);
            }
        }

        if scoped.is_empty() {
            // Nothing in scope: a passthrough result for the whole input.
            return Ok(StepResult::new(input.clone()));
        }

        let mut result = self.inner.run(trace, request, &scoped)?;
        for (subject, _) in unscoped {
            result.activations.insert(subject, 0.0);
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
