//! Step contract and per-resource-kind registry.
//!
//! One trait covers both scheduling roles: a step declares whether it is a
//! `Filter` (output subject set may shrink) or a `Weigher` (output subject
//! set must equal input) and contributes per-subject activation deltas
//! either way.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StepError;
use crate::models::{PipelineRequest, Subject, TraceContext};

/// Whether a step may remove subjects (`Filter`) or only adjust scores
/// (`Weigher`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Filter,
    Weigher,
}

/// One step's contribution for a single `Pipeline::run`. Subjects absent
/// from `activations` are filtered out by the engine; `stats` are optional
/// named per-subject values kept only for debuggability (surfaced through
/// the explainer/decision record).
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    pub activations: HashMap<Subject, f64>,
    pub stats: HashMap<String, HashMap<Subject, f64>>,
}

impl StepResult {
    pub fn new(activations: HashMap<Subject, f64>) -> Self {
        Self {
            activations,
            stats: HashMap::new(),
        }
    }
}

/// Narrow storage interface the engine assumes for `required_knowledges`
/// lookups. No concrete backend ships — steps that declare required
/// knowledges silently fail their select if the table is absent; the engine
/// does not enforce any particular lifecycle here.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn select_timed(
        &self,
        group: &str,
        sql_like: &str,
        params: &[Value],
    ) -> anyhow::Result<Vec<Value>>;
}

/// A named, typed placement rule with options.
pub trait Step: Send + Sync {
    fn name(&self) -> &str;
    fn alias(&self) -> Option<&str> {
        None
    }
    fn kind(&self) -> StepKind;

    /// Called once per `Pipeline` at configuration time.
    fn init(
        &mut self,
        alias: Option<String>,
        storage: Arc<dyn Storage>,
        opts: Value,
    ) -> anyhow::Result<()>;

    /// Executes the step. `input` is the set of subjects still alive coming
    /// into this step, with their current aggregated weight (read-only —
    /// steps see aggregate state but only the engine mutates it).
    fn run(
        &self,
        trace: &TraceContext,
        request: &PipelineRequest,
        input: &HashMap<Subject, f64>,
    ) -> Result<StepResult, StepError>;

    /// Advisory list of knowledge tables this step wants populated. Not
    /// enforced by the engine.
    fn required_knowledges(&self) -> Vec<String> {
        Vec::new()
    }

    /// Admission-style check of proposed options, independent of `init`.
    fn validate_options(&self, _opts: &Value) -> Result<(), String> {
        Ok(())
    }

    /// The key `StepOutcome`s and validation errors are reported under:
    /// `name` alone, or `name/alias` when an alias is configured.
    fn key(&self) -> String {
        match self.alias() {
            Some(a) => format!("{}/{a}", self.name()),
            None => self.name().to_string(),
        }
    }
}

/// Zero-argument constructor registered per step name.
pub type StepConstructor = fn() -> Box<dyn Step>;

/// Name → constructor table for one resource kind. Indexed per domain
/// rather than shared globally, so the same step name can mean different
/// things for compute versus volume scheduling.
#[derive(Default)]
pub struct StepRegistry {
    constructors: HashMap<String, StepConstructor>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, ctor: StepConstructor) {
        self.constructors.insert(name.to_string(), ctor);
    }

    pub fn construct(&self, name: &str) -> Option<Box<dyn Step>> {
        self.constructors.get(name).map(|ctor| ctor())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }
}
