//! Error taxonomy for the scheduling pipeline.
//!
//! `Skipped` and `Failed` are carried inline on `StepError` since the engine
//! needs to distinguish them on every step invocation; the remaining
//! variants surface to callers (controller, pod scheduler, consumers) as a
//! single `CortexError` so each layer can decide retry/backoff/log policy.

use thiserror::Error;

/// Error returned by `Step::run`.
#[derive(Debug, Error)]
pub enum StepError {
    /// Sentinel: ignore this step for this request, do not abort the run.
    #[error("step skipped")]
    Skipped,
    /// Any other failure aborts the whole pipeline run.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl StepError {
    pub fn is_skipped(&self) -> bool {
        matches!(self, StepError::Skipped)
    }
}

/// Crate-wide error taxonomy.
#[derive(Debug, Error)]
pub enum CortexError {
    /// Unknown step name, invalid options, or duplicate (name, alias) pair.
    /// Fatal for the pipeline being built; the previous pipeline is retained.
    #[error("config error: {0}")]
    Config(String),

    /// A step's `Run` failed; the request is retried per controller policy.
    #[error("step {step} failed: {source}")]
    StepFailure { step: String, source: anyhow::Error },

    /// A step's output subject set broke the shrink-only/same-size contract
    /// for its kind (filter output not a subset of input, or weigher output
    /// not the same set as input).
    #[error("safety: number of (deduplicated) subjects changed during step execution ({step})")]
    ValidationFailure { step: String },

    /// External bind/update call failed; triggers cache rollback and backoff.
    #[error("bind failed: {0}")]
    BindFailure(String),

    /// Decision persistence failed. Logged, never surfaced to the scheduling
    /// decision itself.
    #[error("consumer failed: {0}")]
    ConsumerFailure(String),

    #[error("yaml decode error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json decode error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CortexError>;
