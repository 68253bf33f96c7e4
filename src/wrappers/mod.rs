//! Step wrappers: cross-cutting decorators layered around a raw `Step`,
//! preserving its name and options while changing behaviour.
//!
//! The canonical chain, innermost to outermost, is Scope → Validation →
//! Monitoring. `compose` builds exactly that chain: a fixed decorator order
//! around a pluggable body.

pub mod monitoring;
pub mod scope;
pub mod validation;

use std::sync::Arc;

pub use monitoring::{LogMetricsSink, MetricsSink, MonitoringWrapper};
pub use scope::{RequestScopeAction, ScopeMatcher, ScopeOp, ScopeWrapper};
pub use validation::ValidationWrapper;

use crate::step::Step;

/// Options controlling how a step is wrapped when a `Pipeline` is built from
/// configuration.
pub struct WrapConfig {
    pub scope: Option<(Box<dyn ScopeMatcher>, ScopeOp)>,
    pub same_subject_number_check_enabled: bool,
    pub metrics: Arc<dyn MetricsSink>,
}

impl Default for WrapConfig {
    fn default() -> Self {
        Self {
            scope: None,
            same_subject_number_check_enabled: true,
            metrics: Arc::new(LogMetricsSink),
        }
    }
}

/// Builds the canonical wrapper chain around a raw step.
pub fn compose(inner: Box<dyn Step>, cfg: WrapConfig) -> Box<dyn Step> {
    let scoped: Box<dyn Step> = match cfg.scope {
        Some((matcher, op)) => Box::new(ScopeWrapper::new(inner, matcher, op)),
        None => inner,
    };
    let validated: Box<dyn Step> = Box::new(ValidationWrapper::new(
        scoped,
        cfg.same_subject_number_check_enabled,
    ));
    Box::new(MonitoringWrapper::new(validated, cfg.metrics))
}
