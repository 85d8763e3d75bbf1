//! Goal-completion predicates, consulted once per step after reflection.

use std::sync::Arc;

use crate::actions::{ActionPlan, PlanSource};
use crate::device::Observation;

use super::history::StepHistory;

/// What a predicate may look at.
pub struct TerminationContext<'a> {
    pub goal: &'a str,
    /// The screen after the step ran.
    pub observation: &'a Observation,
    /// History including the step just finished.
    pub history: &'a StepHistory,
    /// The plan this step executed, if one was produced.
    pub plan: Option<&'a ActionPlan>,
}

/// Decides whether the goal has been met.
pub trait TerminationPredicate: Send + Sync {
    fn is_met(&self, ctx: &TerminationContext<'_>) -> bool;
}

impl<F> TerminationPredicate for F
where
    F: Fn(&TerminationContext<'_>) -> bool + Send + Sync,
{
    fn is_met(&self, ctx: &TerminationContext<'_>) -> bool {
        self(ctx)
    }
}

/// Met when the given package is in the foreground.
#[derive(Debug, Clone)]
pub struct ForegroundPackage {
    package: String,
}

impl ForegroundPackage {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
        }
    }
}

impl TerminationPredicate for ForegroundPackage {
    fn is_met(&self, ctx: &TerminationContext<'_>) -> bool {
        ctx.observation.current_package.as_deref() == Some(self.package.as_str())
    }
}

/// Met when the reasoning backend answers with an empty plan, i.e. it sees
/// nothing left to do.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredComplete;

impl TerminationPredicate for DeclaredComplete {
    fn is_met(&self, ctx: &TerminationContext<'_>) -> bool {
        ctx.plan
            .is_some_and(|plan| plan.source == PlanSource::Model && plan.is_empty())
    }
}

/// Met when any inner predicate is.
#[derive(Clone, Default)]
pub struct AnyOf(Vec<Arc<dyn TerminationPredicate>>);

impl AnyOf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn or(mut self, predicate: impl TerminationPredicate + 'static) -> Self {
        self.0.push(Arc::new(predicate));
        self
    }
}

impl TerminationPredicate for AnyOf {
    fn is_met(&self, ctx: &TerminationContext<'_>) -> bool {
        self.0.iter().any(|p| p.is_met(ctx))
    }
}
