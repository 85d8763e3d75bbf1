//! Planner module: reasoning context and model-backed planning.

mod context;
mod reasoning;

pub use context::PlanningContext;
pub use reasoning::ReasoningPlanner;
