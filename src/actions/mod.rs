//! Actions module: plan data model, capability catalog, and response parsing.

mod capabilities;
mod parse;
mod plan;

pub use capabilities::{default_risk, lookup, render_catalog, validate_params, CapabilitySpec, CAPABILITIES};
pub use parse::parse_model_plan;
pub use plan::{Action, ActionId, ActionPlan, PlanSource, PlanSummary, RiskLevel};
