//! Scheduler module: dependency graph, safety checkpoints and dispatch.

mod approval;
mod executor;
mod graph;

pub use approval::{
    ApprovalGate, ApprovalRequest, AutoApprove, ChannelApprovalGate, CheckpointReason, DenyAll,
    PendingApproval,
};
pub use executor::{ActionReport, ActionScheduler, ActionStatus, ExecutionReport};
pub use graph::DependencyGraph;
