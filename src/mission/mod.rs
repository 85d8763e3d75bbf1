//! Mission module: state machine, step history, persistence and the loop.

mod history;
mod orchestrator;
mod state;
mod termination;

pub use history::{StepHistory, StepRecord};
pub use orchestrator::{AbortHandle, Orchestrator};
pub use state::{Mission, MissionStatus, MissionStore, StateError};
pub use termination::{
    AnyOf, DeclaredComplete, ForegroundPackage, TerminationContext, TerminationPredicate,
};
