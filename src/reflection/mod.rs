//! Reflection module: memory write-back and the loop guard.

mod guard;
mod reflector;

pub use guard::{LoopGuard, LoopSignal};
pub use reflector::{Reflection, Reflector};
