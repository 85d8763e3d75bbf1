//! Configuration module for the mission loop.

mod apps;
mod pilot;
mod prompts;

pub use apps::{get_package, normalize_text, resolve_package, APP_PACKAGES, HOME_PACKAGE};
pub use pilot::{default_state_dir, AutonomyLevel, ConfigOverrides, EvictionPolicy, PilotConfig};
pub use prompts::{build_system_prompt, REASONING_PROMPT};
