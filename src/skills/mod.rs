//! Skills module: deterministic rules and the priority resolver.

mod advisory;
mod critical;
mod emergency;
mod registry;

pub use advisory::{ExplorationSkill, ScrollSkill, SearchSkill, SettingsEscapeSkill};
pub use critical::AppOpenerSkill;
pub use emergency::{HomeRescueSkill, PatternSkill};
pub use registry::{AdvisoryHint, Resolution, Skill, SkillPriority, SkillRegistry, SkillResult};

use crate::config::PilotConfig;

impl SkillRegistry {
    /// Registry with every built-in skill, in resolution order.
    pub fn with_defaults(config: &PilotConfig) -> Self {
        Self::with_app_opener(config, AppOpenerSkill::new())
    }

    /// Built-ins with a configured app opener (e.g. one that knows the
    /// device's installed packages).
    pub fn with_app_opener(config: &PilotConfig, opener: AppOpenerSkill) -> Self {
        Self::from_config(config)
            .with_skill(opener)
            .with_skill(SettingsEscapeSkill)
            .with_skill(SearchSkill)
            .with_skill(ScrollSkill)
            .with_skill(ExplorationSkill)
            .with_skill(PatternSkill)
            .with_skill(HomeRescueSkill)
    }
}
