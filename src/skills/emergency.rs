//! Emergency skills, consulted only when the loop guard fires.

use crate::actions::Action;
use crate::device::Observation;
use crate::mission::StepHistory;

use super::registry::{Skill, SkillPriority, SkillResult};

/// Breaks repetition: the same first action three steps running means BACK,
/// the same screen three steps running means HOME.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternSkill;

impl Skill for PatternSkill {
    fn name(&self) -> &str {
        "PatternDetector"
    }

    fn priority(&self) -> SkillPriority {
        SkillPriority::Emergency
    }

    fn evaluate(&self, _goal: &str, _observation: &Observation, history: &StepHistory) -> SkillResult {
        if history.len() < 3 {
            return SkillResult::pass();
        }

        let first_caps: Vec<&str> = history.recent(3).filter_map(|s| s.first_capability()).collect();
        if first_caps.len() == 3 && first_caps.iter().all(|c| *c == first_caps[0]) {
            return SkillResult::act(
                vec![Action::new("a1", "back")],
                0.91,
                "Detected repeated actions. Going BACK to break the loop.",
            );
        }

        let summaries: Vec<&str> = history
            .recent(3)
            .map(|s| s.observation_summary.as_str())
            .collect();
        if summaries.iter().all(|s| *s == summaries[0]) {
            return SkillResult::act(
                vec![Action::new("a1", "home")],
                0.92,
                "UI seems stuck. Going HOME to reset context.",
            );
        }

        SkillResult::pass()
    }
}

/// Resets to HOME after five steps with no recent success.
#[derive(Debug, Clone, Copy, Default)]
pub struct HomeRescueSkill;

impl Skill for HomeRescueSkill {
    fn name(&self) -> &str {
        "HomeRescue"
    }

    fn priority(&self) -> SkillPriority {
        SkillPriority::Emergency
    }

    fn evaluate(&self, _goal: &str, _observation: &Observation, history: &StepHistory) -> SkillResult {
        if history.len() < 5 {
            return SkillResult::pass();
        }
        if history.recent(3).any(|s| s.outcome.is_success()) {
            return SkillResult::pass();
        }
        SkillResult::act(
            vec![Action::new("a1", "home")],
            0.93,
            "No progress in recent steps. Resetting to HOME.",
        )
    }
}
