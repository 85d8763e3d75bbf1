//! Advisory skills: hints for the planner, never executed directly.

use crate::config::normalize_text;
use crate::device::Observation;
use crate::mission::StepHistory;

use super::registry::{Skill, SkillPriority, SkillResult};

/// Suggests leaving Settings when the goal has nothing to do with it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsEscapeSkill;

impl Skill for SettingsEscapeSkill {
    fn name(&self) -> &str {
        "SettingsEscape"
    }

    fn priority(&self) -> SkillPriority {
        SkillPriority::Advisory
    }

    fn evaluate(&self, goal: &str, observation: &Observation, _history: &StepHistory) -> SkillResult {
        let summary = normalize_text(&observation.summary);
        let in_settings = ["settings", "ajustes", "configuraci"]
            .iter()
            .any(|k| summary.contains(k))
            || observation.current_package.as_deref() == Some("com.android.settings");
        if !in_settings {
            return SkillResult::pass();
        }

        let goal = normalize_text(goal);
        if ["settings", "ajustes", "configuraci", "wifi"]
            .iter()
            .any(|k| goal.contains(k))
        {
            return SkillResult::pass();
        }

        SkillResult::advise(
            0.7,
            "We seem to be in Settings, but the goal doesn't mention it. Consider going BACK or HOME.",
        )
    }
}

/// Points at a visible search affordance when the goal is a search.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchSkill;

const SEARCH_INTENT: &[&str] = &[
    "busca", "search", "find", "encontrar", "look up", "quien es", "donde esta",
];
const SEARCH_AFFORDANCE: &[&str] = &[
    "search", "buscar", "lupa", "query", "find", "search_src_text",
];

impl Skill for SearchSkill {
    fn name(&self) -> &str {
        "SearchHelper"
    }

    fn priority(&self) -> SkillPriority {
        SkillPriority::Advisory
    }

    fn evaluate(&self, goal: &str, observation: &Observation, history: &StepHistory) -> SkillResult {
        let goal = normalize_text(goal);
        if !SEARCH_INTENT.iter().any(|k| goal.contains(k)) {
            return SkillResult::pass();
        }

        let has_search = observation.elements.iter().any(|e| {
            let haystack = format!(
                "{} {} {}",
                e.text.to_lowercase(),
                e.content_desc.to_lowercase(),
                e.resource_id.to_lowercase()
            );
            SEARCH_AFFORDANCE.iter().any(|k| haystack.contains(k))
        });
        if !has_search {
            return SkillResult::pass();
        }

        // Already typing; the hint would be noise
        if history.recent(3).any(|step| step.used("type")) {
            return SkillResult::pass();
        }

        SkillResult::advise(
            0.8,
            "A search button or field is visible and matches the goal. Using it is likely faster than navigating manually.",
        )
    }
}

/// Suggests swiping in list-heavy apps or after the planner couldn't find something.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrollSkill;

const LIST_HEAVY_APPS: &[&str] = &[
    "com.whatsapp",
    "com.android.settings",
    "com.google.android.contacts",
    "com.android.contacts",
    "com.android.chrome",
    "com.instagram.android",
    "com.facebook.katana",
];
const NOT_FOUND: &[&str] = &[
    "no veo", "no encuentro", "no esta", "not found", "cannot see", "can't see", "missing",
];

impl Skill for ScrollSkill {
    fn name(&self) -> &str {
        "ScrollHelper"
    }

    fn priority(&self) -> SkillPriority {
        SkillPriority::Advisory
    }

    fn evaluate(&self, _goal: &str, observation: &Observation, history: &StepHistory) -> SkillResult {
        let package = observation
            .current_package
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();
        let list_heavy = LIST_HEAVY_APPS.contains(&package.as_str());
        let last_not_found = history.latest().map_or(false, |step| {
            let rationale = normalize_text(&step.rationale);
            NOT_FOUND.iter().any(|k| rationale.contains(k))
        });
        if !list_heavy && !last_not_found {
            return SkillResult::pass();
        }

        let swipes = history
            .recent(5)
            .flat_map(|step| step.actions.iter())
            .filter(|a| a.capability == "swipe")
            .count();
        if swipes >= 3 {
            return SkillResult::pass();
        }

        SkillResult::advise(
            0.7,
            "This screen is list-heavy. If the target isn't visible, consider a 'swipe' to scroll down.",
        )
    }
}

/// Encourages exploring when the mission lingers in one app.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplorationSkill;

impl Skill for ExplorationSkill {
    fn name(&self) -> &str {
        "ExplorationHelper"
    }

    fn priority(&self) -> SkillPriority {
        SkillPriority::Advisory
    }

    fn evaluate(&self, _goal: &str, observation: &Observation, history: &StepHistory) -> SkillResult {
        let package = match observation.current_package.as_deref() {
            Some(p) if !p.is_empty() => p.to_lowercase(),
            _ => return SkillResult::pass(),
        };

        let steps_here = history
            .recent(5)
            .filter(|step| {
                step.current_package
                    .as_deref()
                    .map_or(false, |p| p.to_lowercase() == package)
            })
            .count();
        if steps_here < 3 {
            return SkillResult::pass();
        }

        SkillResult::advise(
            0.75,
            format!(
                "You have been in {} for several steps. Look for menu, search, back or home buttons, or swipe to reveal hidden content.",
                package
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Action;
    use crate::device::UiElement;
    use crate::memory::Outcome;
    use crate::mission::StepRecord;

    fn screen(package: &str, labels: &[&str]) -> Observation {
        let elements = labels
            .iter()
            .map(|l| UiElement {
                text: l.to_string(),
                ..Default::default()
            })
            .collect();
        Observation::new(elements, Some(package.to_string()), None)
    }

    fn step_in(package: &str, actions: Vec<Action>) -> StepRecord {
        let mut record = StepRecord::new(1, &screen(package, &[]), Outcome::Partial);
        record.actions = actions;
        record
    }

    #[test]
    fn test_settings_escape() {
        let obs = screen("com.android.settings", &["Settings", "Network"]);
        let history = StepHistory::new(5);
        assert!(SettingsEscapeSkill.evaluate("send a message", &obs, &history).can_handle);
        assert!(!SettingsEscapeSkill.evaluate("turn on wifi", &obs, &history).can_handle);
    }

    #[test]
    fn test_search_hint_until_typing() {
        let obs = screen("com.android.chrome", &["Search or type URL"]);
        let mut history = StepHistory::new(5);
        let result = SearchSkill.evaluate("search for pizza", &obs, &history);
        assert!(result.can_handle);
        assert_eq!(result.confidence, 0.8);

        history.push(step_in("com.android.chrome", vec![Action::new("a1", "type")]));
        assert!(!SearchSkill.evaluate("search for pizza", &obs, &history).can_handle);
    }

    #[test]
    fn test_scroll_stops_after_three_swipes() {
        let obs = screen("com.whatsapp", &["Chats"]);
        let mut history = StepHistory::new(5);
        assert!(ScrollSkill.evaluate("find ana", &obs, &history).can_handle);

        for _ in 0..3 {
            history.push(step_in("com.whatsapp", vec![Action::new("a1", "swipe")]));
        }
        assert!(!ScrollSkill.evaluate("find ana", &obs, &history).can_handle);
    }

    #[test]
    fn test_scroll_after_not_found_rationale() {
        let obs = screen("com.example.shop", &["Cart"]);
        let mut history = StepHistory::new(5);
        assert!(!ScrollSkill.evaluate("buy milk", &obs, &history).can_handle);

        let mut step = step_in("com.example.shop", vec![]);
        step.rationale = "The milk item is not found on screen".into();
        history.push(step);
        assert!(ScrollSkill.evaluate("buy milk", &obs, &history).can_handle);
    }

    #[test]
    fn test_exploration_after_three_steps_in_same_app() {
        let obs = screen("com.example.shop", &["Cart"]);
        let mut history = StepHistory::new(5);
        for _ in 0..2 {
            history.push(step_in("com.example.shop", vec![]));
        }
        assert!(!ExplorationSkill.evaluate("buy milk", &obs, &history).can_handle);
        history.push(step_in("com.example.shop", vec![]));
        let result = ExplorationSkill.evaluate("buy milk", &obs, &history);
        assert!(result.can_handle);
        assert_eq!(result.confidence, 0.75);
    }
}
