//! Critical skills: deterministic policy overrides.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::actions::Action;
use crate::config::{get_package, normalize_text};
use crate::device::Observation;
use crate::mission::StepHistory;

use super::registry::{Skill, SkillPriority, SkillResult};

static OPEN_INTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:abre|abrir|open|launch|lanza|ve a)\s+(?:el\s+chat\s+de\s+|la\s+app\s+de\s+|the\s+app\s+|el\s+|la\s+|the\s+)?([a-z0-9]+)",
    )
    .unwrap()
});

const FILLER_WORDS: &[&str] = &["el", "la", "un", "una", "chat", "app", "este", "ese", "the", "a"];

/// Opens apps named in the goal ("open whatsapp", "abre el chat de whatsapp").
///
/// Names resolve through the built-in app table first, then through the
/// device's installed packages by last package segment.
#[derive(Debug, Clone, Default)]
pub struct AppOpenerSkill {
    installed_packages: Vec<String>,
}

impl AppOpenerSkill {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also match against these installed package names.
    pub fn with_installed_packages(mut self, packages: Vec<String>) -> Self {
        self.installed_packages = packages;
        self
    }

    fn installed_match(&self, app_name: &str) -> Option<&str> {
        if app_name.len() <= 2 {
            return None;
        }
        self.installed_packages
            .iter()
            .map(String::as_str)
            .find(|pkg| {
                let pkg_lower = pkg.to_lowercase();
                pkg_lower == app_name || pkg_lower.rsplit('.').next() == Some(app_name)
            })
    }
}

impl Skill for AppOpenerSkill {
    fn name(&self) -> &str {
        "AppOpener"
    }

    fn priority(&self) -> SkillPriority {
        SkillPriority::Critical
    }

    fn evaluate(&self, goal: &str, observation: &Observation, history: &StepHistory) -> SkillResult {
        let goal = normalize_text(goal);
        let app_name = match OPEN_INTENT.captures(&goal).and_then(|c| c.get(1)) {
            Some(m) => m.as_str().to_string(),
            None => return SkillResult::pass(),
        };
        if FILLER_WORDS.contains(&app_name.as_str()) {
            return SkillResult::pass();
        }

        let (package, confidence) = match get_package(&app_name) {
            Some(pkg) => (pkg.to_string(), 0.95),
            None => match self.installed_match(&app_name) {
                Some(pkg) => (pkg.to_string(), 0.91),
                None => return SkillResult::pass(),
            },
        };

        if observation.current_package.as_deref() == Some(package.as_str()) {
            return SkillResult::pass_with_note(
                0.1,
                format!("App {} is already in foreground.", app_name),
            );
        }

        let package_lower = package.to_lowercase();
        let recently_tried = history
            .recent(3)
            .flat_map(|step| step.opened_apps())
            .any(|target| target == app_name || target == package_lower);
        if recently_tried {
            return SkillResult::pass_with_note(
                0.5,
                format!("Recently tried opening {}, letting the planner reason next steps.", app_name),
            );
        }

        SkillResult::act(
            vec![Action::new("a1", "open_app").with_param("package", package.clone())],
            confidence,
            format!("Opening {} ({})", app_name, package),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Outcome;
    use crate::mission::StepRecord;

    fn evaluate(skill: &AppOpenerSkill, goal: &str) -> SkillResult {
        skill.evaluate(goal, &Observation::empty(), &StepHistory::new(5))
    }

    #[test]
    fn test_opens_known_app() {
        let result = evaluate(&AppOpenerSkill::new(), "open whatsapp");
        assert!(result.can_handle);
        assert!(result.override_llm);
        assert_eq!(result.confidence, 0.95);
        assert_eq!(result.actions.len(), 1);
        assert_eq!(result.actions[0].capability, "open_app");
        assert_eq!(result.actions[0].param_str("package"), Some("com.whatsapp"));
    }

    #[test]
    fn test_spanish_phrasing_and_accents() {
        let skill = AppOpenerSkill::new();
        let chat = evaluate(&skill, "Abre el chat de WhatsApp y saluda");
        assert_eq!(chat.actions[0].param_str("package"), Some("com.whatsapp"));

        let settings = evaluate(&skill, "abre configuración");
        assert_eq!(settings.actions[0].param_str("package"), Some("com.android.settings"));
    }

    #[test]
    fn test_ignores_unrelated_goals_and_fillers() {
        let skill = AppOpenerSkill::new();
        assert!(!evaluate(&skill, "send a message to ana").can_handle);
        assert!(!evaluate(&skill, "abre la app").can_handle);
        assert!(!evaluate(&skill, "open unknownthing").can_handle);
    }

    #[test]
    fn test_installed_package_match() {
        let skill = AppOpenerSkill::new()
            .with_installed_packages(vec!["org.telegram.messenger".into(), "com.example.notes".into()]);
        let result = evaluate(&skill, "open notes");
        assert_eq!(result.confidence, 0.91);
        assert_eq!(result.actions[0].param_str("package"), Some("com.example.notes"));
    }

    #[test]
    fn test_already_foreground_defers() {
        let observation = Observation::new(Vec::new(), Some("com.whatsapp".into()), None);
        let result = AppOpenerSkill::new().evaluate("open whatsapp", &observation, &StepHistory::new(5));
        assert!(!result.can_handle);
        assert_eq!(result.confidence, 0.1);
    }

    #[test]
    fn test_recent_attempt_defers() {
        let mut history = StepHistory::new(5);
        let mut step = StepRecord::new(1, &Observation::empty(), Outcome::Success);
        step.actions = vec![Action::new("a1", "open_app").with_param("package", "com.whatsapp")];
        history.push(step);

        let result = AppOpenerSkill::new().evaluate("open whatsapp", &Observation::empty(), &history);
        assert!(!result.can_handle);
        assert_eq!(result.confidence, 0.5);
    }
}
