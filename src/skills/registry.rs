//! Skill trait, results, and the priority-ordered resolver.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::actions::{Action, ActionPlan, PlanSource};
use crate::config::PilotConfig;
use crate::device::Observation;
use crate::mission::StepHistory;

/// Resolution tier of a skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkillPriority {
    /// Policy override: the first one that can handle the situation wins.
    Critical,
    /// Context for the planner, unless it asks to override with enough confidence.
    Advisory,
    /// Recovery, consulted only when the loop guard fires.
    Emergency,
}

impl fmt::Display for SkillPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "CRITICAL"),
            Self::Advisory => write!(f, "ADVISORY"),
            Self::Emergency => write!(f, "EMERGENCY"),
        }
    }
}

/// What a skill thinks of the current situation.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillResult {
    pub can_handle: bool,
    pub actions: Vec<Action>,
    pub confidence: f32,
    pub override_llm: bool,
    pub suggestion: Option<String>,
}

impl SkillResult {
    /// Not applicable.
    pub fn pass() -> Self {
        Self {
            can_handle: false,
            actions: Vec::new(),
            confidence: 0.0,
            override_llm: false,
            suggestion: None,
        }
    }

    /// Not applicable, but with a note for the logs.
    pub fn pass_with_note(confidence: f32, note: impl Into<String>) -> Self {
        Self {
            confidence,
            suggestion: Some(note.into()),
            ..Self::pass()
        }
    }

    /// Guidance for the planner without actions.
    pub fn advise(confidence: f32, suggestion: impl Into<String>) -> Self {
        Self {
            can_handle: true,
            confidence,
            suggestion: Some(suggestion.into()),
            ..Self::pass()
        }
    }

    /// A concrete plan that replaces the model's.
    pub fn act(actions: Vec<Action>, confidence: f32, suggestion: impl Into<String>) -> Self {
        Self {
            can_handle: true,
            actions,
            confidence,
            override_llm: true,
            suggestion: Some(suggestion.into()),
        }
    }
}

/// A deterministic rule evaluated against the goal, the screen and recent steps.
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> SkillPriority;
    fn evaluate(&self, goal: &str, observation: &Observation, history: &StepHistory) -> SkillResult;
}

/// Advisory guidance forwarded to the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryHint {
    pub skill: String,
    pub suggestion: String,
    pub confidence: f32,
}

impl fmt::Display for AdvisoryHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2}): {}", self.skill, self.confidence, self.suggestion)
    }
}

/// Outcome of resolving one step.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A skill decided the plan; the planner is not consulted.
    Override {
        skill: String,
        priority: SkillPriority,
        plan: ActionPlan,
    },
    /// Defer to the planner, optionally with a hint.
    Defer { hint: Option<AdvisoryHint> },
}

impl Resolution {
    pub fn plan(&self) -> Option<&ActionPlan> {
        match self {
            Self::Override { plan, .. } => Some(plan),
            Self::Defer { .. } => None,
        }
    }

    pub fn into_plan(self) -> Option<ActionPlan> {
        match self {
            Self::Override { plan, .. } => Some(plan),
            Self::Defer { .. } => None,
        }
    }
}

/// Registered skills, in registration order.
#[derive(Clone)]
pub struct SkillRegistry {
    skills: Vec<Arc<dyn Skill>>,
    confidence_threshold: f32,
    suggestion_threshold: f32,
}

impl SkillRegistry {
    pub fn new(confidence_threshold: f32, suggestion_threshold: f32) -> Self {
        Self {
            skills: Vec::new(),
            confidence_threshold,
            suggestion_threshold,
        }
    }

    /// Empty registry using the thresholds from `config`.
    pub fn from_config(config: &PilotConfig) -> Self {
        Self::new(config.confidence_threshold, config.suggestion_threshold)
    }

    /// Same skills, different thresholds.
    pub fn with_thresholds(mut self, confidence_threshold: f32, suggestion_threshold: f32) -> Self {
        self.confidence_threshold = confidence_threshold;
        self.suggestion_threshold = suggestion_threshold;
        self
    }

    pub fn register(&mut self, skill: Arc<dyn Skill>) -> &mut Self {
        tracing::debug!("Skill registered: {} ({})", skill.name(), skill.priority());
        self.skills.push(skill);
        self
    }

    pub fn with_skill(mut self, skill: impl Skill + 'static) -> Self {
        self.register(Arc::new(skill));
        self
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.skills.iter().map(|s| s.name()).collect()
    }

    fn tier(&self, priority: SkillPriority) -> impl Iterator<Item = &Arc<dyn Skill>> {
        self.skills.iter().filter(move |s| s.priority() == priority)
    }

    /// Resolve a step.
    ///
    /// With `emergency` set, EMERGENCY skills are consulted first and the
    /// first that can handle the situation wins; if none can, resolution
    /// falls through to the normal order. Normally: the first CRITICAL skill
    /// that can handle wins outright, then the first ADVISORY result that asks
    /// to override with confidence at or above the global threshold, and
    /// otherwise the highest-confidence ADVISORY result at or above the
    /// suggestion threshold becomes a hint (earlier registration wins ties).
    pub fn resolve(
        &self,
        goal: &str,
        observation: &Observation,
        history: &StepHistory,
        emergency: bool,
    ) -> Resolution {
        if emergency {
            for skill in self.tier(SkillPriority::Emergency) {
                let result = skill.evaluate(goal, observation, history);
                if result.can_handle {
                    tracing::warn!("Emergency skill {} takes over", skill.name());
                    return self.override_with(skill.as_ref(), result, PlanSource::Emergency);
                }
            }
            tracing::warn!("Loop signal raised but no emergency skill applies");
        }

        for skill in self.tier(SkillPriority::Critical) {
            let result = skill.evaluate(goal, observation, history);
            if result.can_handle {
                tracing::info!("Critical skill {} overrides planning", skill.name());
                return self.override_with(skill.as_ref(), result, PlanSource::Skill);
            }
            if let Some(note) = &result.suggestion {
                tracing::debug!("{}: {}", skill.name(), note);
            }
        }

        let mut best: Option<AdvisoryHint> = None;
        for skill in self.tier(SkillPriority::Advisory) {
            let result = skill.evaluate(goal, observation, history);
            if !result.can_handle {
                continue;
            }
            if result.override_llm
                && !result.actions.is_empty()
                && result.confidence >= self.confidence_threshold
            {
                tracing::info!("Advisory skill {} overrides planning", skill.name());
                return self.override_with(skill.as_ref(), result, PlanSource::Skill);
            }
            if result.confidence < self.suggestion_threshold {
                continue;
            }
            let Some(suggestion) = result.suggestion else {
                continue;
            };
            if best.as_ref().map_or(true, |b| result.confidence > b.confidence) {
                best = Some(AdvisoryHint {
                    skill: skill.name().to_string(),
                    suggestion,
                    confidence: result.confidence,
                });
            }
        }

        Resolution::Defer { hint: best }
    }

    fn override_with(&self, skill: &dyn Skill, result: SkillResult, source: PlanSource) -> Resolution {
        let actions = result
            .actions
            .into_iter()
            .enumerate()
            .map(|(i, mut action)| {
                if action.id.is_empty() {
                    action.id = format!("a{}", i + 1);
                }
                action
            })
            .collect();

        let mut plan = ActionPlan::new(source, actions, result.confidence).with_rationale(
            result
                .suggestion
                .unwrap_or_else(|| format!("{} applied", skill.name())),
        );
        plan.override_llm = true;

        Resolution::Override {
            skill: skill.name().to_string(),
            priority: skill.priority(),
            plan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        priority: SkillPriority,
        result: SkillResult,
    }

    impl Skill for Fixed {
        fn name(&self) -> &str {
            self.name
        }
        fn priority(&self) -> SkillPriority {
            self.priority
        }
        fn evaluate(&self, _: &str, _: &Observation, _: &StepHistory) -> SkillResult {
            self.result.clone()
        }
    }

    fn fixed(name: &'static str, priority: SkillPriority, result: SkillResult) -> Fixed {
        Fixed { name, priority, result }
    }

    fn resolve(registry: &SkillRegistry, emergency: bool) -> Resolution {
        registry.resolve("goal", &Observation::empty(), &StepHistory::new(5), emergency)
    }

    #[test]
    fn test_critical_short_circuits_regardless_of_confidence() {
        let registry = SkillRegistry::new(0.75, 0.6)
            .with_skill(fixed(
                "low",
                SkillPriority::Critical,
                SkillResult::act(vec![Action::new("", "back")], 0.2, "go back"),
            ))
            .with_skill(fixed(
                "high",
                SkillPriority::Critical,
                SkillResult::act(vec![Action::new("", "home")], 0.99, "go home"),
            ));

        match resolve(&registry, false) {
            Resolution::Override { skill, plan, .. } => {
                assert_eq!(skill, "low");
                assert_eq!(plan.actions[0].capability, "back");
                assert_eq!(plan.actions[0].id, "a1");
                assert_eq!(plan.source, PlanSource::Skill);
            }
            other => panic!("expected override, got {:?}", other),
        }
    }

    #[test]
    fn test_advisory_hint_highest_confidence_earliest_on_tie() {
        let registry = SkillRegistry::new(0.75, 0.6)
            .with_skill(fixed("weak", SkillPriority::Advisory, SkillResult::advise(0.5, "weak")))
            .with_skill(fixed("first", SkillPriority::Advisory, SkillResult::advise(0.7, "first")))
            .with_skill(fixed("second", SkillPriority::Advisory, SkillResult::advise(0.7, "second")));

        match resolve(&registry, false) {
            Resolution::Defer { hint: Some(hint) } => assert_eq!(hint.skill, "first"),
            other => panic!("expected hint, got {:?}", other),
        }
    }

    #[test]
    fn test_advisory_below_threshold_gives_no_hint() {
        let registry = SkillRegistry::new(0.75, 0.6)
            .with_skill(fixed("weak", SkillPriority::Advisory, SkillResult::advise(0.59, "weak")));
        assert_eq!(resolve(&registry, false), Resolution::Defer { hint: None });
    }

    #[test]
    fn test_confident_advisory_override_is_treated_as_critical() {
        let registry = SkillRegistry::new(0.75, 0.6)
            .with_skill(fixed(
                "timid",
                SkillPriority::Advisory,
                SkillResult::act(vec![Action::new("", "back")], 0.7, "maybe back"),
            ))
            .with_skill(fixed(
                "bold",
                SkillPriority::Advisory,
                SkillResult::act(vec![Action::new("", "home")], 0.8, "home now"),
            ));

        let plan = resolve(&registry, false).into_plan().unwrap();
        assert_eq!(plan.actions[0].capability, "home");
    }

    #[test]
    fn test_emergency_only_when_signalled() {
        let registry = SkillRegistry::new(0.75, 0.6)
            .with_skill(fixed(
                "critical",
                SkillPriority::Critical,
                SkillResult::act(vec![Action::new("", "open_app")], 0.95, "open"),
            ))
            .with_skill(fixed(
                "rescue",
                SkillPriority::Emergency,
                SkillResult::act(vec![Action::new("", "home")], 0.93, "rescue"),
            ));

        let normal = resolve(&registry, false).into_plan().unwrap();
        assert_eq!(normal.actions[0].capability, "open_app");

        match resolve(&registry, true) {
            Resolution::Override { skill, plan, priority } => {
                assert_eq!(skill, "rescue");
                assert_eq!(priority, SkillPriority::Emergency);
                assert_eq!(plan.source, PlanSource::Emergency);
            }
            other => panic!("expected emergency override, got {:?}", other),
        }
    }

    #[test]
    fn test_emergency_falls_through_when_nothing_applies() {
        let registry = SkillRegistry::new(0.75, 0.6)
            .with_skill(fixed("rescue", SkillPriority::Emergency, SkillResult::pass()));
        assert_eq!(resolve(&registry, true), Resolution::Defer { hint: None });
    }
}
