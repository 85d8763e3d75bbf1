//! Bounded reasoning context built from the goal, screen, history and memory.

use crate::device::Observation;
use crate::memory::MemoryRecord;
use crate::mission::StepHistory;
use crate::skills::AdvisoryHint;

/// Longest observation rendering sent to the backend.
const MAX_OBSERVATION_CHARS: usize = 4000;
/// Longest per-step rationale quoted from history.
const MAX_RATIONALE_CHARS: usize = 160;

/// Everything the planner may look at for one step.
pub struct PlanningContext<'a> {
    pub goal: &'a str,
    pub observation: &'a Observation,
    pub history: &'a StepHistory,
    pub history_limit: usize,
    pub memory_hits: &'a [MemoryRecord],
    pub hint: Option<&'a AdvisoryHint>,
}

impl PlanningContext<'_> {
    /// User context for the reasoning backend.
    pub fn render(&self) -> String {
        let mut out = format!("GOAL: {}\n\n", self.goal);

        out.push_str("CURRENT SCREEN:\n");
        out.push_str(&truncate(&self.observation.render(), MAX_OBSERVATION_CHARS));
        out.push_str("\n\n");

        if !self.history.is_empty() && self.history_limit > 0 {
            out.push_str("RECENT STEPS (latest first):\n");
            for step in self.history.recent(self.history_limit) {
                let actions = if step.actions.is_empty() {
                    "no actions".to_string()
                } else {
                    step.actions
                        .iter()
                        .map(|a| {
                            if a.params.is_empty() {
                                a.capability.clone()
                            } else {
                                format!("{}({})", a.capability, serde_json::Value::Object(a.params.clone()))
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                out.push_str(&format!(
                    "  {}. [{}] {}",
                    step.step,
                    step.outcome.as_str(),
                    actions
                ));
                if let Some(err) = &step.error {
                    out.push_str(&format!(" | error: {}", truncate(err, MAX_RATIONALE_CHARS)));
                } else if !step.rationale.is_empty() {
                    out.push_str(&format!(" | {}", truncate(&step.rationale, MAX_RATIONALE_CHARS)));
                }
                out.push('\n');
            }
            out.push('\n');
        }

        if !self.memory_hits.is_empty() {
            out.push_str("SIMILAR PAST SITUATIONS:\n");
            for hit in self.memory_hits {
                out.push_str(&format!("  - {} -> {}\n", hit.action_taken, hit.outcome.as_str()));
            }
            out.push('\n');
        }

        if let Some(hint) = self.hint {
            out.push_str(&format!("SKILL HINT: {}\n\n", hint));
        }

        out.push_str("Reply with the JSON object only.");
        out
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, PlanSource, PlanSummary};
    use crate::memory::{HashFingerprinter, Outcome};
    use crate::mission::StepRecord;

    #[test]
    fn test_render_includes_every_section() {
        let observation = Observation::new(Vec::new(), Some("com.whatsapp".into()), None);
        let mut history = StepHistory::new(10);
        for step in 1..=4 {
            let mut record = StepRecord::new(step, &observation, Outcome::Failure);
            record.actions = vec![Action::new("a1", "tap").with_param("x", 1).with_param("y", 2)];
            history.push(record);
        }
        let hits = vec![MemoryRecord {
            situation_fingerprint: HashFingerprinter.fingerprint_text("x"),
            action_taken: PlanSummary::aborted(PlanSource::Model, "bad json"),
            outcome: Outcome::Failure,
            timestamp: chrono::Utc::now(),
        }];
        let hint = AdvisoryHint {
            skill: "SearchHelper".into(),
            suggestion: "use search".into(),
            confidence: 0.8,
        };

        let rendered = PlanningContext {
            goal: "message ana",
            observation: &observation,
            history: &history,
            history_limit: 2,
            memory_hits: &hits,
            hint: Some(&hint),
        }
        .render();

        assert!(rendered.starts_with("GOAL: message ana"));
        assert!(rendered.contains("package: com.whatsapp"));
        assert!(rendered.contains("  4. [failure] tap("));
        assert!(!rendered.contains("  2. [failure]"));
        assert!(rendered.contains("[model] no actions (bad json) -> failure"));
        assert!(rendered.contains("SKILL HINT: SearchHelper (0.80): use search"));
    }
}
