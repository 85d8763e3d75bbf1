//! Bounded, most-recent-first record of executed steps.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actions::{Action, PlanSource};
use crate::device::Observation;
use crate::memory::Outcome;

/// What happened in one step, as later steps and skills see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u32,
    pub timestamp: DateTime<Utc>,
    pub observation_summary: String,
    #[serde(default)]
    pub current_package: Option<String>,
    /// Absent when the step never produced a plan.
    #[serde(default)]
    pub source: Option<PlanSource>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub rationale: String,
    pub outcome: Outcome,
    #[serde(default)]
    pub error: Option<String>,
    /// The loop guard fired after this step.
    #[serde(default)]
    pub loop_signal: bool,
}

impl StepRecord {
    pub fn new(step: u32, observation: &Observation, outcome: Outcome) -> Self {
        Self {
            step,
            timestamp: Utc::now(),
            observation_summary: observation.summary.clone(),
            current_package: observation.current_package.clone(),
            source: None,
            actions: Vec::new(),
            rationale: String::new(),
            outcome,
            error: None,
            loop_signal: false,
        }
    }

    pub fn first_capability(&self) -> Option<&str> {
        self.actions.first().map(|a| a.capability.as_str())
    }

    pub fn used(&self, capability: &str) -> bool {
        self.actions.iter().any(|a| a.capability == capability)
    }

    /// `open_app` targets of this step (package or app name, lowercased).
    pub fn opened_apps(&self) -> impl Iterator<Item = String> + '_ {
        self.actions
            .iter()
            .filter(|a| a.capability == "open_app")
            .filter_map(|a| a.param_str("package").or_else(|| a.param_str("app_name")))
            .map(str::to_lowercase)
    }
}

/// Step history capped at a fixed depth; index 0 is the latest step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepHistory {
    depth: usize,
    entries: VecDeque<StepRecord>,
}

impl StepHistory {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Add the latest step, dropping the oldest beyond the depth.
    pub fn push(&mut self, record: StepRecord) {
        self.entries.push_front(record);
        self.entries.truncate(self.depth);
    }

    /// Most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &StepRecord> {
        self.entries.iter()
    }

    /// The last `n` steps, most recent first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &StepRecord> {
        self.entries.iter().take(n)
    }

    pub fn latest(&self) -> Option<&StepRecord> {
        self.entries.front()
    }

    pub fn latest_mut(&mut self) -> Option<&mut StepRecord> {
        self.entries.front_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Default for StepHistory {
    fn default() -> Self {
        Self::new(10)
    }
}
