//! Action plan data model.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::capabilities::default_risk;

/// Identifier of an action, unique within one plan.
pub type ActionId = String;

/// Risk class of an action; `High` passes through a safety checkpoint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Parse a risk label; "critical" is treated as high.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" | "critical" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Where a plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanSource {
    Skill,
    Model,
    Emergency,
}

impl fmt::Display for PlanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skill => write!(f, "skill"),
            Self::Model => write!(f, "model"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

/// A single device command with its dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    /// Capability name, e.g. `tap` or `open_app`.
    pub capability: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub depends_on: BTreeSet<ActionId>,
    #[serde(default)]
    pub risk_level: RiskLevel,
}

impl Action {
    /// Create an action whose risk comes from the capability catalog.
    pub fn new(id: impl Into<String>, capability: impl Into<String>) -> Self {
        let capability = capability.into();
        let risk_level = default_risk(&capability).unwrap_or_default();
        Self {
            id: id.into(),
            capability,
            params: Map::new(),
            depends_on: BTreeSet::new(),
            risk_level,
        }
    }

    /// Add a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Declare a dependency on another action of the same plan.
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    /// String parameter, if present.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Integer parameter, accepting numeric strings.
    pub fn param_i64(&self, key: &str) -> Option<i64> {
        match self.params.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// An ordered, dependency-annotated set of actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub actions: Vec<Action>,
    pub source: PlanSource,
    /// Confidence in [0, 1].
    pub confidence: f32,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub override_llm: bool,
    /// Gate every action through the checkpoint policy, regardless of risk.
    #[serde(default)]
    pub force_checkpoint: bool,
}

impl ActionPlan {
    /// Create a plan; confidence is clamped into [0, 1].
    pub fn new(source: PlanSource, actions: Vec<Action>, confidence: f32) -> Self {
        Self {
            actions,
            source,
            confidence: clamp_confidence(confidence),
            rationale: String::new(),
            override_llm: false,
            force_checkpoint: false,
        }
    }

    /// Set the rationale.
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Look up an action by id.
    pub fn get(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Check ids are unique and every dependency names an action of this plan.
    ///
    /// Cycle detection lives in the scheduler's dependency graph.
    pub fn check_references(&self) -> Result<(), String> {
        let mut ids = HashSet::new();
        for action in &self.actions {
            if !ids.insert(action.id.as_str()) {
                return Err(format!("Duplicate action id: {}", action.id));
            }
        }
        for action in &self.actions {
            for dep in &action.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(format!(
                        "Action {} depends on unknown action {}",
                        action.id, dep
                    ));
                }
            }
        }
        Ok(())
    }

    /// Compact description kept inside memory records.
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            source: self.source,
            capabilities: self.actions.iter().map(|a| a.capability.clone()).collect(),
            confidence: self.confidence,
            rationale: truncate(&self.rationale, 200),
        }
    }
}

/// What a step did, as stored in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub source: PlanSource,
    pub capabilities: Vec<String>,
    pub confidence: f32,
    #[serde(default)]
    pub rationale: String,
}

impl PlanSummary {
    /// Summary for a step that never produced a plan.
    pub fn aborted(source: PlanSource, reason: impl Into<String>) -> Self {
        Self {
            source,
            capabilities: Vec::new(),
            confidence: 0.0,
            rationale: truncate(&reason.into(), 200),
        }
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.capabilities.is_empty() {
            write!(f, "[{}] no actions", self.source)?;
        } else {
            write!(f, "[{}] {}", self.source, self.capabilities.join(" -> "))?;
        }
        if !self.rationale.is_empty() {
            write!(f, " ({})", self.rationale)?;
        }
        Ok(())
    }
}

pub(crate) fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
