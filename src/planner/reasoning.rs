//! Model-backed planning for steps no skill overrides.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::actions::{parse_model_plan, render_catalog, ActionPlan};
use crate::config::{build_system_prompt, PilotConfig};
use crate::device::Observation;
use crate::error::PilotError;
use crate::events::{EventBus, EventType};
use crate::memory::MemoryRecord;
use crate::mission::StepHistory;
use crate::model::{ModelError, ReasoningBackend};
use crate::skills::AdvisoryHint;

use super::context::PlanningContext;

/// Turns (goal, screen, history, memory hits, hint) into a model plan.
///
/// One backend call per step; a transient failure gets exactly one retry
/// after `retry_backoff`.
pub struct ReasoningPlanner {
    backend: Arc<dyn ReasoningBackend>,
    events: Arc<EventBus>,
    system_prompt: String,
    history_limit: usize,
    timeout: Duration,
    retry_backoff: Duration,
}

impl ReasoningPlanner {
    pub fn new(backend: Arc<dyn ReasoningBackend>, events: Arc<EventBus>, config: &PilotConfig) -> Self {
        Self {
            backend,
            events,
            system_prompt: build_system_prompt(&render_catalog()),
            history_limit: config.history_depth,
            timeout: config.reasoning_timeout,
            retry_backoff: config.retry_backoff,
        }
    }

    /// Replace the system context sent with every request.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub async fn plan(
        &self,
        goal: &str,
        observation: &Observation,
        history: &StepHistory,
        memory_hits: &[MemoryRecord],
        hint: Option<&AdvisoryHint>,
    ) -> Result<ActionPlan, PilotError> {
        let user_context = PlanningContext {
            goal,
            observation,
            history,
            history_limit: self.history_limit,
            memory_hits,
            hint,
        }
        .render();

        let response = match self.call_with_retry(&user_context).await {
            Ok(value) => value,
            Err(err) => {
                let err = match PilotError::from(err) {
                    PilotError::Transport(msg) => {
                        PilotError::Transport(format!("Reasoning backend unavailable: {}", msg))
                    }
                    other => other,
                };
                self.events
                    .emit(EventType::Reasoning, json!({ "status": "error", "error": err.to_string() }));
                return Err(err);
            }
        };

        let plan = match parse_model_plan(&response) {
            Ok(plan) => plan,
            Err(msg) => {
                tracing::warn!("Rejected model plan: {}", msg);
                self.events.emit(
                    EventType::Reasoning,
                    json!({ "status": "invalid", "error": msg, "response": response }),
                );
                return Err(PilotError::Planning(format!("Invalid model plan: {}", msg)));
            }
        };

        tracing::info!(
            "Model planned {} action(s) at confidence {:.2}",
            plan.len(),
            plan.confidence
        );
        self.events.emit(
            EventType::Reasoning,
            json!({
                "status": "planned",
                "reasoning": plan.rationale,
                "confidence": plan.confidence,
                "actions": plan.actions.iter().map(|a| a.capability.as_str()).collect::<Vec<_>>(),
                "hint": hint.map(|h| h.skill.as_str()),
                "memory_hits": memory_hits.len(),
            }),
        );
        Ok(plan)
    }

    async fn call_with_retry(&self, user_context: &str) -> Result<Value, ModelError> {
        match self.call_once(user_context).await {
            Err(err) if err.is_transient() => {
                tracing::warn!(
                    "Reasoning call failed ({}), retrying in {:?}",
                    err,
                    self.retry_backoff
                );
                tokio::time::sleep(self.retry_backoff).await;
                self.call_once(user_context).await
            }
            other => other,
        }
    }

    async fn call_once(&self, user_context: &str) -> Result<Value, ModelError> {
        match tokio::time::timeout(
            self.timeout,
            self.backend.complete(&self.system_prompt, user_context),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout(self.timeout.as_secs())),
        }
    }
}
