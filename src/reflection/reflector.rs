//! Post-step reflection: classify, remember, and watch for loops.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::actions::{ActionPlan, PlanSummary};
use crate::events::{EventBus, EventType};
use crate::memory::{Fingerprint, MemoryRecord, MemoryStore, Outcome};
use crate::scheduler::ExecutionReport;

use super::guard::{LoopGuard, LoopSignal};

/// Result of reflecting on one step.
#[derive(Debug, Clone)]
pub struct Reflection {
    pub record: MemoryRecord,
    pub loop_signal: Option<LoopSignal>,
}

impl Reflection {
    pub fn outcome(&self) -> Outcome {
        self.record.outcome
    }
}

/// Writes one memory record per step and feeds the loop guard.
pub struct Reflector {
    memory: Arc<MemoryStore>,
    guard: LoopGuard,
    events: Arc<EventBus>,
}

impl Reflector {
    pub fn new(memory: Arc<MemoryStore>, guard: LoopGuard, events: Arc<EventBus>) -> Self {
        Self {
            memory,
            guard,
            events,
        }
    }

    /// Reflect on an executed plan.
    pub fn reflect(
        &mut self,
        step: u32,
        plan: &ActionPlan,
        report: &ExecutionReport,
        fingerprint: Fingerprint,
    ) -> Reflection {
        let error = match report.outcome() {
            Outcome::Success => None,
            _ => report.first_error(),
        };
        self.record(step, plan.summary(), report.outcome(), fingerprint, error)
    }

    /// Record a step with an explicit outcome, e.g. one aborted before
    /// anything was dispatched.
    pub fn record(
        &mut self,
        step: u32,
        summary: PlanSummary,
        outcome: Outcome,
        fingerprint: Fingerprint,
        error: Option<&str>,
    ) -> Reflection {
        let record = match self
            .memory
            .record(fingerprint.clone(), summary.clone(), outcome)
        {
            Ok(record) => record,
            Err(err) => {
                // Kept in memory by the store; only durability is lost
                tracing::warn!("Failed to persist memory record: {}", err);
                MemoryRecord {
                    situation_fingerprint: fingerprint.clone(),
                    action_taken: summary,
                    outcome,
                    timestamp: Utc::now(),
                }
            }
        };

        let loop_signal = self.guard.observe(&fingerprint, outcome);
        if let Some(signal) = &loop_signal {
            tracing::warn!("Loop guard fired at step {}: {}", step, signal);
        }

        self.events.emit(
            EventType::Reflection,
            json!({
                "step": step,
                "outcome": outcome.as_str(),
                "plan": record.action_taken.to_string(),
                "error": error,
                "loop_signal": loop_signal,
            }),
        );

        Reflection {
            record,
            loop_signal,
        }
    }

    pub fn guard(&self) -> &LoopGuard {
        &self.guard
    }
}
