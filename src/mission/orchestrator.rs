//! The mission loop: observe, resolve or plan, execute, reflect, decide.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::actions::{ActionPlan, PlanSource, PlanSummary};
use crate::config::{ConfigOverrides, PilotConfig};
use crate::device::{AdbError, DeviceTransport, Observation};
use crate::error::PilotError;
use crate::events::{EventBus, EventType};
use crate::memory::{Fingerprint, Fingerprinter, HashFingerprinter, MemoryStore, Outcome};
use crate::model::ReasoningBackend;
use crate::planner::ReasoningPlanner;
use crate::reflection::{LoopGuard, Reflection, Reflector};
use crate::scheduler::{ActionScheduler, ApprovalGate, DenyAll, ExecutionReport};
use crate::skills::{Resolution, SkillRegistry};

use super::history::StepRecord;
use super::state::{Mission, MissionStatus, MissionStore};
use super::termination::{DeclaredComplete, TerminationContext, TerminationPredicate};

/// Cancels the running mission between steps.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        tracing::info!("Mission abort requested");
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// How a step ended, from the loop's point of view.
enum StepEnd {
    Continue,
    Succeeded,
    Fatal(PilotError),
}

/// Drives missions from goal to terminal status.
pub struct Orchestrator {
    config: PilotConfig,
    transport: Arc<dyn DeviceTransport>,
    backend: Arc<dyn ReasoningBackend>,
    events: Arc<EventBus>,
    registry: SkillRegistry,
    gate: Arc<dyn ApprovalGate>,
    memory: Arc<MemoryStore>,
    fingerprinter: Arc<dyn Fingerprinter>,
    predicate: Arc<dyn TerminationPredicate>,
    missions: Option<MissionStore>,
    system_prompt: Option<String>,
    abort: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Orchestrator with durable memory and mission state under
    /// `config.state_dir`. Invalid configuration or unusable storage is fatal.
    pub fn new(
        config: PilotConfig,
        transport: Arc<dyn DeviceTransport>,
        backend: Arc<dyn ReasoningBackend>,
        events: Arc<EventBus>,
    ) -> Result<Self, PilotError> {
        config.validate()?;
        let memory = MemoryStore::open(
            config.memory_path(),
            config.memory_capacity,
            config.eviction_policy,
        )
        .map_err(|e| PilotError::Fatal(format!("Memory store unavailable: {}", e)))?;
        let missions = MissionStore::open(config.missions_dir())
            .map_err(|e| PilotError::Fatal(format!("Mission store unavailable: {}", e)))?;

        Ok(Self::in_memory(config, transport, backend, events)
            .with_memory(Arc::new(memory))
            .with_mission_store(missions))
    }

    /// Orchestrator that keeps nothing on disk.
    pub fn in_memory(
        config: PilotConfig,
        transport: Arc<dyn DeviceTransport>,
        backend: Arc<dyn ReasoningBackend>,
        events: Arc<EventBus>,
    ) -> Self {
        let memory = MemoryStore::in_memory(config.memory_capacity, config.eviction_policy);
        Self {
            registry: SkillRegistry::with_defaults(&config),
            config,
            transport,
            backend,
            events,
            gate: Arc::new(DenyAll),
            memory: Arc::new(memory),
            fingerprinter: Arc::new(HashFingerprinter),
            predicate: Arc::new(DeclaredComplete),
            missions: None,
            system_prompt: None,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_registry(mut self, registry: SkillRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Set the approval gate for safety checkpoints. Defaults to denying.
    pub fn with_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_predicate(mut self, predicate: impl TerminationPredicate + 'static) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    pub fn with_memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    pub fn with_mission_store(mut self, store: MissionStore) -> Self {
        self.missions = Some(store);
        self
    }

    /// Replace the reasoning system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn config(&self) -> &PilotConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn mission_store(&self) -> Option<&MissionStore> {
        self.missions.as_ref()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            flag: self.abort.clone(),
        }
    }

    /// Accept a goal: validate the effective configuration and persist a
    /// CREATED mission.
    pub fn start(&self, goal: &str, overrides: ConfigOverrides) -> Result<Mission, PilotError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(PilotError::Fatal("Goal must not be empty".into()));
        }
        let config = self.config.apply(&overrides);
        config.validate()?;

        let mission =
            Mission::new(goal, config.max_steps, config.history_depth).with_overrides(overrides);
        if let Some(store) = &self.missions {
            store
                .save(&mission)
                .map_err(|e| PilotError::Fatal(format!("Cannot persist mission: {}", e)))?;
        }
        tracing::info!("Mission {} created: {}", mission.id, mission.goal);
        Ok(mission)
    }

    /// Start a mission and run it to a terminal status.
    pub async fn run(&self, goal: &str, overrides: ConfigOverrides) -> Result<Mission, PilotError> {
        let mission = self.start(goal, overrides)?;
        self.execute(mission).await
    }

    /// Reload a persisted mission and continue it if it has not terminated.
    pub async fn resume(&self, id: &str) -> Result<Mission, PilotError> {
        let store = self
            .missions
            .as_ref()
            .ok_or_else(|| PilotError::Storage("No mission store configured".into()))?;
        let mission = store.load(id)?;
        if mission.is_terminal() {
            tracing::info!("Mission {} already {}", mission.id, mission.status);
            return Ok(mission);
        }
        tracing::info!("Resuming mission {} at step {}", mission.id, mission.step_count + 1);
        self.execute(mission).await
    }

    /// Run a CREATED or RUNNING mission until it terminates.
    pub async fn execute(&self, mut mission: Mission) -> Result<Mission, PilotError> {
        if mission.is_terminal() {
            return Ok(mission);
        }
        let config = self.config.apply(&mission.overrides);
        config.validate()?;

        if mission.status == MissionStatus::Created {
            mission.transition(MissionStatus::Running)?;
        }
        self.abort.store(false, Ordering::SeqCst);
        self.persist(&mission);
        self.events.emit(
            EventType::Mission,
            json!({
                "id": mission.id,
                "goal": mission.goal,
                "status": mission.status,
                "step_count": mission.step_count,
                "max_steps": mission.max_steps,
            }),
        );

        let guard = match mission.loop_guard.clone() {
            Some(previous) => LoopGuard::resumed(previous, &config),
            None => LoopGuard::from_config(&config),
        };
        let mut run = MissionRun::new(self, config, guard);
        let status = loop {
            if self.abort.load(Ordering::SeqCst) {
                break MissionStatus::Aborted;
            }
            if mission.step_count >= mission.max_steps {
                mission.last_error = Some(format!(
                    "Goal not reached within {} steps",
                    mission.max_steps
                ));
                break MissionStatus::Failed;
            }

            let step = mission.step_count + 1;
            let emergency = std::mem::take(&mut mission.pending_loop_signal);
            let end = run.step(&mut mission, step, emergency).await;
            mission.step_count = step;
            mission.loop_guard = Some(run.reflector.guard().clone());
            mission.touch();

            match end {
                StepEnd::Succeeded => break MissionStatus::Succeeded,
                StepEnd::Fatal(err) => {
                    tracing::error!("Fatal error at step {}: {}", step, err);
                    mission.last_error = Some(err.to_string());
                    break MissionStatus::Failed;
                }
                StepEnd::Continue => {}
            }

            if mission.transport_failures >= run.config.transport_failure_limit {
                mission.last_error = Some(format!(
                    "{} consecutive transport failures: {}",
                    mission.transport_failures,
                    mission.last_error.as_deref().unwrap_or("device unreachable")
                ));
                break MissionStatus::Failed;
            }
            self.persist(&mission);
        };

        mission.transition(status)?;
        mission.summary = Some(summarize(&mission));
        self.persist(&mission);

        tracing::info!(
            "Mission {} {} after {} step(s)",
            mission.id,
            mission.status,
            mission.step_count
        );
        self.events.emit(
            EventType::Mission,
            json!({
                "id": mission.id,
                "goal": mission.goal,
                "status": mission.status,
                "step_count": mission.step_count,
                "error": mission.last_error,
                "summary": mission.summary,
            }),
        );
        Ok(mission)
    }

    fn persist(&self, mission: &Mission) {
        if let Some(store) = &self.missions {
            if let Err(err) = store.save(mission) {
                tracing::warn!("Failed to persist mission {}: {}", mission.id, err);
            }
        }
    }
}

/// Terminal summary built from the last step, without a model call.
fn summarize(mission: &Mission) -> String {
    let mut summary = format!(
        "{} after {} step(s) toward \"{}\"",
        mission.status, mission.step_count, mission.goal
    );
    if let Some(last) = mission.history.latest() {
        let actions: Vec<&str> = last.actions.iter().map(|a| a.capability.as_str()).collect();
        summary.push_str(&format!(
            ". Last step {}: {} -> {}",
            last.step,
            if actions.is_empty() {
                "no actions".to_string()
            } else {
                actions.join(", ")
            },
            last.outcome.as_str()
        ));
    }
    if let Some(err) = &mission.last_error {
        if mission.status != MissionStatus::Succeeded {
            summary.push_str(&format!(". {}", err));
        }
    }
    summary
}

/// Components configured for one mission.
struct MissionRun<'o> {
    orchestrator: &'o Orchestrator,
    config: PilotConfig,
    registry: SkillRegistry,
    planner: ReasoningPlanner,
    scheduler: ActionScheduler,
    reflector: Reflector,
    /// Screen left behind by the previous step.
    observation: Option<Observation>,
}

impl<'o> MissionRun<'o> {
    fn new(orchestrator: &'o Orchestrator, config: PilotConfig, guard: LoopGuard) -> Self {
        let o = orchestrator;
        let registry = o
            .registry
            .clone()
            .with_thresholds(config.confidence_threshold, config.suggestion_threshold);
        let mut planner = ReasoningPlanner::new(o.backend.clone(), o.events.clone(), &config);
        if let Some(prompt) = &o.system_prompt {
            planner = planner.with_system_prompt(prompt.clone());
        }
        let scheduler =
            ActionScheduler::new(o.transport.clone(), o.gate.clone(), o.events.clone(), &config)
                .with_abort_flag(o.abort.clone());
        let reflector = Reflector::new(o.memory.clone(), guard, o.events.clone());
        Self {
            orchestrator,
            config,
            registry,
            planner,
            scheduler,
            reflector,
            observation: None,
        }
    }

    async fn step(&mut self, mission: &mut Mission, step: u32, emergency: bool) -> StepEnd {
        let o = self.orchestrator;
        tracing::info!(
            "Step {}/{}{}",
            step,
            mission.max_steps,
            if emergency { " (emergency)" } else { "" }
        );

        let observation = match self.observation.take() {
            Some(observation) => observation,
            None => match self.capture(step).await {
                Ok(observation) => observation,
                Err(err) => {
                    let fingerprint = o.fingerprinter.fingerprint(&mission.goal, &Observation::empty());
                    self.fail_step(
                        mission,
                        step,
                        &Observation::empty(),
                        fingerprint,
                        PlanSource::Model,
                        None,
                        &PilotError::from(err),
                    );
                    return StepEnd::Continue;
                }
            },
        };
        let fingerprint = o.fingerprinter.fingerprint(&mission.goal, &observation);

        let resolution = self
            .registry
            .resolve(&mission.goal, &observation, &mission.history, emergency);
        let mut plan = match resolution {
            Resolution::Override {
                skill,
                priority,
                plan,
            } => {
                o.events.emit(
                    EventType::Skill,
                    json!({
                        "step": step,
                        "skill": skill,
                        "priority": priority.to_string(),
                        "confidence": plan.confidence,
                        "actions": plan.actions.iter().map(|a| a.capability.as_str()).collect::<Vec<_>>(),
                        "rationale": plan.rationale,
                    }),
                );
                plan
            }
            Resolution::Defer { hint } => {
                o.events.emit(
                    EventType::Skill,
                    json!({ "step": step, "override": false, "hint": hint }),
                );
                let memory_hits = o.memory.retrieve(&fingerprint, self.config.memory_top_k);
                let planned = self
                    .planner
                    .plan(
                        &mission.goal,
                        &observation,
                        &mission.history,
                        &memory_hits,
                        hint.as_ref(),
                    )
                    .await;
                match planned {
                    Ok(plan) => plan,
                    Err(err) if err.is_fatal() => return StepEnd::Fatal(err),
                    Err(err) => {
                        self.fail_step(
                            mission,
                            step,
                            &observation,
                            fingerprint,
                            PlanSource::Model,
                            None,
                            &err,
                        );
                        self.observation = Some(observation);
                        return StepEnd::Continue;
                    }
                }
            }
        };
        plan.force_checkpoint = plan.confidence < self.config.confidence_threshold;

        let report = if plan.is_empty() {
            ExecutionReport::default()
        } else {
            let executed = self.scheduler.execute(&plan).await;
            match executed {
                Ok(report) => report,
                Err(err) => {
                    self.fail_step(mission, step, &observation, fingerprint, plan.source, Some(&plan), &err);
                    self.observation = Some(observation);
                    return StepEnd::Continue;
                }
            }
        };

        let reflection = self.reflector.reflect(step, &plan, &report, fingerprint);
        mission.pending_loop_signal = reflection.loop_signal.is_some();
        mission.last_error = step_error(&report).map(str::to_string);
        mission.history.push(step_record(step, &observation, &plan, &report, &reflection));

        // At most one transport failure per step, however many calls failed.
        let mut transport_failed = report.all_transport_failures();
        let end = if report.cancelled {
            StepEnd::Continue
        } else {
            // Nothing was dispatched for an empty plan, so the screen is unchanged.
            let next = if plan.is_empty() {
                Ok(observation)
            } else {
                self.capture(step + 1).await
            };
            match next {
                Ok(next) => {
                    let met = o.predicate.is_met(&TerminationContext {
                        goal: &mission.goal,
                        observation: &next,
                        history: &mission.history,
                        plan: Some(&plan),
                    });
                    if met {
                        StepEnd::Succeeded
                    } else {
                        if plan.is_empty() {
                            let message = PilotError::Planning(
                                "No actions planned and the goal is not confirmed".into(),
                            )
                            .to_string();
                            tracing::warn!("Step {} failed: {}", step, message);
                            if let Some(record) = mission.history.latest_mut() {
                                record.error = Some(message.clone());
                            }
                            mission.last_error = Some(message);
                        }
                        self.observation = Some(next);
                        StepEnd::Continue
                    }
                }
                Err(err) => {
                    tracing::warn!("Post-step capture failed: {}", err);
                    transport_failed = true;
                    mission.last_error = Some(PilotError::from(err).to_string());
                    StepEnd::Continue
                }
            }
        };
        mission.transport_failures = if transport_failed {
            mission.transport_failures + 1
        } else {
            0
        };
        end
    }

    /// Capture with one retry after the backoff.
    async fn capture(&self, step: u32) -> Result<Observation, AdbError> {
        let observation = match self.capture_once().await {
            Ok(observation) => observation,
            Err(err) => {
                tracing::warn!(
                    "Observation capture failed ({}), retrying in {:?}",
                    err,
                    self.config.retry_backoff
                );
                tokio::time::sleep(self.config.retry_backoff).await;
                self.capture_once().await?
            }
        };
        self.orchestrator.events.emit(
            EventType::Observation,
            json!({
                "step": step,
                "package": observation.current_package,
                "screen_id": observation.screen_id,
                "summary": observation.summary,
                "elements": observation.elements.len(),
            }),
        );
        Ok(observation)
    }

    async fn capture_once(&self) -> Result<Observation, AdbError> {
        let timeout: Duration = self.config.device_timeout;
        match tokio::time::timeout(timeout, self.orchestrator.transport.capture_observation()).await {
            Ok(result) => result,
            Err(_) => Err(AdbError::Timeout(timeout.as_secs())),
        }
    }

    /// Record a step that ended before (or instead of) execution.
    #[allow(clippy::too_many_arguments)]
    fn fail_step(
        &mut self,
        mission: &mut Mission,
        step: u32,
        observation: &Observation,
        fingerprint: Fingerprint,
        source: PlanSource,
        plan: Option<&ActionPlan>,
        err: &PilotError,
    ) {
        let message = err.to_string();
        tracing::warn!("Step {} failed: {}", step, message);

        let mut summary = PlanSummary::aborted(source, message.clone());
        if let Some(plan) = plan {
            summary.capabilities = plan.actions.iter().map(|a| a.capability.clone()).collect();
            summary.confidence = plan.confidence;
        }
        let reflection =
            self.reflector
                .record(step, summary, Outcome::Failure, fingerprint, Some(&message));

        let mut record = StepRecord::new(step, observation, Outcome::Failure);
        record.source = Some(source);
        if let Some(plan) = plan {
            record.actions = plan.actions.clone();
            record.rationale = plan.rationale.clone();
        }
        record.error = Some(message.clone());
        record.loop_signal = reflection.loop_signal.is_some();
        mission.history.push(record);

        mission.pending_loop_signal = reflection.loop_signal.is_some();
        mission.transport_failures = if err.is_transport() {
            mission.transport_failures + 1
        } else {
            0
        };
        mission.last_error = Some(message);
    }
}

fn step_error(report: &ExecutionReport) -> Option<&str> {
    if report.outcome().is_success() {
        None
    } else {
        report.first_error()
    }
}

fn step_record(
    step: u32,
    observation: &Observation,
    plan: &ActionPlan,
    report: &ExecutionReport,
    reflection: &Reflection,
) -> StepRecord {
    let mut record = StepRecord::new(step, observation, reflection.outcome());
    record.source = Some(plan.source);
    record.actions = plan.actions.clone();
    record.rationale = plan.rationale.clone();
    record.error = step_error(report).map(str::to_string);
    record.loop_signal = reflection.loop_signal.is_some();
    record
}
