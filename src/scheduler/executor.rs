//! Dependency-aware action dispatch with safety checkpoints.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::actions::{validate_params, Action, ActionPlan, RiskLevel};
use crate::config::{AutonomyLevel, PilotConfig};
use crate::device::{duration_ms, AdbError, DeviceTransport, TransportResponse};
use crate::error::PilotError;
use crate::events::{EventBus, EventType};
use crate::memory::Outcome;

use super::approval::{ApprovalGate, ApprovalRequest, CheckpointReason};
use super::graph::DependencyGraph;

/// Final state of one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Succeeded,
    Failed,
    /// A dependency did not succeed; never dispatched.
    SkippedDependency,
    CheckpointDenied,
    CheckpointTimeout,
    /// Mission aborted before the action's wave started.
    Cancelled,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::SkippedDependency => "skipped_dependency",
            Self::CheckpointDenied => "checkpoint_denied",
            Self::CheckpointTimeout => "checkpoint_timeout",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// What happened to one action of the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    pub action: Action,
    pub status: ActionStatus,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// The device was unreachable even after the retry.
    #[serde(default)]
    pub transport_error: bool,
}

impl ActionReport {
    fn new(action: Action, status: ActionStatus) -> Self {
        Self {
            action,
            status,
            data: None,
            error: None,
            duration: Duration::ZERO,
            transport_error: false,
        }
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    fn skipped(action: Action, dependency: &str) -> Self {
        Self::new(action, ActionStatus::SkippedDependency)
            .with_error(format!("Dependency {} did not succeed", dependency))
    }

    pub fn success(&self) -> bool {
        self.status.is_success()
    }
}

/// Per-action results in plan order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub entries: Vec<ActionReport>,
    /// The abort flag stopped dispatch before the plan finished.
    #[serde(default)]
    pub cancelled: bool,
}

impl ExecutionReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.success()).count()
    }

    pub fn get(&self, id: &str) -> Option<&ActionReport> {
        self.entries.iter().find(|e| e.action.id == id)
    }

    /// Success if every action succeeded, failure if none did, partial otherwise.
    ///
    /// An empty report is a failure: nothing was done.
    pub fn outcome(&self) -> Outcome {
        let succeeded = self.succeeded();
        if succeeded == 0 {
            Outcome::Failure
        } else if succeeded == self.entries.len() {
            Outcome::Success
        } else {
            Outcome::Partial
        }
    }

    /// Every dispatched action failed because the device was unreachable.
    pub fn all_transport_failures(&self) -> bool {
        let mut dispatched = self
            .entries
            .iter()
            .filter(|e| matches!(e.status, ActionStatus::Succeeded | ActionStatus::Failed))
            .peekable();
        dispatched.peek().is_some() && dispatched.all(|e| e.transport_error)
    }

    /// First error message, in plan order.
    pub fn first_error(&self) -> Option<&str> {
        self.entries.iter().find_map(|e| e.error.as_deref())
    }
}

/// Everything a spawned action task needs.
struct Dispatcher {
    transport: Arc<dyn DeviceTransport>,
    gate: Arc<dyn ApprovalGate>,
    events: Arc<EventBus>,
    autonomy: AutonomyLevel,
    device_timeout: Duration,
    checkpoint_timeout: Duration,
    retry_backoff: Duration,
}

impl Dispatcher {
    fn checkpoint_reason(&self, action: &Action, forced: bool) -> Option<CheckpointReason> {
        match self.autonomy {
            AutonomyLevel::Manual => Some(CheckpointReason::Manual),
            AutonomyLevel::Assisted if action.risk_level == RiskLevel::High => {
                Some(CheckpointReason::HighRisk)
            }
            AutonomyLevel::Assisted if forced => Some(CheckpointReason::LowConfidence),
            AutonomyLevel::Assisted => None,
            AutonomyLevel::Full => {
                if forced {
                    self.events.emit(
                        EventType::Action,
                        json!({
                            "id": action.id,
                            "capability": action.capability,
                            "status": "checkpoint_auto_approved",
                            "reason": CheckpointReason::LowConfidence,
                        }),
                    );
                }
                None
            }
        }
    }

    async fn run(&self, action: Action, plan_confidence: f32, forced: bool) -> ActionReport {
        let start = Instant::now();
        let mut report = self.run_inner(action, plan_confidence, forced).await;
        report.duration = start.elapsed();

        self.events.emit(
            EventType::Action,
            json!({
                "id": report.action.id,
                "capability": report.action.capability,
                "status": report.status.as_str(),
                "error": report.error,
                "duration_ms": report.duration.as_millis() as u64,
            }),
        );
        report
    }

    async fn run_inner(&self, action: Action, plan_confidence: f32, forced: bool) -> ActionReport {
        if let Some(reason) = self.checkpoint_reason(&action, forced) {
            tracing::info!("Checkpoint ({}) for {} {}", reason, action.id, action.capability);
            self.events.emit(
                EventType::Action,
                json!({
                    "id": action.id,
                    "capability": action.capability,
                    "status": "awaiting_approval",
                    "reason": reason,
                }),
            );
            let request = ApprovalRequest {
                action: action.clone(),
                reason,
                plan_confidence,
            };
            match tokio::time::timeout(self.checkpoint_timeout, self.gate.approve(&request)).await {
                Ok(true) => {}
                Ok(false) => {
                    let error = PilotError::CheckpointDenied(action.id.clone()).to_string();
                    return ActionReport::new(action, ActionStatus::CheckpointDenied).with_error(error);
                }
                Err(_) => {
                    tracing::warn!("No approval for {} within {:?}", action.id, self.checkpoint_timeout);
                    let error = PilotError::CheckpointTimeout(action.id.clone()).to_string();
                    return ActionReport::new(action, ActionStatus::CheckpointTimeout).with_error(error);
                }
            }
        }

        if let Err(msg) = validate_params(&action) {
            return ActionReport::new(action, ActionStatus::Failed).with_error(msg);
        }

        match self.send_with_retry(&action).await {
            Ok(response) if response.success => {
                let mut report = ActionReport::new(action, ActionStatus::Succeeded);
                report.data = response.data;
                report
            }
            Ok(response) => {
                let error = response
                    .error
                    .unwrap_or_else(|| format!("{} failed", action.capability));
                ActionReport::new(action, ActionStatus::Failed).with_error(error)
            }
            Err(err) => {
                let mut report = ActionReport::new(action, ActionStatus::Failed)
                    .with_error(PilotError::from(err).to_string());
                report.transport_error = true;
                report
            }
        }
    }

    async fn send_with_retry(&self, action: &Action) -> Result<TransportResponse, AdbError> {
        match self.send_once(action).await {
            Err(err) => {
                tracing::warn!(
                    "{} {} unreachable ({}), retrying in {:?}",
                    action.id,
                    action.capability,
                    err,
                    self.retry_backoff
                );
                tokio::time::sleep(self.retry_backoff).await;
                self.send_once(action).await
            }
            ok => ok,
        }
    }

    async fn send_once(&self, action: &Action) -> Result<TransportResponse, AdbError> {
        match tokio::time::timeout(
            self.device_timeout,
            self.transport.send(&action.capability, &action.params),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AdbError::Timeout(self.device_timeout.as_secs())),
        }
    }
}

/// Orders and dispatches a plan's actions.
///
/// Actions run in waves: every action whose dependencies all succeeded is
/// dispatched together, bounded by `max_concurrency`. Dependents of an action
/// that did not succeed are skipped transitively. With parallel dispatch off,
/// actions run one at a time in stable topological order.
pub struct ActionScheduler {
    dispatcher: Arc<Dispatcher>,
    parallel: bool,
    max_concurrency: usize,
    abort: Arc<AtomicBool>,
}

impl ActionScheduler {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        gate: Arc<dyn ApprovalGate>,
        events: Arc<EventBus>,
        config: &PilotConfig,
    ) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher {
                transport,
                gate,
                events,
                autonomy: config.autonomy_level,
                device_timeout: config.device_timeout,
                checkpoint_timeout: config.checkpoint_timeout,
                retry_backoff: config.retry_backoff,
            }),
            parallel: config.parallel_actions,
            max_concurrency: config.max_concurrency.max(1),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an abort flag, checked between waves.
    pub fn with_abort_flag(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = abort;
        self
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Execute a plan. Only an invalid dependency graph is an `Err`; every
    /// per-action failure is reported in the returned report.
    pub async fn execute(&self, plan: &ActionPlan) -> Result<ExecutionReport, PilotError> {
        let graph = DependencyGraph::build(plan)?;
        let order = graph.topological_order();
        let mut slots: Vec<Option<ActionReport>> = vec![None; plan.len()];
        let mut cancelled = false;

        if self.parallel {
            cancelled = self.run_waves(plan, &graph, &order, &mut slots).await;
        } else {
            for &i in &order {
                if self.aborted() {
                    cancelled = true;
                    break;
                }
                if let Some(dep) = failed_dependency(plan, &graph, &slots, i) {
                    slots[i] = Some(ActionReport::skipped(plan.actions[i].clone(), &dep));
                    continue;
                }
                let report = self
                    .dispatcher
                    .run(plan.actions[i].clone(), plan.confidence, plan.force_checkpoint)
                    .await;
                slots[i] = Some(report);
            }
        }

        let entries: Vec<ActionReport> = slots
            .into_iter()
            .zip(plan.actions.iter())
            .map(|(slot, action)| {
                slot.unwrap_or_else(|| {
                    ActionReport::new(action.clone(), ActionStatus::Cancelled)
                        .with_error("Mission aborted")
                })
            })
            .collect();

        let report = ExecutionReport { entries, cancelled };
        tracing::info!(
            "Executed plan: {}/{} succeeded{}",
            report.succeeded(),
            report.entries.len(),
            if cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    /// Returns whether dispatch stopped on the abort flag.
    async fn run_waves(
        &self,
        plan: &ActionPlan,
        graph: &DependencyGraph,
        order: &[usize],
        slots: &mut [Option<ActionReport>],
    ) -> bool {
        loop {
            // Topological order lets skips cascade in one pass
            for &i in order {
                if slots[i].is_none() {
                    if let Some(dep) = failed_dependency(plan, graph, slots, i) {
                        slots[i] = Some(ActionReport::skipped(plan.actions[i].clone(), &dep));
                    }
                }
            }

            let ready: Vec<usize> = order
                .iter()
                .copied()
                .filter(|&i| {
                    slots[i].is_none()
                        && graph
                            .dependencies(i)
                            .iter()
                            .all(|&d| slots[d].as_ref().is_some_and(|r| r.success()))
                })
                .collect();
            if ready.is_empty() {
                return false;
            }
            if self.aborted() {
                tracing::warn!("Abort requested; {} action(s) not dispatched", ready.len());
                return true;
            }

            let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
            let mut join_set = JoinSet::new();
            for &i in &ready {
                let dispatcher = self.dispatcher.clone();
                let semaphore = semaphore.clone();
                let action = plan.actions[i].clone();
                let confidence = plan.confidence;
                let forced = plan.force_checkpoint;
                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    (i, dispatcher.run(action, confidence, forced).await)
                });
            }
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((i, report)) => slots[i] = Some(report),
                    Err(err) => tracing::error!("Action task failed: {}", err),
                }
            }
            for &i in &ready {
                if slots[i].is_none() {
                    slots[i] = Some(
                        ActionReport::new(plan.actions[i].clone(), ActionStatus::Failed)
                            .with_error("Action task panicked"),
                    );
                }
            }
        }
    }
}

/// The id of a finished dependency of `index` that did not succeed.
fn failed_dependency(
    plan: &ActionPlan,
    graph: &DependencyGraph,
    slots: &[Option<ActionReport>],
    index: usize,
) -> Option<String> {
    graph
        .dependencies(index)
        .iter()
        .find(|&&d| slots[d].as_ref().is_some_and(|r| !r.success()))
        .map(|&d| plan.actions[d].id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::PlanSource;
    use crate::device::Observation;
    use crate::scheduler::{AutoApprove, DenyAll};
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeDevice {
        calls: Mutex<Vec<String>>,
        failing: Vec<&'static str>,
        unreachable: bool,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl DeviceTransport for FakeDevice {
        async fn send(
            &self,
            capability: &str,
            _params: &Map<String, Value>,
        ) -> Result<TransportResponse, AdbError> {
            self.calls.lock().unwrap().push(capability.to_string());
            if self.unreachable {
                return Err(AdbError::Connection("device offline".into()));
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.failing.contains(&capability) {
                Ok(TransportResponse::failed("element not found"))
            } else {
                Ok(TransportResponse::ok(json!({})))
            }
        }

        async fn capture_observation(&self) -> Result<Observation, AdbError> {
            Ok(Observation::empty())
        }
    }

    impl FakeDevice {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct CountingGate {
        asked: AtomicUsize,
        answer: bool,
    }

    #[async_trait]
    impl ApprovalGate for CountingGate {
        async fn approve(&self, _request: &ApprovalRequest) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    struct SilentGate;

    #[async_trait]
    impl ApprovalGate for SilentGate {
        async fn approve(&self, _request: &ApprovalRequest) -> bool {
            std::future::pending::<bool>().await
        }
    }

    fn config() -> PilotConfig {
        PilotConfig::default()
            .with_retry_backoff(Duration::from_millis(1))
            .with_checkpoint_timeout(Duration::from_millis(50))
    }

    fn scheduler(
        device: Arc<FakeDevice>,
        gate: Arc<dyn ApprovalGate>,
        config: &PilotConfig,
    ) -> ActionScheduler {
        ActionScheduler::new(device, gate, Arc::new(EventBus::default()), config)
    }

    fn tap(id: &str) -> Action {
        Action::new(id, "tap").with_param("x", 10).with_param("y", 20)
    }

    fn plan(actions: Vec<Action>) -> ActionPlan {
        ActionPlan::new(PlanSource::Model, actions, 0.9)
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_but_not_siblings() {
        let device = Arc::new(FakeDevice {
            failing: vec!["back"],
            ..Default::default()
        });
        let scheduler = scheduler(device.clone(), Arc::new(AutoApprove), &config());
        let report = scheduler
            .execute(&plan(vec![
                Action::new("a1", "back"),
                tap("a2").depends_on("a1"),
                Action::new("a3", "home").depends_on("a2"),
                Action::new("a4", "wait").with_param("seconds", 0),
            ]))
            .await
            .unwrap();

        assert_eq!(report.get("a1").unwrap().status, ActionStatus::Failed);
        assert_eq!(report.get("a2").unwrap().status, ActionStatus::SkippedDependency);
        assert_eq!(report.get("a3").unwrap().status, ActionStatus::SkippedDependency);
        assert_eq!(report.get("a4").unwrap().status, ActionStatus::Succeeded);
        assert_eq!(report.outcome(), Outcome::Partial);
        assert!(!device.calls().contains(&"tap".to_string()));
    }

    #[tokio::test]
    async fn test_cyclic_plan_never_dispatches() {
        let device = Arc::new(FakeDevice::default());
        let scheduler = scheduler(device.clone(), Arc::new(AutoApprove), &config());
        let result = scheduler
            .execute(&plan(vec![tap("a1").depends_on("a2"), tap("a2").depends_on("a1")]))
            .await;
        assert!(matches!(result, Err(PilotError::Planning(_))));
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn test_manual_autonomy_gates_low_risk() {
        let device = Arc::new(FakeDevice::default());
        let gate = Arc::new(CountingGate {
            asked: AtomicUsize::new(0),
            answer: true,
        });
        let config = config().with_autonomy(AutonomyLevel::Manual);
        let report = scheduler(device.clone(), gate.clone(), &config)
            .execute(&plan(vec![tap("a1")]))
            .await
            .unwrap();
        assert_eq!(gate.asked.load(Ordering::SeqCst), 1);
        assert_eq!(report.outcome(), Outcome::Success);
    }

    #[tokio::test]
    async fn test_denied_checkpoint_is_not_dispatched() {
        let device = Arc::new(FakeDevice::default());
        let config = config().with_autonomy(AutonomyLevel::Manual);
        let report = scheduler(device.clone(), Arc::new(DenyAll), &config)
            .execute(&plan(vec![tap("a1"), tap("a2").depends_on("a1")]))
            .await
            .unwrap();
        assert_eq!(report.entries[0].status, ActionStatus::CheckpointDenied);
        assert_eq!(report.entries[1].status, ActionStatus::SkippedDependency);
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn test_assisted_gates_only_high_risk() {
        let device = Arc::new(FakeDevice::default());
        let gate = Arc::new(CountingGate {
            asked: AtomicUsize::new(0),
            answer: true,
        });
        let config = config().with_autonomy(AutonomyLevel::Assisted);
        scheduler(device.clone(), gate.clone(), &config)
            .execute(&plan(vec![
                tap("a1"),
                Action::new("a2", "get_secret").with_param("service", "mail"),
            ]))
            .await
            .unwrap();
        assert_eq!(gate.asked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forced_checkpoint_under_assisted_gates_everything() {
        let device = Arc::new(FakeDevice::default());
        let gate = Arc::new(CountingGate {
            asked: AtomicUsize::new(0),
            answer: true,
        });
        let config = config().with_autonomy(AutonomyLevel::Assisted);
        let mut low_confidence = plan(vec![tap("a1"), tap("a2")]);
        low_confidence.force_checkpoint = true;
        scheduler(device, gate.clone(), &config)
            .execute(&low_confidence)
            .await
            .unwrap();
        assert_eq!(gate.asked.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_full_autonomy_never_asks() {
        let device = Arc::new(FakeDevice::default());
        let mut forced = plan(vec![Action::new("a1", "get_secret").with_param("service", "mail")]);
        forced.force_checkpoint = true;
        let report = scheduler(device.clone(), Arc::new(DenyAll), &config())
            .execute(&forced)
            .await
            .unwrap();
        assert_eq!(report.entries[0].status, ActionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_checkpoint_timeout() {
        let device = Arc::new(FakeDevice::default());
        let config = config().with_autonomy(AutonomyLevel::Manual);
        let report = scheduler(device.clone(), Arc::new(SilentGate), &config)
            .execute(&plan(vec![tap("a1")]))
            .await
            .unwrap();
        assert_eq!(report.entries[0].status, ActionStatus::CheckpointTimeout);
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_device_retried_once() {
        let device = Arc::new(FakeDevice {
            unreachable: true,
            ..Default::default()
        });
        let report = scheduler(device.clone(), Arc::new(AutoApprove), &config())
            .execute(&plan(vec![tap("a1")]))
            .await
            .unwrap();
        assert_eq!(device.calls().len(), 2);
        assert!(report.entries[0].transport_error);
        assert!(report.all_transport_failures());
    }

    #[tokio::test]
    async fn test_invalid_params_fail_without_dispatch() {
        let device = Arc::new(FakeDevice::default());
        let report = scheduler(device.clone(), Arc::new(AutoApprove), &config())
            .execute(&plan(vec![Action::new("a1", "tap"), Action::new("a2", "back")]))
            .await
            .unwrap();
        assert_eq!(report.entries[0].status, ActionStatus::Failed);
        assert_eq!(device.calls(), vec!["back".to_string()]);
        assert!(!report.all_transport_failures());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let device = Arc::new(FakeDevice {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let config = config().with_max_concurrency(2);
        let actions = (1..=6).map(|i| tap(&format!("a{}", i))).collect();
        let report = scheduler(device.clone(), Arc::new(AutoApprove), &config)
            .execute(&plan(actions))
            .await
            .unwrap();
        assert_eq!(report.outcome(), Outcome::Success);
        assert!(device.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_sequential_runs_in_plan_order() {
        let device = Arc::new(FakeDevice::default());
        let config = config().with_parallel(false);
        scheduler(device.clone(), Arc::new(AutoApprove), &config)
            .execute(&plan(vec![
                Action::new("a1", "home"),
                Action::new("a2", "back"),
                Action::new("a3", "get_ui"),
            ]))
            .await
            .unwrap();
        assert_eq!(device.calls(), vec!["home", "back", "get_ui"]);
    }

    #[tokio::test]
    async fn test_abort_flag_cancels_remaining_actions() {
        let device = Arc::new(FakeDevice::default());
        let abort = Arc::new(AtomicBool::new(true));
        let report = scheduler(device.clone(), Arc::new(AutoApprove), &config())
            .with_abort_flag(abort)
            .execute(&plan(vec![tap("a1"), tap("a2").depends_on("a1")]))
            .await
            .unwrap();
        assert!(report.cancelled);
        assert!(report.entries.iter().all(|e| e.status == ActionStatus::Cancelled));
        assert!(device.calls().is_empty());
    }
}
