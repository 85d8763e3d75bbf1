//! Dependency ordering over randomly generated plans.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};

use common::test_config;
use device_pilot::{
    Action, ActionPlan, ActionScheduler, AdbError, AutoApprove, DeviceTransport, EventBus,
    Observation, PlanSource, TransportResponse,
};

/// Logs a logical start and end tick for every dispatched action.
#[derive(Default)]
struct RecordingDevice {
    clock: AtomicUsize,
    spans: Mutex<HashMap<String, (usize, usize)>>,
}

#[async_trait]
impl DeviceTransport for RecordingDevice {
    async fn send(
        &self,
        _capability: &str,
        params: &Map<String, Value>,
    ) -> Result<TransportResponse, AdbError> {
        let label = params["label"].as_str().unwrap_or_default().to_string();
        let delay = params["delay_ms"].as_u64().unwrap_or(0);
        let start = self.clock.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        let end = self.clock.fetch_add(1, Ordering::SeqCst);
        self.spans.lock().unwrap().insert(label, (start, end));
        Ok(TransportResponse::ok(json!({})))
    }

    async fn capture_observation(&self) -> Result<Observation, AdbError> {
        Ok(Observation::empty())
    }
}

/// A DAG whose edges only point at earlier indices, listed in shuffled order.
fn random_plan(rng: &mut StdRng) -> ActionPlan {
    let n = rng.gen_range(1..=8);
    let mut actions: Vec<Action> = (0..n)
        .map(|i| {
            let id = format!("a{}", i + 1);
            let mut action = Action::new(id.clone(), "tap")
                .with_param("x", 10)
                .with_param("y", 20)
                .with_param("label", id)
                .with_param("delay_ms", rng.gen_range(0..4u64));
            for dep in 0..i {
                if rng.gen_bool(0.3) {
                    action = action.depends_on(format!("a{}", dep + 1));
                }
            }
            action
        })
        .collect();
    actions.shuffle(rng);
    ActionPlan::new(PlanSource::Model, actions, 0.9)
}

async fn assert_dependencies_respected(parallel: bool, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..25 {
        let plan = random_plan(&mut rng);
        let device = Arc::new(RecordingDevice::default());
        let config = test_config().with_parallel(parallel).with_max_concurrency(3);
        let scheduler = ActionScheduler::new(
            device.clone(),
            Arc::new(AutoApprove),
            Arc::new(EventBus::default()),
            &config,
        );

        let report = scheduler.execute(&plan).await.unwrap();
        assert_eq!(report.succeeded(), plan.len());

        let spans = device.spans.lock().unwrap();
        for action in &plan.actions {
            let (start, _) = spans[&action.id];
            for dep in &action.depends_on {
                let (_, dep_end) = spans[dep];
                assert!(
                    dep_end < start,
                    "{} started at {} before its dependency {} ended at {}",
                    action.id,
                    start,
                    dep,
                    dep_end
                );
            }
        }
    }
}

#[tokio::test]
async fn test_parallel_mode_waits_for_dependencies() {
    assert_dependencies_respected(true, 7).await;
}

#[tokio::test]
async fn test_sequential_mode_waits_for_dependencies() {
    assert_dependencies_respected(false, 11).await;
}
