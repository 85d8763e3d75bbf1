//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use device_pilot::scheduler::ApprovalRequest;
use device_pilot::{
    AbortHandle, AdbError, ApprovalGate, DeviceTransport, ModelError, Observation, PilotConfig,
    ReasoningBackend, TransportResponse,
};

pub const LAUNCHER: &str = "com.android.launcher";

/// Device whose foreground app follows `open_app`/`home`.
pub struct FakeDevice {
    foreground: Mutex<String>,
    sent: Mutex<Vec<(String, Map<String, Value>)>>,
    failing: Vec<String>,
    unreachable: AtomicBool,
    capture_failures: AtomicUsize,
    captures: AtomicUsize,
    captures_before_outage: AtomicUsize,
}

impl FakeDevice {
    pub fn new() -> Arc<Self> {
        Self::failing(&[])
    }

    /// Every capability listed here reports failure.
    pub fn failing(capabilities: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            foreground: Mutex::new(LAUNCHER.to_string()),
            sent: Mutex::new(Vec::new()),
            failing: capabilities.iter().map(|c| c.to_string()).collect(),
            unreachable: AtomicBool::new(false),
            capture_failures: AtomicUsize::new(0),
            captures: AtomicUsize::new(0),
            captures_before_outage: AtomicUsize::new(usize::MAX),
        })
    }

    /// The next `n` captures fail as unreachable.
    pub fn fail_captures(&self, n: usize) {
        self.capture_failures.store(n, Ordering::SeqCst);
    }

    /// Every later `send` fails as unreachable.
    pub fn drop_connection(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }

    /// Captures succeed `n` times, then always fail.
    pub fn fail_captures_after(&self, n: usize) {
        self.captures_before_outage.store(n, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn sent_params(&self, capability: &str) -> Option<Map<String, Value>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .find(|(c, _)| c == capability)
            .map(|(_, p)| p.clone())
    }
}

#[async_trait]
impl DeviceTransport for FakeDevice {
    async fn send(
        &self,
        capability: &str,
        params: &Map<String, Value>,
    ) -> Result<TransportResponse, AdbError> {
        self.sent
            .lock()
            .unwrap()
            .push((capability.to_string(), params.clone()));
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AdbError::Connection("device offline".into()));
        }
        if self.failing.iter().any(|c| c == capability) {
            return Ok(TransportResponse::failed(format!("{} had no effect", capability)));
        }
        match capability {
            "open_app" => {
                if let Some(package) = params.get("package").and_then(Value::as_str) {
                    *self.foreground.lock().unwrap() = package.to_string();
                }
            }
            "home" => *self.foreground.lock().unwrap() = LAUNCHER.to_string(),
            _ => {}
        }
        Ok(TransportResponse::ok(json!({ "capability": capability })))
    }

    async fn capture_observation(&self) -> Result<Observation, AdbError> {
        let taken = self.captures.fetch_add(1, Ordering::SeqCst);
        if taken >= self.captures_before_outage.load(Ordering::SeqCst) {
            return Err(AdbError::Connection("device offline".into()));
        }
        let pending = self.capture_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.capture_failures.store(pending - 1, Ordering::SeqCst);
            return Err(AdbError::Connection("device offline".into()));
        }
        let package = self.foreground.lock().unwrap().clone();
        Ok(Observation::new(Vec::new(), Some(package), None))
    }
}

/// Backend that always answers with the same response and counts calls.
pub struct FixedBackend {
    response: Value,
    calls: AtomicUsize,
}

impl FixedBackend {
    pub fn new(response: Value) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicUsize::new(0),
        })
    }

    /// One `tap` action at high confidence.
    pub fn tapping() -> Arc<Self> {
        Self::new(json!({
            "reasoning": "tap the first result",
            "action_plan": [{"capability": "tap", "params": {"x": 100, "y": 200}}],
            "confidence": 0.9
        }))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningBackend for FixedBackend {
    async fn complete(&self, _system: &str, _user: &str) -> Result<Value, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// Gate that approves, counts requests, and can abort the mission.
#[derive(Default)]
pub struct RecordingGate {
    pub requests: Mutex<Vec<ApprovalRequest>>,
    pub abort_on_request: Mutex<Option<AbortHandle>>,
}

#[async_trait]
impl ApprovalGate for RecordingGate {
    async fn approve(&self, request: &ApprovalRequest) -> bool {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(handle) = self.abort_on_request.lock().unwrap().as_ref() {
            handle.abort();
        }
        true
    }
}

/// Fast retries, nothing on disk.
pub fn test_config() -> PilotConfig {
    PilotConfig::default()
        .with_retry_backoff(Duration::from_millis(1))
        .with_checkpoint_timeout(Duration::from_millis(200))
        .with_device_timeout(Duration::from_secs(2))
}

pub fn temp_state_dir() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("device_pilot_it_{}", uuid::Uuid::new_v4()))
}
