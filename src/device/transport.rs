//! Device transport: the command/observation protocol the mission loop drives.

use std::path::PathBuf;
use std::process::Output;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::{resolve_package, HOME_PACKAGE};

use super::connection::{get_adb_prefix, run_with_timeout, AdbError};
use super::observation::{bounds_center, parse_focused_window, parse_ui_dump, Observation};

/// Remote path used for UI hierarchy dumps.
const UI_DUMP_PATH: &str = "/sdcard/window_dump.xml";

/// Result of a single device command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl TransportResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            duration: Duration::ZERO,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            duration: Duration::ZERO,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Sends commands to a device and captures what it shows.
///
/// `Err` means the device could not be reached or timed out; a command the
/// device ran but rejected is `Ok` with `success = false`.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn send(
        &self,
        capability: &str,
        params: &Map<String, Value>,
    ) -> Result<TransportResponse, AdbError>;

    async fn capture_observation(&self) -> Result<Observation, AdbError>;
}

/// [`DeviceTransport`] over the `adb` binary.
pub struct AdbTransport {
    adb_path: String,
    device_id: Option<String>,
    timeout: Duration,
    settle_delay: Duration,
    secrets_file: Option<PathBuf>,
}

impl Default for AdbTransport {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AdbTransport {
    pub fn new(device_id: Option<String>) -> Self {
        Self {
            adb_path: "adb".to_string(),
            device_id,
            timeout: Duration::from_secs(15),
            settle_delay: Duration::from_millis(800),
            secrets_file: None,
        }
    }

    pub fn with_adb_path(mut self, adb_path: impl Into<String>) -> Self {
        self.adb_path = adb_path.into();
        self
    }

    /// Per-command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pause after UI-changing commands so the next capture sees the result.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// JSON file mapping service names to credentials, for `get_secret`.
    pub fn with_secrets_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.secrets_file = Some(path.into());
        self
    }

    async fn adb(&self, args: &[&str]) -> Result<Output, AdbError> {
        let prefix = get_adb_prefix(&self.adb_path, self.device_id.as_deref());
        let full: Vec<&str> = prefix[1..]
            .iter()
            .map(String::as_str)
            .chain(args.iter().copied())
            .collect();
        tracing::debug!("adb {}", full.join(" "));
        run_with_timeout(&prefix[0], &full, self.timeout).await
    }

    async fn shell(&self, args: &[&str]) -> Result<TransportResponse, AdbError> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        let output = self.adb(&full).await?;
        Ok(response_from_output(&output, json!({ "command": args.join(" ") })))
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
    }

    /// Installed package names, for matching app names the built-in table
    /// doesn't know.
    pub async fn list_packages(&self) -> Result<Vec<String>, AdbError> {
        let output = self.adb(&["shell", "pm", "list", "packages"]).await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().strip_prefix("package:"))
            .map(str::to_string)
            .collect())
    }

    async fn tap(&self, params: &Map<String, Value>) -> Result<TransportResponse, AdbError> {
        let element_center = params
            .get("element")
            .and_then(|e| e.get("bounds"))
            .and_then(Value::as_str)
            .and_then(bounds_center);
        let (x, y) = match element_center.or_else(|| Some((int(params, "x")?, int(params, "y")?))) {
            Some(point) => point,
            None => return Ok(TransportResponse::failed("Coordinates required")),
        };

        let response = self
            .shell(&["input", "tap", &x.to_string(), &y.to_string()])
            .await?;
        self.settle().await;
        Ok(with_data(response, json!({ "x": x, "y": y })))
    }

    async fn swipe(&self, params: &Map<String, Value>) -> Result<TransportResponse, AdbError> {
        let coords: Option<Vec<i64>> = ["x1", "y1", "x2", "y2"]
            .iter()
            .map(|k| int(params, k))
            .collect();
        let coords = match coords {
            Some(c) => c,
            None => return Ok(TransportResponse::failed("Swipe requires x1, y1, x2, y2")),
        };
        let duration = int(params, "duration").unwrap_or(300).clamp(50, 5000);

        let mut args: Vec<String> = vec!["input".into(), "swipe".into()];
        args.extend(coords.iter().map(i64::to_string));
        args.push(duration.to_string());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let response = self.shell(&args).await?;
        self.settle().await;
        Ok(with_data(
            response,
            json!({ "x1": coords[0], "y1": coords[1], "x2": coords[2], "y2": coords[3] }),
        ))
    }

    /// Types through the ADB Keyboard IME broadcast, which handles any Unicode.
    async fn type_text(&self, params: &Map<String, Value>) -> Result<TransportResponse, AdbError> {
        let text = match params.get("text").and_then(Value::as_str) {
            Some(t) if !t.is_empty() => t,
            _ => return Ok(TransportResponse::failed("Text required")),
        };
        let encoded = STANDARD.encode(text.as_bytes());

        let response = self
            .shell(&["am", "broadcast", "-a", "ADB_INPUT_B64", "--es", "msg", &encoded])
            .await?;
        self.settle().await;
        Ok(with_data(response, json!({ "text": text })))
    }

    async fn keyevent(&self, code: &str, name: &str) -> Result<TransportResponse, AdbError> {
        let response = self.shell(&["input", "keyevent", code]).await?;
        self.settle().await;
        Ok(with_data(response, json!({ "action": name })))
    }

    async fn open_app(&self, params: &Map<String, Value>) -> Result<TransportResponse, AdbError> {
        let identifier = match params
            .get("package")
            .or_else(|| params.get("app_name"))
            .and_then(Value::as_str)
        {
            Some(id) if !id.trim().is_empty() => id.trim(),
            _ => return Ok(TransportResponse::failed("app_name or package is required")),
        };
        let package = resolve_package(identifier);

        if package == HOME_PACKAGE {
            return self.keyevent("3", "home").await;
        }

        let output = self
            .adb(&[
                "shell",
                "monkey",
                "-p",
                &package,
                "-c",
                "android.intent.category.LAUNCHER",
                "1",
            ])
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() || stdout.contains("No activities found") {
            return Ok(TransportResponse::failed(format!(
                "Failed to open {}: {}",
                package,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        // Launch animations take longer than a tap
        tokio::time::sleep(self.settle_delay * 2).await;
        Ok(TransportResponse::ok(json!({ "package": package })))
    }

    async fn get_ui(&self) -> Result<TransportResponse, AdbError> {
        let observation = self.capture_observation().await?;
        Ok(TransportResponse::ok(json!({
            "elements": observation.elements,
            "summary": observation.summary,
            "package": observation.current_package,
        })))
    }

    async fn get_secret(&self, params: &Map<String, Value>) -> Result<TransportResponse, AdbError> {
        let service = match params.get("service").and_then(Value::as_str) {
            Some(s) => s.to_lowercase(),
            None => return Ok(TransportResponse::failed("service is required")),
        };
        let path = match &self.secrets_file {
            Some(p) => p,
            None => return Ok(TransportResponse::failed("No secrets file configured")),
        };

        let secrets: Value = match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or(Value::Null),
            Err(e) => return Ok(TransportResponse::failed(format!("Cannot read secrets: {}", e))),
        };
        match secrets.get(&service) {
            Some(credentials) => Ok(TransportResponse::ok(
                json!({ "service": service, "credentials": credentials }),
            )),
            None => Ok(TransportResponse::failed(format!(
                "No credentials found for: {}",
                service
            ))),
        }
    }
}

#[async_trait]
impl DeviceTransport for AdbTransport {
    async fn send(
        &self,
        capability: &str,
        params: &Map<String, Value>,
    ) -> Result<TransportResponse, AdbError> {
        let start = Instant::now();
        let response = match capability {
            "tap" => self.tap(params).await?,
            "swipe" => self.swipe(params).await?,
            "type" => self.type_text(params).await?,
            "back" => self.keyevent("4", "back").await?,
            "home" => self.keyevent("3", "home").await?,
            "open_app" => self.open_app(params).await?,
            "wait" => {
                let secs = params
                    .get("seconds")
                    .and_then(Value::as_f64)
                    .unwrap_or(1.0)
                    .clamp(0.0, 30.0);
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
                TransportResponse::ok(json!({ "waited": secs }))
            }
            "get_ui" => self.get_ui().await?,
            "get_secret" => self.get_secret(params).await?,
            other => TransportResponse::failed(format!("Unknown capability: {}", other)),
        };
        Ok(response.with_duration(start.elapsed()))
    }

    async fn capture_observation(&self) -> Result<Observation, AdbError> {
        let dump = self.adb(&["shell", "uiautomator", "dump", UI_DUMP_PATH]).await?;
        if !dump.status.success() {
            return Err(AdbError::CommandFailed(format!(
                "uiautomator dump failed: {}",
                String::from_utf8_lossy(&dump.stderr).trim()
            )));
        }

        let xml = self.adb(&["shell", "cat", UI_DUMP_PATH]).await?;
        let elements = parse_ui_dump(&String::from_utf8_lossy(&xml.stdout));

        let window = self.adb(&["shell", "dumpsys", "window"]).await?;
        let focus = parse_focused_window(&String::from_utf8_lossy(&window.stdout));

        let (package, screen_id) = match focus {
            Some((pkg, screen)) => (Some(pkg), Some(screen)),
            None => (
                elements
                    .iter()
                    .map(|e| e.package.clone())
                    .find(|p| !p.is_empty()),
                None,
            ),
        };

        Ok(Observation::new(elements, package, screen_id))
    }
}

fn int(params: &Map<String, Value>, key: &str) -> Option<i64> {
    match params.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn response_from_output(output: &Output, data: Value) -> TransportResponse {
    if output.status.success() {
        TransportResponse::ok(data)
    } else {
        TransportResponse::failed(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

fn with_data(mut response: TransportResponse, data: Value) -> TransportResponse {
    if response.success {
        response.data = Some(data);
    }
    response
}
