//! ADB connection management for local and remote devices.

use std::process::Output;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Type of ADB connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionType {
    Usb,
    Wifi,
    Remote,
}

/// Information about a connected device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub device_id: String,
    pub status: String,
    pub connection_type: ConnectionType,
    pub model: Option<String>,
}

impl DeviceInfo {
    /// Whether adb reports the device as ready for commands.
    pub fn is_online(&self) -> bool {
        self.status == "device"
    }
}

/// ADB errors.
#[derive(Error, Debug)]
pub enum AdbError {
    #[error("ADB command timed out after {0}s")]
    Timeout(u64),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Command execution failed: {0}")]
    CommandFailed(String),
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
}

/// Manages ADB connections to Android devices.
///
/// Supports USB, WiFi, and remote TCP/IP connections.
///
/// # Example
/// ```rust,no_run
/// use device_pilot::device::AdbConnection;
///
/// # async fn demo() -> Result<(), device_pilot::device::AdbError> {
/// let conn = AdbConnection::new();
/// conn.connect("192.168.1.100:5555").await?;
/// let devices = conn.list_devices().await?;
/// # Ok(())
/// # }
/// ```
pub struct AdbConnection {
    adb_path: String,
    timeout: Duration,
}

impl Default for AdbConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl AdbConnection {
    /// Create a connection manager using `adb` from `PATH`.
    pub fn new() -> Self {
        Self {
            adb_path: "adb".to_string(),
            timeout: Duration::from_secs(15),
        }
    }

    /// Create a connection manager with a custom ADB path.
    pub fn with_path(adb_path: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            ..Self::new()
        }
    }

    /// Bound every adb invocation by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, args: &[&str]) -> Result<Output, AdbError> {
        run_with_timeout(&self.adb_path, args, self.timeout).await
    }

    /// Connect to a remote device via TCP/IP. Port 5555 is assumed when
    /// `address` has none.
    pub async fn connect(&self, address: &str) -> Result<String, AdbError> {
        let address = if !address.contains(':') {
            format!("{}:5555", address)
        } else {
            address.to_string()
        };

        let output = self
            .run(&["connect", &address])
            .await
            .map_err(|e| AdbError::Connection(e.to_string()))?;

        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let lower = combined.to_lowercase();

        if lower.contains("connected") && !lower.contains("cannot") && !lower.contains("failed") {
            Ok(format!("Connected to {}", address))
        } else {
            Err(AdbError::Connection(combined.trim().to_string()))
        }
    }

    /// List all attached devices.
    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>, AdbError> {
        let output = self.run(&["devices", "-l"]).await?;
        Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Id of the first online device, or `DeviceNotFound`.
    pub async fn first_online(&self) -> Result<String, AdbError> {
        first_online_id(&self.list_devices().await?)
    }
}

fn first_online_id(devices: &[DeviceInfo]) -> Result<String, AdbError> {
    devices
        .iter()
        .find(|d| d.is_online())
        .map(|d| d.device_id.clone())
        .ok_or_else(|| AdbError::DeviceNotFound("No Android device connected".to_string()))
}

/// Parse `adb devices -l` output.
pub(crate) fn parse_device_list(stdout: &str) -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("List of devices") || line.starts_with('*') {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        let device_id = parts[0].to_string();
        let connection_type = if device_id.contains(':') {
            ConnectionType::Remote
        } else if parts.iter().any(|p| p.starts_with("usb:")) {
            ConnectionType::Usb
        } else {
            ConnectionType::Wifi
        };

        let model = parts
            .iter()
            .find(|p| p.starts_with("model:"))
            .map(|m| m.trim_start_matches("model:").to_string());

        devices.push(DeviceInfo {
            device_id,
            status: parts[1].to_string(),
            connection_type,
            model,
        });
    }

    devices
}

/// ADB command prefix with optional device specifier.
pub(crate) fn get_adb_prefix(adb_path: &str, device_id: Option<&str>) -> Vec<String> {
    match device_id {
        Some(id) => vec![adb_path.to_string(), "-s".to_string(), id.to_string()],
        None => vec![adb_path.to_string()],
    }
}

/// Run a program, killing it if it outlives `timeout`.
pub(crate) async fn run_with_timeout(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<Output, AdbError> {
    let child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(AdbError::Connection(
            format!("'{}' not found in PATH", program),
        )),
        Ok(Err(e)) => Err(AdbError::CommandFailed(e.to_string())),
        Err(_) => Err(AdbError::Timeout(timeout.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adb_connection_new() {
        let conn = AdbConnection::new();
        assert_eq!(conn.adb_path, "adb");
    }

    #[test]
    fn test_get_adb_prefix() {
        assert_eq!(get_adb_prefix("adb", None), vec!["adb"]);
        assert_eq!(
            get_adb_prefix("adb", Some("device123")),
            vec!["adb", "-s", "device123"]
        );
    }

    #[test]
    fn test_parse_device_list() {
        let out = "List of devices attached\n\
                   emulator-5554          device product:sdk model:Pixel_6 device:generic\n\
                   192.168.1.20:5555      offline\n\
                   R58M123ABC             device usb:1-1 model:SM_G990\n";
        let devices = parse_device_list(out);
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].model.as_deref(), Some("Pixel_6"));
        assert!(devices[0].is_online());
        assert_eq!(devices[1].connection_type, ConnectionType::Remote);
        assert!(!devices[1].is_online());
        assert_eq!(devices[2].connection_type, ConnectionType::Usb);
    }

    #[test]
    fn test_first_online_skips_offline_devices() {
        let devices = parse_device_list(
            "List of devices attached\n\
             192.168.1.20:5555      offline\n\
             R58M123ABC             device usb:1-1 model:SM_G990\n",
        );
        assert_eq!(first_online_id(&devices).unwrap(), "R58M123ABC");

        let offline = parse_device_list("192.168.1.20:5555      offline\n");
        assert!(matches!(
            first_online_id(&offline),
            Err(AdbError::DeviceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_connection_error() {
        let err = run_with_timeout("definitely-not-adb-xyz", &["devices"], Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, AdbError::Connection(_)));
    }
}
