//! Configuration and value types shared across the crates.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Built-in server pattern, used when the configured one is empty.
pub const DEFAULT_SERVER_PATTERN: &str =
    r"(rtmp://push-rtmp-[a-zA-Z0-9\-]+(?:\.[a-zA-Z0-9\-]+)+/thirdgame)";

/// Built-in stream key pattern, used when the configured one is empty.
pub const DEFAULT_KEY_PATTERN: &str =
    r"(stream-\d+\?expire=\d+&sign=[a-f0-9]+(?:&volcSecret=[a-f0-9]+&volcTime=\d+)?)";

/// A network interface as reported by the capture driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDevice {
    /// Driver-level device name (e.g. `\Device\NPF_{...}` or `eth0`).
    pub name: String,

    /// Human readable description (e.g. "Wi-Fi").
    pub description: String,
}

impl NetworkDevice {
    /// Create a device entry.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Configuration for one capture session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Interface descriptions to listen on. Empty selects automatically.
    pub interfaces: Vec<String>,

    /// Regular expression for the ingest server URL.
    pub server_pattern: String,

    /// Regular expression for the stream key.
    pub key_pattern: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            server_pattern: DEFAULT_SERVER_PATTERN.to_string(),
            key_pattern: DEFAULT_KEY_PATTERN.to_string(),
        }
    }
}

/// Credentials discovered by a capture session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Ingest server URL.
    pub server_url: String,

    /// Stream key.
    pub stream_key: String,

    /// Remote endpoint (`ip:port`) the key was sent to, if it could be decoded.
    pub source_endpoint: Option<String>,
}

/// Paths to the external programs and files driven by the bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// Streaming companion executable.
    pub companion: PathBuf,

    /// Broadcasting tool executable.
    pub broadcaster: PathBuf,

    /// Broadcasting tool's stream service settings (JSON).
    pub broadcaster_settings: PathBuf,

    /// UI automation helper executable.
    pub automation_helper: PathBuf,
}

/// Timing parameters, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Poll interval while waiting.
    pub check_interval_ms: u64,

    /// Upper bound for the discovery wait.
    pub discovery_timeout_ms: u64,

    /// Pause after discovery before touching the settings file.
    pub post_discovery_wait_ms: u64,

    /// Pause after launching the companion before automating it.
    pub launch_settle_ms: u64,

    /// Pause between clicking close and confirming the follow-up dialog.
    pub dialog_settle_ms: u64,

    /// Upper bound for a single automation helper invocation.
    pub helper_timeout_ms: u64,
}

impl TimingConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn post_discovery_wait(&self) -> Duration {
        Duration::from_millis(self.post_discovery_wait_ms)
    }

    pub fn launch_settle(&self) -> Duration {
        Duration::from_millis(self.launch_settle_ms)
    }

    pub fn dialog_settle(&self) -> Duration {
        Duration::from_millis(self.dialog_settle_ms)
    }

    pub fn helper_timeout(&self) -> Duration {
        Duration::from_millis(self.helper_timeout_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 250,
            discovery_timeout_ms: 20_000,
            post_discovery_wait_ms: 500,
            launch_settle_ms: 3_000,
            dialog_settle_ms: 1_000,
            helper_timeout_ms: 30_000,
        }
    }
}

/// Kind of UI control the automation helper should look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlKind {
    Text,
    Button,
}

impl ControlKind {
    /// Name passed to the automation helper.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Button => "Button",
        }
    }
}

/// A control inside the companion's window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlTarget {
    /// Window / application name the helper searches in.
    pub app: String,

    /// Visible label of the control.
    pub label: String,

    /// Control kind.
    pub kind: ControlKind,
}

impl ControlTarget {
    pub fn new(app: impl Into<String>, label: impl Into<String>, kind: ControlKind) -> Self {
        Self {
            app: app.into(),
            label: label.into(),
            kind,
        }
    }
}

/// Names of the processes and controls the bootstrap interacts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Executable name of the companion, as shown in the process list.
    pub companion_process: String,

    /// Executable names of the broadcasting tool.
    pub broadcaster_processes: Vec<String>,

    /// Control that starts the broadcast in the companion.
    pub start_control: ControlTarget,

    /// Control that closes the companion.
    pub close_control: ControlTarget,

    /// Control confirming the close dialog.
    pub confirm_control: ControlTarget,
}

impl Default for TargetConfig {
    fn default() -> Self {
        let app = "直播伴侣";
        Self {
            companion_process: "直播伴侣.exe".to_string(),
            broadcaster_processes: vec![
                "obs64.exe".to_string(),
                "obs32.exe".to_string(),
                "obs".to_string(),
            ],
            start_control: ControlTarget::new(app, "开始直播", ControlKind::Text),
            close_control: ControlTarget::new(app, "关闭", ControlKind::Button),
            confirm_control: ControlTarget::new(app, "确定", ControlKind::Button),
        }
    }
}

/// Everything a bootstrap run needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub capture: CaptureConfig,
    pub paths: ToolPaths,
    pub timing: TimingConfig,
    pub targets: TargetConfig,

    /// Kill a running broadcaster instead of refusing to touch its settings.
    pub terminate_running_broadcaster: bool,
}
