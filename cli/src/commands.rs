//! Subcommand implementations, driving the engine over its channels.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, info, warn};

use livekey_capture::{
    select_interfaces, system_backend, CaptureBackend, CaptureError, ScriptedBackend,
};
use livekey_engine::create_engine;
use livekey_host::{HostError, JsonSettingsFile, SettingsSink};
use livekey_ipc::{
    command_channel, event_channel, BootstrapEvent, BootstrapStep, CaptureEvent, EngineCommand,
    EngineEvent, ExtractionResult, FailureKind, NetworkDevice,
};

use crate::cli::{CaptureArgs, GoLiveArgs, WriteSettingsArgs};
use crate::config::AppConfig;
use crate::signal::ShutdownFlag;

/// How long to block on the engine before checking Ctrl+C and deadlines.
const POLL: Duration = Duration::from_millis(100);

/// Errors from running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    Config(String),

    #[error("live capture is not compiled in; rebuild with --features live-capture")]
    LiveCaptureUnavailable,

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("capture failed: {0}")]
    CaptureFailed(String),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("credentials not found within {0:?}")]
    Timeout(Duration),

    #[error("{message}")]
    Bootstrap { kind: FailureKind, message: String },

    #[error("interrupted")]
    Interrupted,

    #[error("engine stopped unexpectedly")]
    EngineStopped,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Exit code constants.
pub mod codes {
    pub const SUCCESS: u8 = 0;
    pub const FAILURE: u8 = 1;
    pub const CONFIG: u8 = 2;
    pub const TIMEOUT: u8 = 3;
    /// Interrupted by Ctrl+C (128 + SIGINT).
    pub const INTERRUPTED: u8 = 130;
}

/// Map a CommandError to an exit code.
pub fn exit_code(error: &CommandError) -> u8 {
    match error {
        CommandError::Config(_) | CommandError::LiveCaptureUnavailable => codes::CONFIG,
        CommandError::Timeout(_) => codes::TIMEOUT,
        CommandError::Interrupted => codes::INTERRUPTED,
        CommandError::Bootstrap { kind, .. } => match kind {
            FailureKind::Configuration => codes::CONFIG,
            FailureKind::Timeout => codes::TIMEOUT,
            FailureKind::Cancelled => codes::INTERRUPTED,
            FailureKind::Runtime => codes::FAILURE,
        },
        CommandError::Capture(CaptureError::NoInterfaces)
        | CommandError::Capture(CaptureError::InvalidPattern { .. })
        | CommandError::Host(HostError::InvalidServer(_)) => codes::CONFIG,
        _ => codes::FAILURE,
    }
}

/// An engine running on its own thread, shut down on drop.
struct EngineClient {
    commands: Sender<EngineCommand>,
    events: Receiver<EngineEvent>,
    thread: Option<JoinHandle<()>>,
}

impl EngineClient {
    fn start(backend: Arc<dyn CaptureBackend>) -> Result<Self, CommandError> {
        let (command_tx, command_rx) = command_channel();
        let (event_tx, event_rx) = event_channel();

        let thread = thread::Builder::new()
            .name("engine".to_string())
            .spawn(move || create_engine(command_rx, event_tx, backend).run())
            .context("failed to start engine thread")?;

        let client = Self {
            commands: command_tx,
            events: event_rx,
            thread: Some(thread),
        };

        match client.events.recv() {
            Ok(EngineEvent::Ready) => Ok(client),
            _ => Err(CommandError::EngineStopped),
        }
    }

    fn send(&self, command: EngineCommand) -> Result<(), CommandError> {
        self.commands
            .send(command)
            .map_err(|_| CommandError::EngineStopped)
    }

    /// Next event, `None` when nothing arrived within one poll period.
    fn next_event(&self) -> Result<Option<EngineEvent>, CommandError> {
        match self.events.recv_timeout(POLL) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CommandError::EngineStopped),
        }
    }
}

impl Drop for EngineClient {
    fn drop(&mut self) {
        let _ = self.commands.send(EngineCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn live_backend() -> Result<Arc<dyn CaptureBackend>, CommandError> {
    if cfg!(feature = "live-capture") {
        Ok(system_backend())
    } else {
        Err(CommandError::LiveCaptureUnavailable)
    }
}

/// List capture devices, flagging the ones a session would listen on.
pub fn interfaces(config: &AppConfig) -> Result<Vec<(NetworkDevice, bool)>, CommandError> {
    let devices = live_backend()?.list_devices()?;
    Ok(mark_selected(&devices, &config.bootstrap.capture.interfaces))
}

fn mark_selected(devices: &[NetworkDevice], configured: &[String]) -> Vec<(NetworkDevice, bool)> {
    let selected = select_interfaces(devices, configured).unwrap_or_default();
    devices
        .iter()
        .map(|device| (device.clone(), selected.contains(device)))
        .collect()
}

/// Capture until both credentials are found.
pub fn capture(
    config: &AppConfig,
    args: &CaptureArgs,
    shutdown: &ShutdownFlag,
) -> Result<ExtractionResult, CommandError> {
    let backend: Arc<dyn CaptureBackend> = match &args.replay {
        Some(path) => Arc::new(
            ScriptedBackend::from_payload_file(path)
                .with_context(|| format!("failed to read replay file {}", path.display()))?,
        ),
        None => live_backend()?,
    };

    let client = EngineClient::start(backend)?;
    client.send(EngineCommand::StartCapture {
        config: config.bootstrap.capture.clone(),
    })?;

    let timeout = args.timeout.map(Duration::from_secs);
    let started = Instant::now();

    loop {
        if shutdown.should_stop() {
            return Err(CommandError::Interrupted);
        }
        if let Some(timeout) = timeout {
            if started.elapsed() >= timeout {
                return Err(CommandError::Timeout(timeout));
            }
        }

        let Some(EngineEvent::Capture(event)) = client.next_event()? else {
            continue;
        };

        match event {
            CaptureEvent::ServerFound(server) => info!(server = %server, "Server found"),
            CaptureEvent::KeyFound(_) => info!("Stream key found"),
            CaptureEvent::EndpointFound(endpoint) => {
                info!(endpoint = %endpoint, "Endpoint found")
            }
            CaptureEvent::AllFound(result) => return Ok(result),
            CaptureEvent::Error { message } => return Err(CommandError::CaptureFailed(message)),
            CaptureEvent::StateChanged { previous, current } => {
                debug!(?previous, ?current, "Capture state changed")
            }
        }
    }
}

/// Run the go-live sequence, printing progress.
pub fn go_live(
    config: &AppConfig,
    args: &GoLiveArgs,
    shutdown: &ShutdownFlag,
) -> Result<ExtractionResult, CommandError> {
    let mut bootstrap = config.bootstrap.clone();
    bootstrap.terminate_running_broadcaster |= args.terminate_running;

    let client = EngineClient::start(live_backend()?)?;
    client.send(EngineCommand::RunBootstrap {
        config: Box::new(bootstrap),
    })?;

    let mut cancelling = false;
    loop {
        if shutdown.should_stop() && !cancelling {
            warn!("Interrupted, cancelling go-live");
            client.send(EngineCommand::CancelBootstrap)?;
            cancelling = true;
        }

        let Some(EngineEvent::Bootstrap(event)) = client.next_event()? else {
            continue;
        };

        match event {
            BootstrapEvent::Progress(progress) => {
                println!(
                    "[{}/{}] {}",
                    progress.completed,
                    BootstrapStep::COUNT,
                    progress.message
                );
            }
            BootstrapEvent::Warning { step, message } => {
                eprintln!("warning: {step}: {message}");
            }
            BootstrapEvent::Completed(result) => return Ok(result),
            BootstrapEvent::Failed {
                step,
                kind,
                message,
            } => {
                let message = match step {
                    Some(step) => format!("{step} failed: {message}"),
                    None => message,
                };
                return Err(CommandError::Bootstrap { kind, message });
            }
        }
    }
}

/// Write credentials into the broadcaster settings file.
pub fn write_settings(
    config: &AppConfig,
    args: &WriteSettingsArgs,
) -> Result<PathBuf, CommandError> {
    let path = args
        .path
        .clone()
        .unwrap_or_else(|| config.bootstrap.paths.broadcaster_settings.clone());
    if path.as_os_str().is_empty() {
        return Err(CommandError::Config(
            "no settings file: pass --path or set paths.broadcaster_settings".to_string(),
        ));
    }

    JsonSettingsFile::new(path.clone()).write_stream_settings(&args.server, &args.key)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SERVER: &str = "rtmp://push-rtmp-abc.example.com/thirdgame";
    const KEY: &str = "stream-123?expire=1999999999&sign=deadbeef";

    #[test]
    fn test_capture_from_replay_file() {
        let dir = tempfile::tempdir().unwrap();
        let replay = dir.path().join("payloads.txt");
        fs::write(
            &replay,
            format!("GET / HTTP/1.1\n{{\"url\":\"{SERVER}\"}}\n\n{{\"stream\":\"{KEY}\"}}\n"),
        )
        .unwrap();

        let args = CaptureArgs {
            timeout: Some(10),
            replay: Some(replay),
        };
        let result = capture(&AppConfig::default(), &args, &ShutdownFlag::manual()).unwrap();

        assert_eq!(result.server_url, SERVER);
        assert_eq!(result.stream_key, KEY);
        assert_eq!(result.source_endpoint.as_deref(), Some("203.0.113.7:443"));
    }

    #[test]
    fn test_capture_replay_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let replay = dir.path().join("payloads.txt");
        fs::write(&replay, format!("{SERVER}\n")).unwrap();

        let args = CaptureArgs {
            timeout: Some(0),
            replay: Some(replay),
        };
        let err = capture(&AppConfig::default(), &args, &ShutdownFlag::manual()).unwrap_err();
        assert!(matches!(err, CommandError::Timeout(_)));
        assert_eq!(exit_code(&err), codes::TIMEOUT);
    }

    #[test]
    fn test_capture_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let replay = dir.path().join("payloads.txt");
        fs::write(&replay, "nothing here\n").unwrap();

        let shutdown = ShutdownFlag::manual();
        shutdown.trigger();
        let args = CaptureArgs {
            timeout: None,
            replay: Some(replay),
        };
        let err = capture(&AppConfig::default(), &args, &shutdown).unwrap_err();
        assert_eq!(exit_code(&err), codes::INTERRUPTED);
    }

    #[test]
    fn test_missing_replay_file() {
        let args = CaptureArgs {
            timeout: None,
            replay: Some(PathBuf::from("/nonexistent/payloads.txt")),
        };
        let err = capture(&AppConfig::default(), &args, &ShutdownFlag::manual()).unwrap_err();
        assert!(err.to_string().contains("failed to read replay file"));
    }

    #[test]
    fn test_mark_selected_skips_denied() {
        let devices = vec![
            NetworkDevice::new("eth0", "Ethernet"),
            NetworkDevice::new("lo", "Adapter for loopback traffic capture"),
        ];

        let marked = mark_selected(&devices, &[]);
        assert_eq!(marked.len(), 2);
        assert!(marked[0].1);
        assert!(!marked[1].1);

        let none = mark_selected(&devices, &["Wi-Fi".to_string()]);
        assert!(none.iter().all(|(_, selected)| !selected));
    }

    #[test]
    fn test_write_settings_to_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        fs::write(&path, "{\n  \"type\": \"rtmp_custom\",\n  \"settings\": {}\n}\n").unwrap();

        let args = WriteSettingsArgs {
            server: SERVER.to_string(),
            key: KEY.to_string(),
            path: Some(path.clone()),
        };
        let written = write_settings(&AppConfig::default(), &args).unwrap();
        assert_eq!(written, path);

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains(SERVER));
        assert!(content.contains("stream-123"));
    }

    #[test]
    fn test_write_settings_needs_a_path() {
        let args = WriteSettingsArgs {
            server: SERVER.to_string(),
            key: KEY.to_string(),
            path: None,
        };
        let err = write_settings(&AppConfig::default(), &args).unwrap_err();
        assert_eq!(exit_code(&err), codes::CONFIG);
    }

    #[test]
    fn test_bootstrap_exit_codes() {
        let failure = |kind| CommandError::Bootstrap {
            kind,
            message: "failed".to_string(),
        };
        assert_eq!(exit_code(&failure(FailureKind::Configuration)), codes::CONFIG);
        assert_eq!(exit_code(&failure(FailureKind::Timeout)), codes::TIMEOUT);
        assert_eq!(exit_code(&failure(FailureKind::Runtime)), codes::FAILURE);
        assert_eq!(exit_code(&failure(FailureKind::Cancelled)), codes::INTERRUPTED);
        assert_eq!(exit_code(&CommandError::EngineStopped), codes::FAILURE);
    }
}
