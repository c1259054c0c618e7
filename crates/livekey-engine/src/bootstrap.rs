//! The one-click go-live pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::{debug, error, info, instrument, warn};

use livekey_capture::{CaptureBackend, CaptureSession};
use livekey_host::{
    AutomationTool, JsonSettingsFile, LaunchSpec, ProcessControl, RunningProcess, SettingsSink,
    SystemProcesses, UiAutomation,
};
use livekey_ipc::{
    capture_event_channel, BootstrapConfig, BootstrapEvent, BootstrapProgress, BootstrapStep,
    CaptureEvent, ExtractionResult,
};

use crate::error::BootstrapError;
use crate::preflight::preflight;
use crate::state::RunResources;
use crate::BootstrapResult;

/// External systems a run drives.
#[derive(Clone)]
pub struct Collaborators {
    pub backend: Arc<dyn CaptureBackend>,
    pub processes: Arc<dyn ProcessControl>,
    pub automation: Arc<dyn UiAutomation>,
    pub settings: Arc<dyn SettingsSink>,
}

impl Collaborators {
    /// Real collaborators for `config`.
    pub fn system(
        backend: Arc<dyn CaptureBackend>,
        config: &BootstrapConfig,
    ) -> BootstrapResult<Self> {
        let automation = AutomationTool::new(
            &config.paths.automation_helper,
            config.timing.helper_timeout(),
        )?;

        Ok(Self {
            backend,
            processes: Arc::new(SystemProcesses),
            automation: Arc::new(automation),
            settings: Arc::new(JsonSettingsFile::new(&config.paths.broadcaster_settings)),
        })
    }
}

/// A step failure, `step` is `None` for pre-flight.
#[derive(Debug)]
struct Failure {
    step: Option<BootstrapStep>,
    error: BootstrapError,
}

/// Handle to a run executing on its own thread.
pub struct BootstrapHandle {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BootstrapHandle {
    /// Ask the run to stop at the next step boundary or wait.
    pub fn cancel(&self) {
        if !self.cancel.swap(true, Ordering::SeqCst) {
            info!("Bootstrap cancellation requested");
        }
    }

    /// Returns true once the run has emitted its terminal event.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the run to end.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Start a run on a background thread.
pub fn spawn_bootstrap(
    config: BootstrapConfig,
    collaborators: Collaborators,
    events: Sender<BootstrapEvent>,
) -> BootstrapResult<BootstrapHandle> {
    let cancel = Arc::new(AtomicBool::new(false));
    let bootstrap = Bootstrap {
        config,
        collaborators,
        events,
        cancel: Arc::clone(&cancel),
    };

    let thread = thread::Builder::new()
        .name("bootstrap".to_string())
        .spawn(move || bootstrap.run())
        .map_err(|e| BootstrapError::Config(format!("cannot start bootstrap thread: {e}")))?;

    Ok(BootstrapHandle {
        cancel,
        thread: Some(thread),
    })
}

/// One run of the pipeline.
///
/// Emits progress before each step and exactly one terminal event.
struct Bootstrap {
    config: BootstrapConfig,
    collaborators: Collaborators,
    events: Sender<BootstrapEvent>,
    cancel: Arc<AtomicBool>,
}

impl Bootstrap {
    #[instrument(name = "bootstrap_run", skip(self))]
    fn run(self) {
        info!("Bootstrap starting");

        let terminal = match self.execute() {
            Ok(result) => {
                info!("Bootstrap completed");
                BootstrapEvent::Completed(result)
            }
            Err(Failure { step, error }) => {
                match step {
                    Some(step) => error!(%step, "Bootstrap failed: {}", error),
                    None => error!("Bootstrap pre-flight failed: {}", error),
                }
                BootstrapEvent::Failed {
                    step,
                    kind: error.kind(),
                    message: error.to_string(),
                }
            }
        };

        self.deliver(terminal);
    }

    fn execute(&self) -> Result<ExtractionResult, Failure> {
        preflight(&self.config, self.collaborators.processes.as_ref())
            .map_err(|error| Failure { step: None, error })?;

        let mut resources = RunResources::new();
        let outcome = self.run_steps(&mut resources);
        resources.release();

        if outcome.is_ok() {
            self.progress(BootstrapProgress::finished());
        }
        outcome
    }

    fn run_steps(&self, resources: &mut RunResources) -> Result<ExtractionResult, Failure> {
        self.step(resources, BootstrapStep::LaunchCompanion, |_| {
            self.launch_companion()
        })?;

        self.step(resources, BootstrapStep::StartCapture, |resources| {
            self.start_capture(resources)
        })?;

        self.step(resources, BootstrapStep::ClickStart, |_| self.click_start())?;

        let result = self.step(resources, BootstrapStep::AwaitCredentials, |resources| {
            self.await_credentials(resources)
        })?;

        self.step(resources, BootstrapStep::WriteSettings, |_| {
            self.write_settings(&result)
        })?;

        self.step(resources, BootstrapStep::LaunchBroadcaster, |_| {
            self.launch_broadcaster()
        })?;

        self.step(resources, BootstrapStep::CloseCompanion, |_| {
            match self.close_companion() {
                Ok(()) => {}
                Err(BootstrapError::Cancelled) => return Err(BootstrapError::Cancelled),
                Err(e) => {
                    warn!("Closing the companion failed: {}", e);
                    self.deliver(BootstrapEvent::Warning {
                        step: BootstrapStep::CloseCompanion,
                        message: e.to_string(),
                    });
                }
            }
            Ok(())
        })?;

        Ok(result)
    }

    fn step<T>(
        &self,
        resources: &mut RunResources,
        step: BootstrapStep,
        action: impl FnOnce(&mut RunResources) -> BootstrapResult<T>,
    ) -> Result<T, Failure> {
        let fail = |error| Failure {
            step: Some(step),
            error,
        };

        self.check_cancelled().map_err(fail)?;
        self.progress(BootstrapProgress::starting(step));
        info!(%step, "Bootstrap step starting");

        resources.enter(step);
        action(resources).map_err(fail)
    }

    fn launch_companion(&self) -> BootstrapResult<()> {
        let processes = &self.collaborators.processes;
        let names = std::slice::from_ref(&self.config.targets.companion_process);
        match processes.find_running(names) {
            Ok(Some(running)) => {
                info!(pid = running.pid, "Companion already running, launching anyway")
            }
            Ok(None) => {}
            Err(e) => debug!("Cannot check for a running companion: {}", e),
        }

        let spec = LaunchSpec::new(&self.config.paths.companion).elevated();
        processes.launch(&spec)?;
        Ok(())
    }

    fn start_capture(&self, resources: &mut RunResources) -> BootstrapResult<()> {
        let session = CaptureSession::new(Arc::clone(&self.collaborators.backend));
        let (event_tx, event_rx) = capture_event_channel();

        session.start(&self.config.capture, Arc::new(event_tx))?;

        resources.capture = Some(session);
        resources.capture_events = Some(event_rx);
        Ok(())
    }

    fn click_start(&self) -> BootstrapResult<()> {
        self.sleep(self.config.timing.launch_settle())?;
        self.collaborators
            .automation
            .locate_and_click(&self.config.targets.start_control)?;
        Ok(())
    }

    fn await_credentials(&self, resources: &RunResources) -> BootstrapResult<ExtractionResult> {
        let events = resources
            .capture_events
            .as_ref()
            .ok_or(BootstrapError::CaptureEnded)?;

        let timeout = self.config.timing.discovery_timeout();
        let interval = self.config.timing.check_interval();
        let deadline = Instant::now() + timeout;

        let result = loop {
            self.check_cancelled()?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(BootstrapError::Timeout(timeout));
            }

            match events.recv_timeout(interval.min(remaining)) {
                Ok(CaptureEvent::AllFound(result)) => break result,
                Ok(CaptureEvent::ServerFound(server)) => info!(server = %server, "Server seen"),
                Ok(CaptureEvent::KeyFound(_)) => info!("Stream key seen"),
                Ok(event) => debug!(?event, "Capture event"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(BootstrapError::CaptureEnded),
            }
        };

        self.sleep(self.config.timing.post_discovery_wait())?;
        Ok(result)
    }

    fn write_settings(&self, result: &ExtractionResult) -> BootstrapResult<()> {
        let processes = &self.collaborators.processes;
        if let Some(running) = processes.find_running(&self.config.targets.broadcaster_processes)? {
            if !self.config.terminate_running_broadcaster {
                return Err(BootstrapError::BroadcasterRunning {
                    name: running.name,
                    pid: running.pid,
                });
            }
            info!(pid = running.pid, name = %running.name, "Terminating running broadcaster");
            processes.kill(running.pid)?;
            self.await_exit(running)?;
        }

        self.collaborators
            .settings
            .write_stream_settings(&result.server_url, &result.stream_key)?;
        Ok(())
    }

    /// Wait until `process` is gone from the process list, bounded by the
    /// helper timeout.
    fn await_exit(&self, process: RunningProcess) -> BootstrapResult<()> {
        let timeout = self.config.timing.helper_timeout();
        let deadline = Instant::now() + timeout;
        let names = &self.config.targets.broadcaster_processes;

        loop {
            match self.collaborators.processes.find_running(names)? {
                Some(running) if running.pid == process.pid => {}
                _ => {
                    debug!(pid = process.pid, "Broadcaster exited");
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(BootstrapError::StillRunning {
                    name: process.name,
                    pid: process.pid,
                    timeout,
                });
            }
            self.sleep(self.config.timing.check_interval())?;
        }
    }

    fn launch_broadcaster(&self) -> BootstrapResult<()> {
        let processes = &self.collaborators.processes;
        if let Some(running) = processes.find_running(&self.config.targets.broadcaster_processes)? {
            return Err(BootstrapError::BroadcasterRunning {
                name: running.name,
                pid: running.pid,
            });
        }

        processes.launch(&LaunchSpec::new(&self.config.paths.broadcaster))?;
        Ok(())
    }

    fn close_companion(&self) -> BootstrapResult<()> {
        let automation = &self.collaborators.automation;
        let targets = &self.config.targets;

        automation.locate_and_click(&targets.close_control)?;
        self.sleep(self.config.timing.dialog_settle())?;
        automation.locate_and_click(&targets.confirm_control)?;
        Ok(())
    }

    fn check_cancelled(&self) -> BootstrapResult<()> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(BootstrapError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking every check interval to honor cancellation.
    fn sleep(&self, duration: Duration) -> BootstrapResult<()> {
        let deadline = Instant::now() + duration;
        let interval = self.config.timing.check_interval();

        loop {
            self.check_cancelled()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            thread::sleep(interval.min(remaining));
        }
    }

    fn progress(&self, progress: BootstrapProgress) {
        if let Err(e) = self.events.try_send(BootstrapEvent::Progress(progress)) {
            debug!("Progress not delivered: {}", e);
        }
    }

    fn deliver(&self, event: BootstrapEvent) {
        if let Err(e) = self.events.send(event) {
            warn!("Failed to send bootstrap event: {}", e);
        }
    }
}
