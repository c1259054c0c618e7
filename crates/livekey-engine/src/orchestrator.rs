//! Command loop exposing capture and bootstrap to a front end.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, error, info, instrument, warn};

use livekey_capture::{CaptureBackend, CaptureError, CaptureObserver, CaptureSession};
use livekey_ipc::{
    bootstrap_event_channel, BootstrapConfig, BootstrapEvent, CaptureConfig, CaptureEvent,
    EngineCommand, EngineEvent, EngineStatus, ExtractionResult, SessionState,
};

use crate::bootstrap::{spawn_bootstrap, BootstrapHandle, Collaborators};
use crate::error::BootstrapError;
use crate::BootstrapResult;

/// Builds the collaborators of a bootstrap run from its configuration.
pub type CollaboratorFactory =
    Box<dyn Fn(&BootstrapConfig) -> BootstrapResult<Collaborators> + Send>;

/// Poll period of the command loop.
const TICK: Duration = Duration::from_millis(100);

struct ActiveBootstrap {
    handle: BootstrapHandle,
    events: Receiver<BootstrapEvent>,
}

/// The livekey engine.
pub struct Engine {
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    capture: CaptureSession,
    factory: CollaboratorFactory,
    bootstrap: Option<ActiveBootstrap>,
}

impl Engine {
    /// Create a new engine.
    pub fn new(
        command_rx: Receiver<EngineCommand>,
        event_tx: Sender<EngineEvent>,
        backend: Arc<dyn CaptureBackend>,
        factory: CollaboratorFactory,
    ) -> Self {
        Self {
            command_rx,
            event_tx,
            capture: CaptureSession::new(backend),
            factory,
            bootstrap: None,
        }
    }

    /// Run the engine (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Engine starting");
        self.send_event(EngineEvent::Ready);

        loop {
            match self.command_rx.recv_timeout(TICK) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    self.shutdown();
                    break;
                }
            }

            self.forward_bootstrap_events();
        }

        info!("Engine stopped");
    }

    /// Handle a command. Returns false if engine should stop.
    fn handle_command(&mut self, command: EngineCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            EngineCommand::StartCapture { config } => self.start_capture(config),
            EngineCommand::StopCapture => self.capture.stop(),
            EngineCommand::RunBootstrap { config } => self.run_bootstrap(*config),
            EngineCommand::CancelBootstrap => self.cancel_bootstrap(),
            EngineCommand::GetState => self.send_state(),
            EngineCommand::Shutdown => {
                self.shutdown();
                self.send_event(EngineEvent::Shutdown);
                return false;
            }
        }

        true
    }

    fn start_capture(&mut self, config: CaptureConfig) {
        if self.capture.is_active() {
            debug!("Capture already active, ignoring start command");
            return;
        }

        let observer = Arc::new(EventForwarder {
            event_tx: self.event_tx.clone(),
        });
        if let Err(e) = self.capture.start(&config, observer) {
            // Start failures were already reported through the observer.
            debug!("Capture not started: {}", e);
        }
    }

    #[instrument(name = "engine_bootstrap", skip(self, config))]
    fn run_bootstrap(&mut self, config: BootstrapConfig) {
        if self.bootstrap.is_some() {
            self.reject_bootstrap(BootstrapError::Busy);
            return;
        }

        let collaborators = match (self.factory)(&config) {
            Ok(collaborators) => collaborators,
            Err(e) => {
                self.reject_bootstrap(e);
                return;
            }
        };

        let (tx, rx) = bootstrap_event_channel();
        match spawn_bootstrap(config, collaborators, tx) {
            Ok(handle) => {
                self.bootstrap = Some(ActiveBootstrap { handle, events: rx });
            }
            Err(e) => self.reject_bootstrap(e),
        }
    }

    fn reject_bootstrap(&self, error: BootstrapError) {
        warn!("Bootstrap rejected: {}", error);
        self.send_event(EngineEvent::Bootstrap(BootstrapEvent::Failed {
            step: None,
            kind: error.kind(),
            message: error.to_string(),
        }));
    }

    fn cancel_bootstrap(&self) {
        match &self.bootstrap {
            Some(active) => active.handle.cancel(),
            None => debug!("No bootstrap running, ignoring cancel"),
        }
    }

    /// Relay pending bootstrap events; forget the run after its terminal event.
    fn forward_bootstrap_events(&mut self) {
        let Some(active) = &self.bootstrap else {
            return;
        };

        let mut finished = false;
        loop {
            match active.events.try_recv() {
                Ok(event) => {
                    finished |= event.is_terminal();
                    self.send_event(EngineEvent::Bootstrap(event));
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    finished = true;
                    break;
                }
            }
        }

        if finished {
            if let Some(active) = self.bootstrap.take() {
                active.handle.join();
            }
        }
    }

    fn send_state(&self) {
        self.send_event(EngineEvent::State(EngineStatus {
            capture: self.capture.state(),
            bootstrap_running: self.bootstrap.is_some(),
        }));
    }

    fn shutdown(&mut self) {
        if let Some(active) = self.bootstrap.take() {
            info!("Cancelling bootstrap for shutdown");
            active.handle.cancel();
            active.handle.join();
            for event in active.events.try_iter() {
                self.send_event(EngineEvent::Bootstrap(event));
            }
        }
        self.capture.stop();
    }

    fn send_event(&self, event: EngineEvent) {
        send_engine_event(&self.event_tx, event);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(active) = self.bootstrap.take() {
            active.handle.cancel();
        }
        self.capture.stop();
    }
}

fn send_engine_event(event_tx: &Sender<EngineEvent>, event: EngineEvent) {
    if let Err(e) = event_tx.try_send(event) {
        warn!("Failed to send event: {}", e);
    }
}

/// Relays capture notifications as engine events.
struct EventForwarder {
    event_tx: Sender<EngineEvent>,
}

impl EventForwarder {
    fn forward(&self, event: CaptureEvent) {
        send_engine_event(&self.event_tx, EngineEvent::Capture(event));
    }
}

impl CaptureObserver for EventForwarder {
    fn on_server_found(&self, server: &str) {
        self.forward(CaptureEvent::ServerFound(server.to_string()));
    }

    fn on_key_found(&self, key: &str) {
        self.forward(CaptureEvent::KeyFound(key.to_string()));
    }

    fn on_endpoint_found(&self, endpoint: &str) {
        self.forward(CaptureEvent::EndpointFound(endpoint.to_string()));
    }

    fn on_error(&self, error: &CaptureError) {
        error!("Capture error: {}", error);
        self.forward(CaptureEvent::Error {
            message: error.to_string(),
        });
    }

    fn on_all_found(&self, result: &ExtractionResult) {
        self.forward(CaptureEvent::AllFound(result.clone()));
    }

    fn on_state_changed(&self, previous: SessionState, current: SessionState) {
        self.forward(CaptureEvent::StateChanged { previous, current });
    }
}
