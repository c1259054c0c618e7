//! Events published by the capture session, the bootstrap and the engine.

use serde::{Deserialize, Serialize};

use crate::state::{BootstrapStep, SessionState};
use crate::types::ExtractionResult;

/// Events emitted by a capture session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureEvent {
    /// Session state has changed.
    StateChanged {
        previous: SessionState,
        current: SessionState,
    },

    /// Ingest server URL discovered.
    ServerFound(String),

    /// Stream key discovered.
    KeyFound(String),

    /// Remote endpoint the key was sent to.
    EndpointFound(String),

    /// Both server and key have been discovered.
    AllFound(ExtractionResult),

    /// The session could not start.
    Error { message: String },
}

/// How a bootstrap failure should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Missing or invalid configuration, detected before any side effect.
    Configuration,

    /// Credentials were not discovered in time.
    Timeout,

    /// A step failed while running.
    Runtime,

    /// The run was cancelled.
    Cancelled,
}

/// Progress of a bootstrap run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapProgress {
    /// Step about to run, `None` once the run has completed.
    pub step: Option<BootstrapStep>,

    /// Steps completed so far.
    pub completed: usize,

    /// Completed fraction (0.0 - 1.0).
    pub fraction: f32,

    /// Status line for display.
    pub message: String,
}

impl BootstrapProgress {
    /// Progress reported as `step` begins.
    pub fn starting(step: BootstrapStep) -> Self {
        Self {
            step: Some(step),
            completed: step.number() - 1,
            fraction: step.progress(),
            message: step.name().to_string(),
        }
    }

    /// Progress reported once every step has run.
    pub fn finished() -> Self {
        Self {
            step: None,
            completed: BootstrapStep::COUNT,
            fraction: 1.0,
            message: "Done".to_string(),
        }
    }
}

/// Events emitted by a bootstrap run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BootstrapEvent {
    /// A step is starting.
    Progress(BootstrapProgress),

    /// Non-fatal problem (closing the companion failed).
    Warning { step: BootstrapStep, message: String },

    /// Run finished successfully.
    Completed(ExtractionResult),

    /// Run aborted.
    Failed {
        /// Step that failed, `None` for pre-flight failures.
        step: Option<BootstrapStep>,

        /// Failure class.
        kind: FailureKind,

        /// Error message.
        message: String,
    },
}

impl BootstrapEvent {
    /// Returns true for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed { .. })
    }
}

/// Engine status snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Manual capture session state.
    pub capture: SessionState,

    /// Whether a bootstrap run is in progress.
    pub bootstrap_running: bool,
}

/// Events that the engine sends to its front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Engine is ready.
    Ready,

    /// Event from the manually started capture session.
    Capture(CaptureEvent),

    /// Event from a bootstrap run.
    Bootstrap(BootstrapEvent),

    /// Answer to a state request.
    State(EngineStatus),

    /// Engine has shut down.
    Shutdown,
}
