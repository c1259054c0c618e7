//! Typed messages shared by the livekey crates.
//!
//! This crate defines the configuration, event and command types used
//! between the capture engine, the bootstrap orchestrator and the front end.

mod commands;
mod events;
mod state;
mod types;

pub use commands::EngineCommand;
pub use events::{
    BootstrapEvent, BootstrapProgress, CaptureEvent, EngineEvent, EngineStatus, FailureKind,
};
pub use state::{BootstrapStep, SessionState, StopReason};
pub use types::{
    BootstrapConfig, CaptureConfig, ControlKind, ControlTarget, ExtractionResult, NetworkDevice,
    TargetConfig, TimingConfig, ToolPaths, DEFAULT_KEY_PATTERN, DEFAULT_SERVER_PATTERN,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (front end → engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (engine → front end).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Channel capacity for capture session events.
pub const CAPTURE_EVENT_CAPACITY: usize = 64;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<EngineCommand>, Receiver<EngineCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}

/// Creates a bounded capture event channel.
pub fn capture_event_channel() -> (Sender<CaptureEvent>, Receiver<CaptureEvent>) {
    crossbeam_channel::bounded(CAPTURE_EVENT_CAPACITY)
}

/// Creates a bounded bootstrap event channel.
pub fn bootstrap_event_channel() -> (Sender<BootstrapEvent>, Receiver<BootstrapEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
