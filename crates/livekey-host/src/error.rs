//! Error types for the host module.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by host collaborators.
#[derive(Debug, Error)]
pub enum HostError {
    /// A process could not be started.
    #[error("Failed to launch {}: {message}", path.display())]
    Launch { path: PathBuf, message: String },

    /// A process could not be terminated.
    #[error("Failed to terminate process {pid}: {message}")]
    Kill { pid: u32, message: String },

    /// The process list could not be read.
    #[error("Failed to list processes: {0}")]
    ProcessList(String),

    /// The automation helper could not run or exited with an error.
    #[error("Automation helper failed for {control:?}: {message}")]
    Helper { control: String, message: String },

    /// The automation helper did not finish in time.
    #[error("Automation helper timed out after {}s for {control:?}", timeout.as_secs())]
    HelperTimeout { control: String, timeout: Duration },

    /// The automation helper printed something that is not a report.
    #[error("Unreadable automation helper output for {control:?}: {message}")]
    HelperOutput { control: String, message: String },

    /// The helper could not find the control.
    #[error("Control {control:?} not found: {message}")]
    ControlNotFound { control: String, message: String },

    /// The helper found the control but did not click it.
    #[error("Control {control:?} was found but not clicked")]
    NotClicked { control: String },

    /// No visible window of the application could be focused.
    #[error("No visible window titled {app:?}")]
    WindowNotFound { app: String },

    /// The settings file could not be updated.
    #[error("Settings file {}: {message}", path.display())]
    Settings { path: PathBuf, message: String },

    /// The server is not an RTMP URL.
    #[error("Invalid ingest server {0:?}")]
    InvalidServer(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
