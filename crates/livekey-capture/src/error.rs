//! Error types for the capture module.

use thiserror::Error;

/// Which credential a pattern extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Server,
    Key,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Key => f.write_str("stream key"),
        }
    }
}

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// A configured pattern does not compile.
    #[error("Invalid {kind} pattern {pattern:?}: {message}")]
    InvalidPattern {
        kind: PatternKind,
        pattern: String,
        message: String,
    },

    /// No interface left after selection.
    #[error("No usable network interface found")]
    NoInterfaces,

    /// The driver could not enumerate devices.
    #[error("Failed to list network interfaces: {0}")]
    DeviceList(String),

    /// A device could not be opened for live capture.
    #[error("Failed to open {device} for capture: {message}")]
    Open { device: String, message: String },

    /// The capture filter was rejected.
    #[error("Failed to set filter on {device}: {message}")]
    Filter { device: String, message: String },

    /// Reading the next packet failed.
    #[error("Capture read error: {0}")]
    Read(String),

    /// A scripted frame could not be built.
    #[error("Failed to build frame: {0}")]
    Frame(String),

    /// Capture already started.
    #[error("Capture already started")]
    AlreadyStarted,

    /// Live capture is not compiled in.
    #[error("Live capture is not supported by this build")]
    NotSupported,
}

#[cfg(feature = "pcap")]
impl From<pcap::Error> for CaptureError {
    fn from(err: pcap::Error) -> Self {
        Self::Read(err.to_string())
    }
}
