//! Error types for the engine.

use std::time::Duration;

use thiserror::Error;

use livekey_capture::CaptureError;
use livekey_host::HostError;
use livekey_ipc::FailureKind;

/// Errors that end a bootstrap run.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Invalid or incomplete configuration.
    #[error("{0}")]
    Config(String),

    /// The broadcaster must not be running at this point.
    #[error("{name} is running (pid {pid}); close it first")]
    BroadcasterRunning { name: String, pid: u32 },

    /// A terminated broadcaster was still listed when the wait ran out.
    #[error("{name} (pid {pid}) did not exit within {}s of being terminated", timeout.as_secs())]
    StillRunning {
        name: String,
        pid: u32,
        timeout: Duration,
    },

    /// The capture session failed.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// A host collaborator failed.
    #[error(transparent)]
    Host(#[from] HostError),

    /// The capture session went away while waiting for credentials.
    #[error("Capture session ended before credentials were found")]
    CaptureEnded,

    /// Credentials were not discovered in time.
    #[error("No stream credentials seen within {}s; check the network settings and retry", .0.as_secs())]
    Timeout(Duration),

    /// The run was cancelled.
    #[error("Cancelled")]
    Cancelled,

    /// Another run is in progress.
    #[error("A go-live run is already in progress")]
    Busy,
}

impl BootstrapError {
    /// How the failure should be presented.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Config(_) | Self::Busy => FailureKind::Configuration,
            Self::Capture(CaptureError::NoInterfaces | CaptureError::InvalidPattern { .. }) => {
                FailureKind::Configuration
            }
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Cancelled => FailureKind::Cancelled,
            Self::BroadcasterRunning { .. }
            | Self::StillRunning { .. }
            | Self::CaptureEnded
            | Self::Capture(_)
            | Self::Host(_) => {
                FailureKind::Runtime
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            BootstrapError::Capture(CaptureError::NoInterfaces).kind(),
            FailureKind::Configuration
        );
        assert_eq!(
            BootstrapError::Capture(CaptureError::Read("x".into())).kind(),
            FailureKind::Runtime
        );
        assert_eq!(
            BootstrapError::StillRunning {
                name: "obs64.exe".into(),
                pid: 42,
                timeout: Duration::from_secs(30),
            }
            .kind(),
            FailureKind::Runtime
        );
        assert_eq!(
            BootstrapError::Timeout(Duration::from_secs(20)).kind(),
            FailureKind::Timeout
        );
        assert_eq!(BootstrapError::Cancelled.kind(), FailureKind::Cancelled);
    }

    #[test]
    fn test_timeout_message() {
        assert!(BootstrapError::Timeout(Duration::from_secs(20))
            .to_string()
            .contains("20s"));
    }
}
