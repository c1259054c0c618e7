//! Commands sent from the front end to the engine.

use serde::{Deserialize, Serialize};

use crate::types::{BootstrapConfig, CaptureConfig};

/// Commands that a front end can send to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineCommand {
    /// Start a capture session.
    StartCapture { config: CaptureConfig },

    /// Stop the capture session.
    StopCapture,

    /// Run the one-click go-live sequence.
    RunBootstrap { config: Box<BootstrapConfig> },

    /// Cancel the running bootstrap.
    CancelBootstrap,

    /// Request current engine state.
    GetState,

    /// Shutdown the engine completely.
    Shutdown,
}
