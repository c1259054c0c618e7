//! Go-live orchestration for livekey.
//!
//! This crate runs the seven step bootstrap (launch the companion, capture
//! credentials, configure and start the broadcaster) and the command loop
//! that front ends drive.

mod bootstrap;
mod error;
mod orchestrator;
mod preflight;
mod state;
#[cfg(test)]
mod testing;

use std::sync::Arc;

pub use bootstrap::{spawn_bootstrap, BootstrapHandle, Collaborators};
pub use error::BootstrapError;
pub use orchestrator::{CollaboratorFactory, Engine};
pub use preflight::{
    preflight, validate_timing, MIN_CHECK_INTERVAL, MIN_DISCOVERY_TIMEOUT, MIN_HELPER_TIMEOUT,
};
pub use state::RunResources;

use crossbeam_channel::{Receiver, Sender};
use livekey_capture::CaptureBackend;
use livekey_ipc::{EngineCommand, EngineEvent};

/// Result type for bootstrap operations.
pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Create an engine that drives the real host through `backend`.
pub fn create_engine(
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    backend: Arc<dyn CaptureBackend>,
) -> Engine {
    let collaborator_backend = Arc::clone(&backend);
    let factory: CollaboratorFactory = Box::new(move |config| {
        Collaborators::system(Arc::clone(&collaborator_backend), config)
    });
    Engine::new(command_rx, event_tx, backend, factory)
}
