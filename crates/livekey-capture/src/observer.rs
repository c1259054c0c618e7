//! Discovery notifications.

use crossbeam_channel::Sender;
use tracing::warn;

use livekey_ipc::{CaptureEvent, ExtractionResult, SessionState};

use crate::error::CaptureError;

/// Receives discovery notifications from a capture session.
///
/// Methods are called from worker threads. Each discovery method is called
/// at most once per session run.
pub trait CaptureObserver: Send + Sync {
    /// The ingest server URL was found.
    fn on_server_found(&self, server: &str);

    /// The stream key was found.
    fn on_key_found(&self, key: &str);

    /// The remote endpoint of the packet carrying the key.
    fn on_endpoint_found(&self, _endpoint: &str) {}

    /// The session could not start.
    fn on_error(&self, error: &CaptureError);

    /// Both values were found; the session is stopping.
    fn on_all_found(&self, result: &ExtractionResult);

    /// Session state changed.
    fn on_state_changed(&self, _previous: SessionState, _current: SessionState) {}
}

impl CaptureObserver for Sender<CaptureEvent> {
    fn on_server_found(&self, server: &str) {
        deliver(self, CaptureEvent::ServerFound(server.to_string()));
    }

    fn on_key_found(&self, key: &str) {
        deliver(self, CaptureEvent::KeyFound(key.to_string()));
    }

    fn on_endpoint_found(&self, endpoint: &str) {
        deliver(self, CaptureEvent::EndpointFound(endpoint.to_string()));
    }

    fn on_error(&self, error: &CaptureError) {
        deliver(
            self,
            CaptureEvent::Error {
                message: error.to_string(),
            },
        );
    }

    fn on_all_found(&self, result: &ExtractionResult) {
        deliver(self, CaptureEvent::AllFound(result.clone()));
    }

    fn on_state_changed(&self, previous: SessionState, current: SessionState) {
        deliver(self, CaptureEvent::StateChanged { previous, current });
    }
}

/// Discovery events are never dropped; state changes are best effort.
fn deliver(sender: &Sender<CaptureEvent>, event: CaptureEvent) {
    let result = match event {
        CaptureEvent::StateChanged { .. } => sender.try_send(event).map_err(|e| e.to_string()),
        _ => sender.send(event).map_err(|e| e.to_string()),
    };
    if let Err(e) = result {
        warn!("Failed to send capture event: {}", e);
    }
}
