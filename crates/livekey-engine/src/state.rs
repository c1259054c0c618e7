//! Resources held by a bootstrap run and their cleanup.

use crossbeam_channel::Receiver;
use tracing::{debug, info, instrument};

use livekey_capture::CaptureSession;
use livekey_ipc::{BootstrapStep, CaptureEvent};

/// Resources acquired by the steps of one run.
#[derive(Default)]
pub struct RunResources {
    /// Capture session started in the capture step.
    pub capture: Option<CaptureSession>,

    /// Events of that session.
    pub capture_events: Option<Receiver<CaptureEvent>>,

    current_step: Option<BootstrapStep>,
}

impl RunResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `step` has begun.
    pub fn enter(&mut self, step: BootstrapStep) {
        self.current_step = Some(step);
    }

    /// Step currently running, if any.
    pub fn current_step(&self) -> Option<BootstrapStep> {
        self.current_step
    }

    /// Release everything acquired so far, newest first.
    ///
    /// Safe to call more than once.
    #[instrument(name = "release_run_resources", skip(self))]
    pub fn release(&mut self) {
        let Some(last) = self.current_step.take() else {
            return;
        };

        for step in BootstrapStep::ALL
            .iter()
            .rev()
            .filter(|step| step.number() <= last.number())
        {
            self.release_step(*step);
        }
    }

    fn release_step(&mut self, step: BootstrapStep) {
        match step {
            BootstrapStep::StartCapture => {
                if let Some(session) = self.capture.take() {
                    info!("Stopping bootstrap capture");
                    session.stop();
                }
                self.capture_events = None;
            }
            _ => debug!(%step, "Nothing to release"),
        }
    }
}

impl Drop for RunResources {
    fn drop(&mut self) {
        self.release();
    }
}
