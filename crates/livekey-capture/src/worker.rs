//! Per-interface capture worker.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use livekey_ipc::NetworkDevice;

use crate::backend::{CaptureBackend, TCP_FILTER};
use crate::packet::tcp_payload;
use crate::session::{CaptureHandle, Inspection, RunState};

/// Pause after a failed read before retrying.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Read errors between two log lines.
const READ_ERROR_LOG_EVERY: u32 = 100;

/// Capture on one device until the run is cancelled.
///
/// Calls `on_complete` if a frame read by this worker completed discovery.
pub(crate) fn run_worker(
    backend: Arc<dyn CaptureBackend>,
    device: NetworkDevice,
    run: Arc<RunState>,
    on_complete: impl FnOnce(),
) {
    let mut source = match backend.open_live(&device.name) {
        Ok(source) => source,
        Err(e) => {
            warn!(device = %device.description, "Failed to open capture: {}", e);
            run.stats.workers_failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    if let Err(e) = source.set_filter(TCP_FILTER) {
        warn!(device = %device.description, "Failed to set capture filter: {}", e);
        run.stats.workers_failed.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let handle = Arc::new(CaptureHandle::new(device.name.clone(), source));
    if !run.register(Arc::clone(&handle)) {
        handle.close();
        return;
    }

    info!(device = %device.description, "Capture worker listening");

    let completed = read_loop(&handle, &run, &device);
    handle.close();

    debug!(device = %device.description, "Capture worker stopped");

    if completed {
        on_complete();
    }
}

fn read_loop(handle: &CaptureHandle, run: &RunState, device: &NetworkDevice) -> bool {
    let mut read_errors: u32 = 0;

    while !run.is_cancelled() {
        let frame = match handle.next_packet() {
            None => return false,
            Some(Ok(Some(frame))) => {
                read_errors = 0;
                frame
            }
            Some(Ok(None)) => continue,
            Some(Err(e)) => {
                if read_errors % READ_ERROR_LOG_EVERY == 0 {
                    debug!(device = %device.description, "Read failed: {}", e);
                }
                read_errors = read_errors.wrapping_add(1);
                thread::sleep(READ_ERROR_BACKOFF);
                continue;
            }
        };

        run.stats.frames.fetch_add(1, Ordering::Relaxed);

        let Some(segment) = tcp_payload(&frame) else {
            continue;
        };
        trace!(len = segment.data.len(), "TCP payload");

        match run.inspect(segment.data, segment.destination) {
            Inspection::Completed => return true,
            Inspection::Done => return false,
            Inspection::Pending => {}
        }
    }

    false
}
