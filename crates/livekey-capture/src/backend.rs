//! Capture driver abstraction.

use livekey_ipc::NetworkDevice;

use crate::packet::RawFrame;
use crate::CaptureResult;

/// Filter applied to every live capture: only TCP carries the credentials.
pub const TCP_FILTER: &str = "tcp";

/// Access to the packet capture driver.
pub trait CaptureBackend: Send + Sync {
    /// List the devices the driver can capture on.
    fn list_devices(&self) -> CaptureResult<Vec<NetworkDevice>>;

    /// Open a live capture on `device` (a driver-level name).
    fn open_live(&self, device: &str) -> CaptureResult<Box<dyn PacketSource>>;
}

/// An open live capture. Dropping it closes the underlying handle.
pub trait PacketSource: Send {
    /// Restrict capture with a filter expression.
    fn set_filter(&mut self, filter: &str) -> CaptureResult<()>;

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the read timeout expires without traffic;
    /// implementations must time out regularly so cancellation is noticed.
    fn next_packet(&mut self) -> CaptureResult<Option<RawFrame>>;
}

/// Backend used when live capture is not compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedBackend;

impl CaptureBackend for UnsupportedBackend {
    fn list_devices(&self) -> CaptureResult<Vec<NetworkDevice>> {
        Err(crate::CaptureError::NotSupported)
    }

    fn open_live(&self, _device: &str) -> CaptureResult<Box<dyn PacketSource>> {
        Err(crate::CaptureError::NotSupported)
    }
}
