//! Scripted capture backend.
//!
//! Serves prepared frames instead of live traffic. Used by tests and by the
//! command line `--replay` mode.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use etherparse::PacketBuilder;

use livekey_ipc::NetworkDevice;

use crate::backend::{CaptureBackend, PacketSource};
use crate::error::CaptureError;
use crate::packet::RawFrame;
use crate::CaptureResult;

/// Sleep of an exhausted source before reporting a read timeout.
const IDLE_READ: Duration = Duration::from_millis(10);

const SOURCE_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
const DESTINATION_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];
const SOURCE_IP: [u8; 4] = [192, 168, 1, 20];
const DESTINATION_IP: [u8; 4] = [203, 0, 113, 7];
const SOURCE_PORT: u16 = 50123;
const DESTINATION_PORT: u16 = 443;

/// Build an Ethernet/IPv4/TCP frame carrying `payload` to 203.0.113.7:443.
pub fn tcp_frame(payload: &[u8]) -> CaptureResult<RawFrame> {
    let builder = PacketBuilder::ethernet2(SOURCE_MAC, DESTINATION_MAC)
        .ipv4(SOURCE_IP, DESTINATION_IP, 64)
        .tcp(SOURCE_PORT, DESTINATION_PORT, 1, 65535);

    let mut buf = Vec::with_capacity(builder.size(payload.len()));
    builder
        .write(&mut buf, payload)
        .map_err(|e| CaptureError::Frame(e.to_string()))?;

    Ok(RawFrame::ethernet(buf))
}

/// A device and the frames it will deliver.
#[derive(Debug, Clone)]
pub struct ScriptedDevice {
    device: NetworkDevice,
    frames: Vec<RawFrame>,
    fail_open: bool,
    fail_filter: bool,
}

impl ScriptedDevice {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            device: NetworkDevice::new(name, description),
            frames: Vec::new(),
            fail_open: false,
            fail_filter: false,
        }
    }

    /// Deliver these frames in order.
    pub fn with_frames(mut self, frames: impl IntoIterator<Item = RawFrame>) -> Self {
        self.frames.extend(frames);
        self
    }

    /// Deliver each payload as one TCP segment.
    ///
    /// Payloads too large for a single segment are skipped.
    pub fn with_payloads<I, P>(mut self, payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        self.frames.extend(
            payloads
                .into_iter()
                .filter_map(|payload| tcp_frame(payload.as_ref()).ok()),
        );
        self
    }

    /// Opening this device fails.
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Setting a filter on this device fails.
    pub fn failing_filter(mut self) -> Self {
        self.fail_filter = true;
        self
    }
}

/// Activity counters shared by all sources of a backend.
#[derive(Debug, Default)]
pub struct ScriptCounters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    frames_read: AtomicUsize,
}

impl ScriptCounters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn frames_read(&self) -> usize {
        self.frames_read.load(Ordering::SeqCst)
    }
}

/// Backend serving scripted devices.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    devices: Vec<ScriptedDevice>,
    counters: Arc<ScriptCounters>,
}

impl ScriptedBackend {
    pub fn new(devices: Vec<ScriptedDevice>) -> Self {
        Self {
            devices,
            counters: Arc::default(),
        }
    }

    /// One device replaying a text file, one payload per non-empty line.
    pub fn from_payload_file(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let payloads = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect::<Vec<_>>();

        Ok(Self::new(vec![
            ScriptedDevice::new("replay", "Replay").with_payloads(payloads)
        ]))
    }

    pub fn counters(&self) -> Arc<ScriptCounters> {
        Arc::clone(&self.counters)
    }
}

impl CaptureBackend for ScriptedBackend {
    fn list_devices(&self) -> CaptureResult<Vec<NetworkDevice>> {
        Ok(self.devices.iter().map(|d| d.device.clone()).collect())
    }

    fn open_live(&self, device: &str) -> CaptureResult<Box<dyn PacketSource>> {
        let scripted = self
            .devices
            .iter()
            .find(|d| d.device.name == device)
            .ok_or_else(|| CaptureError::Open {
                device: device.to_string(),
                message: "no such device".to_string(),
            })?;

        if scripted.fail_open {
            return Err(CaptureError::Open {
                device: device.to_string(),
                message: "permission denied".to_string(),
            });
        }

        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            device: device.to_string(),
            frames: scripted.frames.iter().cloned().collect(),
            fail_filter: scripted.fail_filter,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct ScriptedSource {
    device: String,
    frames: VecDeque<RawFrame>,
    fail_filter: bool,
    counters: Arc<ScriptCounters>,
}

impl PacketSource for ScriptedSource {
    fn set_filter(&mut self, filter: &str) -> CaptureResult<()> {
        if self.fail_filter {
            return Err(CaptureError::Filter {
                device: self.device.clone(),
                message: format!("cannot compile {filter:?}"),
            });
        }
        Ok(())
    }

    fn next_packet(&mut self) -> CaptureResult<Option<RawFrame>> {
        match self.frames.pop_front() {
            Some(frame) => {
                self.counters.frames_read.fetch_add(1, Ordering::SeqCst);
                Ok(Some(frame))
            }
            None => {
                thread::sleep(IDLE_READ);
                Ok(None)
            }
        }
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::tcp_payload;

    #[test]
    fn test_frames_are_served_in_order_then_idle() {
        let backend = ScriptedBackend::new(vec![
            ScriptedDevice::new("eth0", "Ethernet").with_payloads(["one", "two"])
        ]);
        let mut source = backend.open_live("eth0").unwrap();

        let first = source.next_packet().unwrap().unwrap();
        assert_eq!(tcp_payload(&first).unwrap().data, b"one");
        let second = source.next_packet().unwrap().unwrap();
        assert_eq!(tcp_payload(&second).unwrap().data, b"two");
        assert!(source.next_packet().unwrap().is_none());

        drop(source);
        let counters = backend.counters();
        assert_eq!(counters.opened(), 1);
        assert_eq!(counters.closed(), 1);
        assert_eq!(counters.frames_read(), 2);
    }

    #[test]
    fn test_failure_switches() {
        let backend = ScriptedBackend::new(vec![
            ScriptedDevice::new("a", "A").failing_open(),
            ScriptedDevice::new("b", "B").failing_filter(),
        ]);

        assert!(matches!(
            backend.open_live("a"),
            Err(CaptureError::Open { .. })
        ));
        assert!(matches!(
            backend.open_live("missing"),
            Err(CaptureError::Open { .. })
        ));

        let mut source = backend.open_live("b").unwrap();
        assert!(matches!(
            source.set_filter("tcp"),
            Err(CaptureError::Filter { .. })
        ));
    }

    #[test]
    fn test_payload_file_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payloads.txt");
        std::fs::write(&path, "first\n\n  second  \n").unwrap();

        let backend = ScriptedBackend::from_payload_file(&path).unwrap();
        let devices = backend.list_devices().unwrap();
        assert_eq!(devices, vec![NetworkDevice::new("replay", "Replay")]);

        let mut source = backend.open_live("replay").unwrap();
        let frame = source.next_packet().unwrap().unwrap();
        assert_eq!(tcp_payload(&frame).unwrap().data, b"first");
        let frame = source.next_packet().unwrap().unwrap();
        assert_eq!(tcp_payload(&frame).unwrap().data, b"second");
    }
}
