//! Live capture through libpcap / Npcap.

use bytes::Bytes;
use pcap::{Active, Capture, Device, Linktype};
use tracing::debug;

use livekey_ipc::NetworkDevice;

use crate::backend::{CaptureBackend, PacketSource};
use crate::error::CaptureError;
use crate::packet::{LinkKind, RawFrame};
use crate::CaptureResult;

/// Bytes captured per packet.
const SNAPLEN: i32 = 65535;

/// Read timeout in milliseconds; bounds how long a stop waits on a worker.
const READ_TIMEOUT_MS: i32 = 200;

/// Backend over the system packet capture driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct PcapBackend;

impl CaptureBackend for PcapBackend {
    fn list_devices(&self) -> CaptureResult<Vec<NetworkDevice>> {
        let devices = Device::list().map_err(|e| CaptureError::DeviceList(e.to_string()))?;

        Ok(devices
            .into_iter()
            .map(|device| {
                let description = device.desc.unwrap_or_else(|| device.name.clone());
                NetworkDevice::new(device.name, description)
            })
            .collect())
    }

    fn open_live(&self, device: &str) -> CaptureResult<Box<dyn PacketSource>> {
        let open_error = |e: pcap::Error| CaptureError::Open {
            device: device.to_string(),
            message: e.to_string(),
        };

        let capture = Capture::from_device(device)
            .map_err(open_error)?
            .promisc(true)
            .snaplen(SNAPLEN)
            .timeout(READ_TIMEOUT_MS)
            .immediate_mode(true)
            .open()
            .map_err(open_error)?;

        let link = link_kind(capture.get_datalink());
        debug!(device, ?link, "Opened live capture");

        Ok(Box::new(PcapSource {
            device: device.to_string(),
            capture,
            link,
        }))
    }
}

fn link_kind(linktype: Linktype) -> LinkKind {
    match linktype.0 {
        0 => LinkKind::Null,
        12 | 101 => LinkKind::RawIp,
        _ => LinkKind::Ethernet,
    }
}

struct PcapSource {
    device: String,
    capture: Capture<Active>,
    link: LinkKind,
}

impl PacketSource for PcapSource {
    fn set_filter(&mut self, filter: &str) -> CaptureResult<()> {
        self.capture
            .filter(filter, true)
            .map_err(|e| CaptureError::Filter {
                device: self.device.clone(),
                message: e.to_string(),
            })
    }

    fn next_packet(&mut self) -> CaptureResult<Option<RawFrame>> {
        match self.capture.next_packet() {
            Ok(packet) => Ok(Some(RawFrame {
                data: Bytes::copy_from_slice(packet.data),
                link: self.link,
            })),
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
