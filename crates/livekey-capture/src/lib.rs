//! Passive network capture for stream ingest credentials.
//!
//! This crate listens on the selected network interfaces, decodes TCP
//! payloads and reports the ingest server URL and stream key once each.

mod backend;
mod error;
mod interface;
mod matcher;
mod observer;
mod packet;
#[cfg(feature = "pcap")]
mod pcap_backend;
mod replay;
mod session;
mod worker;

use std::sync::Arc;

pub use backend::{CaptureBackend, PacketSource, UnsupportedBackend, TCP_FILTER};
pub use error::{CaptureError, PatternKind};
pub use interface::{select_interfaces, DENIED_DESCRIPTIONS};
pub use matcher::PatternMatcher;
pub use observer::CaptureObserver;
pub use packet::{tcp_payload, LinkKind, RawFrame, TcpPayload};
#[cfg(feature = "pcap")]
pub use pcap_backend::PcapBackend;
pub use replay::{tcp_frame, ScriptCounters, ScriptedBackend, ScriptedDevice};
pub use session::{CaptureSession, Discovered};

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// The live capture backend of this build.
pub fn system_backend() -> Arc<dyn CaptureBackend> {
    #[cfg(feature = "pcap")]
    {
        Arc::new(PcapBackend)
    }

    #[cfg(not(feature = "pcap"))]
    {
        Arc::new(UnsupportedBackend)
    }
}
