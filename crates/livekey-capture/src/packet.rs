//! Captured frames and TCP payload decoding.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use etherparse::{NetSlice, SlicedPacket, TransportSlice};

/// Link layer of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Ethernet II.
    Ethernet,

    /// Bare IPv4/IPv6 packet.
    RawIp,

    /// BSD loopback: 4-byte address family header, then IP.
    Null,
}

/// A frame as delivered by a capture source.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame bytes.
    pub data: Bytes,

    /// Link layer of `data`.
    pub link: LinkKind,
}

impl RawFrame {
    /// Create an Ethernet frame.
    pub fn ethernet(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            link: LinkKind::Ethernet,
        }
    }
}

/// Application payload of a TCP segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpPayload<'a> {
    /// Segment payload.
    pub data: &'a [u8],

    /// Destination address and port.
    pub destination: Option<SocketAddr>,
}

/// Decode the TCP payload of a frame.
///
/// Returns `None` for malformed frames, non-TCP traffic and empty segments.
pub fn tcp_payload(frame: &RawFrame) -> Option<TcpPayload<'_>> {
    let sliced = match frame.link {
        LinkKind::Ethernet => SlicedPacket::from_ethernet(&frame.data).ok()?,
        LinkKind::RawIp => SlicedPacket::from_ip(&frame.data).ok()?,
        LinkKind::Null => SlicedPacket::from_ip(frame.data.get(4..)?).ok()?,
    };

    let tcp = match sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => tcp,
        _ => return None,
    };

    let data = tcp.payload();
    if data.is_empty() {
        return None;
    }

    let ip: Option<IpAddr> = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => Some(ipv4.header().destination_addr().into()),
        Some(NetSlice::Ipv6(ipv6)) => Some(ipv6.header().destination_addr().into()),
        _ => None,
    };

    Some(TcpPayload {
        data,
        destination: ip.map(|ip| SocketAddr::new(ip, tcp.destination_port())),
    })
}
