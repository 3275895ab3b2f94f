//! IPv4/UDP framing for configuration traffic.
//!
//! Before an address is configured, nothing in the kernel will route or
//! deliver configuration traffic for us, so outgoing payloads are wrapped in
//! hand-built IPv4 and UDP headers and incoming frames are validated here.
//! All multi-byte fields are big-endian (network byte order).
//!
//! ```text
//!  0      20      28                      28 + payload
//!  +------+-------+-----------------------+
//!  | IPv4 |  UDP  |  BOOTP/DHCP payload   |
//!  +------+-------+-----------------------+
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;

/// UDP port the configuration server listens on
pub const SERVER_PORT: u16 = 67;

/// UDP port the configuration client listens on
pub const CLIENT_PORT: u16 = 68;

/// IPv4 header size without options
pub const IPV4_HEADER_LEN: usize = 20;

/// UDP header size
pub const UDP_HEADER_LEN: usize = 8;

/// Combined header overhead of an option-less frame
pub const FRAME_OVERHEAD: usize = IPV4_HEADER_LEN + UDP_HEADER_LEN;

const IPPROTO_UDP: u8 = 17;
const DEFAULT_TTL: u8 = 64;
const MAX_PAYLOAD: usize = u16::MAX as usize - FRAME_OVERHEAD;

/// Frame validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// Frame too short to hold the headers
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Not an IPv4 packet or invalid header length
    #[error("not an IPv4 packet")]
    NotIpv4,

    /// IPv4 header checksum mismatch
    #[error("IPv4 header checksum mismatch")]
    BadIpChecksum,

    /// Fragmented datagrams are not reassembled
    #[error("fragmented datagram")]
    Fragmented,

    /// Protocol field is not UDP
    #[error("not a UDP datagram (protocol {0})")]
    NotUdp(u8),

    /// Declared length exceeds the received buffer
    #[error("declared length exceeds frame size")]
    LengthOverflow,

    /// UDP checksum mismatch
    #[error("UDP checksum mismatch")]
    BadUdpChecksum,

    /// Datagram is not server-to-client configuration traffic
    #[error("unexpected ports {src} -> {dst}")]
    WrongPorts {
        /// Source port
        src: u16,
        /// Destination port
        dst: u16,
    },

    /// Payload does not fit in one datagram
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

/// Zero-copy view of a validated UDP datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datagram<'a> {
    /// Source address and port
    pub src: SocketAddrV4,
    /// Destination address and port
    pub dst: SocketAddrV4,
    /// UDP payload
    pub payload: &'a [u8],
}

/// Wrap `payload` in IPv4 and UDP headers.
///
/// # Errors
///
/// Returns `FramingError::PayloadTooLarge` if the result would not fit in
/// one IPv4 datagram.
pub fn encapsulate(
    payload: &[u8],
    src: SocketAddrV4,
    dst: SocketAddrV4,
) -> Result<Vec<u8>, FramingError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FramingError::PayloadTooLarge(payload.len()));
    }

    let total_len = (FRAME_OVERHEAD + payload.len()) as u16;
    let udp_len = (UDP_HEADER_LEN + payload.len()) as u16;
    let mut buf = Vec::with_capacity(total_len as usize);

    // IPv4 header
    buf.push(0x45); // version 4, IHL 5
    buf.push(0x00); // DSCP/ECN
    buf.extend_from_slice(&total_len.to_be_bytes());
    buf.extend_from_slice(&[0x00, 0x00]); // identification
    buf.extend_from_slice(&[0x00, 0x00]); // flags + fragment offset
    buf.push(DEFAULT_TTL);
    buf.push(IPPROTO_UDP);
    buf.extend_from_slice(&[0x00, 0x00]); // checksum, filled below
    buf.extend_from_slice(&src.ip().octets());
    buf.extend_from_slice(&dst.ip().octets());

    let ip_sum = checksum(0, &buf[..IPV4_HEADER_LEN]);
    buf[10..12].copy_from_slice(&ip_sum.to_be_bytes());

    // UDP header
    buf.extend_from_slice(&src.port().to_be_bytes());
    buf.extend_from_slice(&dst.port().to_be_bytes());
    buf.extend_from_slice(&udp_len.to_be_bytes());
    buf.extend_from_slice(&[0x00, 0x00]); // checksum, filled below
    buf.extend_from_slice(payload);

    let udp_sum = match udp_checksum(*src.ip(), *dst.ip(), &buf[IPV4_HEADER_LEN..]) {
        0 => 0xFFFF,
        sum => sum,
    };
    buf[IPV4_HEADER_LEN + 6..IPV4_HEADER_LEN + 8].copy_from_slice(&udp_sum.to_be_bytes());

    Ok(buf)
}

/// Frame a client message: `0.0.0.0:68 -> 255.255.255.255:67`.
///
/// # Errors
///
/// Returns `FramingError::PayloadTooLarge` for oversize payloads.
pub fn client_frame(payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    encapsulate(
        payload,
        SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, CLIENT_PORT),
        SocketAddrV4::new(Ipv4Addr::BROADCAST, SERVER_PORT),
    )
}

/// Frame a server reply: `server:67 -> dst:68`.
///
/// # Errors
///
/// Returns `FramingError::PayloadTooLarge` for oversize payloads.
pub fn server_frame(
    payload: &[u8],
    server: Ipv4Addr,
    dst: Ipv4Addr,
) -> Result<Vec<u8>, FramingError> {
    encapsulate(
        payload,
        SocketAddrV4::new(server, SERVER_PORT),
        SocketAddrV4::new(dst, CLIENT_PORT),
    )
}

/// Validate IPv4 and UDP headers and return a view of the datagram.
///
/// # Errors
///
/// Returns a `FramingError` describing the first violated check.
pub fn decapsulate(frame: &[u8]) -> Result<Datagram<'_>, FramingError> {
    if frame.len() < FRAME_OVERHEAD {
        return Err(FramingError::TooShort {
            expected: FRAME_OVERHEAD,
            actual: frame.len(),
        });
    }

    if frame[0] >> 4 != 4 {
        return Err(FramingError::NotIpv4);
    }
    let ihl = usize::from(frame[0] & 0x0F) * 4;
    if ihl < IPV4_HEADER_LEN {
        return Err(FramingError::NotIpv4);
    }

    let total_len = usize::from(u16::from_be_bytes([frame[2], frame[3]]));
    if total_len > frame.len() || total_len < ihl + UDP_HEADER_LEN {
        return Err(FramingError::LengthOverflow);
    }

    if checksum(0, &frame[..ihl]) != 0 {
        return Err(FramingError::BadIpChecksum);
    }

    let frag = u16::from_be_bytes([frame[6], frame[7]]);
    if frag & 0x3FFF != 0 {
        return Err(FramingError::Fragmented);
    }

    if frame[9] != IPPROTO_UDP {
        return Err(FramingError::NotUdp(frame[9]));
    }

    let src_ip = Ipv4Addr::new(frame[12], frame[13], frame[14], frame[15]);
    let dst_ip = Ipv4Addr::new(frame[16], frame[17], frame[18], frame[19]);

    // Link layers may pad short frames; trust the IP total length.
    let udp = &frame[ihl..total_len];
    let src_port = u16::from_be_bytes([udp[0], udp[1]]);
    let dst_port = u16::from_be_bytes([udp[2], udp[3]]);
    let udp_len = usize::from(u16::from_be_bytes([udp[4], udp[5]]));
    if udp_len < UDP_HEADER_LEN || udp_len > udp.len() {
        return Err(FramingError::LengthOverflow);
    }
    let udp = &udp[..udp_len];

    let udp_sum = u16::from_be_bytes([udp[6], udp[7]]);
    if udp_sum != 0 && udp_checksum(src_ip, dst_ip, udp) != 0 {
        return Err(FramingError::BadUdpChecksum);
    }

    Ok(Datagram {
        src: SocketAddrV4::new(src_ip, src_port),
        dst: SocketAddrV4::new(dst_ip, dst_port),
        payload: &udp[UDP_HEADER_LEN..],
    })
}

/// Validate a frame and return its payload if it is server-to-client
/// configuration traffic (port 67 -> 68).
///
/// # Errors
///
/// Returns a `FramingError` if the frame is invalid or addressed elsewhere.
pub fn client_payload(frame: &[u8]) -> Result<&[u8], FramingError> {
    let datagram = decapsulate(frame)?;
    if datagram.src.port() != SERVER_PORT || datagram.dst.port() != CLIENT_PORT {
        return Err(FramingError::WrongPorts {
            src: datagram.src.port(),
            dst: datagram.dst.port(),
        });
    }
    Ok(datagram.payload)
}

/// UDP checksum over the pseudo header and the UDP segment.
///
/// Returns 0 when computed over a segment that carries a correct checksum.
fn udp_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> u16 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src.octets());
    pseudo[4..8].copy_from_slice(&dst.octets());
    pseudo[9] = IPPROTO_UDP;
    pseudo[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());

    checksum(sum_words(0, &pseudo), segment)
}

/// One's-complement checksum of `data`, continuing from a partial sum.
fn checksum(initial: u32, data: &[u8]) -> u16 {
    let mut sum = sum_words(initial, data);
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

fn sum_words(initial: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    let mut sum = initial;
    for word in &mut chunks {
        sum = sum.wrapping_add(u32::from(u16::from_be_bytes([word[0], word[1]])));
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add(u32::from(*last) << 8);
    }
    sum
}
