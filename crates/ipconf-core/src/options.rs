//! BOOTP vendor extensions and DHCP options.
//!
//! Options are kept as an ordered list of tag/value pairs exactly as they
//! appeared on the wire. Tags may repeat; list-valued accessors on
//! [`WireMessage`](crate::message::WireMessage) concatenate every occurrence.

use std::fmt;
use std::net::Ipv4Addr;

/// Option tag numbers (RFC 2132)
pub mod tag {
    /// Padding, no length byte
    pub const PAD: u8 = 0;
    /// Subnet mask
    pub const SUBNET_MASK: u8 = 1;
    /// Default routers
    pub const ROUTER: u8 = 3;
    /// DNS servers
    pub const DNS_SERVERS: u8 = 6;
    /// Client host name
    pub const HOST_NAME: u8 = 12;
    /// DNS domain name
    pub const DOMAIN_NAME: u8 = 15;
    /// Root disk path
    pub const ROOT_PATH: u8 = 17;
    /// Interface MTU
    pub const INTERFACE_MTU: u8 = 26;
    /// Broadcast address
    pub const BROADCAST_ADDRESS: u8 = 28;
    /// NTP servers
    pub const NTP_SERVERS: u8 = 42;
    /// Requested IP address
    pub const REQUESTED_ADDRESS: u8 = 50;
    /// Lease time in seconds
    pub const LEASE_TIME: u8 = 51;
    /// sname/file fields carry options
    pub const OVERLOAD: u8 = 52;
    /// DHCP message type
    pub const MESSAGE_TYPE: u8 = 53;
    /// Server identifier
    pub const SERVER_ID: u8 = 54;
    /// Parameter request list
    pub const PARAMETER_REQUEST_LIST: u8 = 55;
    /// Server error text
    pub const MESSAGE: u8 = 56;
    /// Maximum DHCP message size
    pub const MAX_MESSAGE_SIZE: u8 = 57;
    /// Vendor class identifier
    pub const VENDOR_CLASS_ID: u8 = 60;
    /// End of options, no length byte
    pub const END: u8 = 255;
}

/// Parameters asked for in every DHCP request
pub const REQUESTED_PARAMETERS: [u8; 10] = [
    tag::SUBNET_MASK,
    tag::ROUTER,
    tag::DNS_SERVERS,
    tag::HOST_NAME,
    tag::DOMAIN_NAME,
    tag::ROOT_PATH,
    tag::BROADCAST_ADDRESS,
    tag::INTERFACE_MTU,
    tag::NTP_SERVERS,
    tag::LEASE_TIME,
];

/// Vendor class sent with DHCP messages
pub const VENDOR_CLASS: &str = "ipconf";

/// Largest message we accept (Ethernet MTU minus IPv4/UDP headers)
pub const MAX_MESSAGE_SIZE: u16 = 1472;

/// DHCP message type (option 53)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Client broadcast to locate servers
    Discover = 1,
    /// Server offer of parameters
    Offer = 2,
    /// Client request for offered parameters
    Request = 3,
    /// Client rejects an address already in use
    Decline = 4,
    /// Server commits parameters
    Ack = 5,
    /// Server refuses the request
    Nak = 6,
    /// Client relinquishes its lease
    Release = 7,
    /// Client asks for local parameters only
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(other),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discover => "DHCPDISCOVER",
            Self::Offer => "DHCPOFFER",
            Self::Request => "DHCPREQUEST",
            Self::Decline => "DHCPDECLINE",
            Self::Ack => "DHCPACK",
            Self::Nak => "DHCPNAK",
            Self::Release => "DHCPRELEASE",
            Self::Inform => "DHCPINFORM",
        };
        f.write_str(name)
    }
}

/// One tag/value option.
///
/// Values longer than 255 bytes are split into consecutive options of the
/// same tag when encoded (RFC 3396).
#[derive(Clone, PartialEq, Eq)]
pub struct DhcpOption {
    /// Option tag
    pub tag: u8,
    /// Raw option value
    pub value: Vec<u8>,
}

impl DhcpOption {
    /// Create an option from raw bytes
    pub fn new(tag: u8, value: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    /// Message type option
    #[must_use]
    pub fn message_type(kind: MessageType) -> Self {
        Self::new(tag::MESSAGE_TYPE, [kind as u8])
    }

    /// Single IPv4 address option
    #[must_use]
    pub fn ipv4(tag: u8, addr: Ipv4Addr) -> Self {
        Self::new(tag, addr.octets())
    }

    /// IPv4 address list option
    #[must_use]
    pub fn ipv4_list(tag: u8, addrs: &[Ipv4Addr]) -> Self {
        Self::new(tag, addrs.iter().flat_map(Ipv4Addr::octets).collect::<Vec<_>>())
    }

    /// 16-bit big-endian option
    #[must_use]
    pub fn u16(tag: u8, value: u16) -> Self {
        Self::new(tag, value.to_be_bytes())
    }

    /// 32-bit big-endian option
    #[must_use]
    pub fn u32(tag: u8, value: u32) -> Self {
        Self::new(tag, value.to_be_bytes())
    }

    /// Text option
    #[must_use]
    pub fn string(tag: u8, value: &str) -> Self {
        Self::new(tag, value.as_bytes())
    }

    /// Value as an IPv4 address, if exactly four bytes
    #[must_use]
    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        let octets: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(Ipv4Addr::from(octets))
    }

    /// Value as a big-endian u16, if exactly two bytes
    #[must_use]
    pub fn as_u16(&self) -> Option<u16> {
        let bytes: [u8; 2] = self.value.as_slice().try_into().ok()?;
        Some(u16::from_be_bytes(bytes))
    }

    /// Value as a big-endian u32, if exactly four bytes
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }
}

impl fmt::Debug for DhcpOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.tag, self.value.as_slice()) {
            (tag::MESSAGE_TYPE, [raw]) => match MessageType::try_from(*raw) {
                Ok(kind) => write!(f, "Opt({}, {kind})", self.tag),
                Err(raw) => write!(f, "Opt({}, type={raw})", self.tag),
            },
            (
                tag::SUBNET_MASK | tag::SERVER_ID | tag::REQUESTED_ADDRESS | tag::BROADCAST_ADDRESS,
                [a, b, c, d],
            ) => write!(f, "Opt({}, {})", self.tag, Ipv4Addr::new(*a, *b, *c, *d)),
            _ => write!(f, "Opt({}, {})", self.tag, hex::encode(&self.value)),
        }
    }
}
