//! BOOTP/DHCP message encoding and decoding.
//!
//! ## Layout (RFC 951 / RFC 2131)
//!
//! ```text
//!  0       1       2       3
//!  +-------+-------+-------+-------+
//!  |  op   | htype | hlen  | hops  |
//!  +-------+-------+-------+-------+
//!  |             xid               |
//!  +---------------+---------------+
//!  |     secs      |     flags     |
//!  +---------------+---------------+
//!  |     ciaddr / yiaddr / siaddr / giaddr (4 x 4)
//!  +-------------------------------+
//!  |     chaddr (16)               |
//!  |     sname  (64)               |
//!  |     file   (128)              |
//!  +-------------------------------+  offset 236
//!  |     magic cookie 99.130.83.99 |
//!  +-------------------------------+  offset 240
//!  |     options ... END (255)     |
//!  +-------------------------------+
//! ```
//!
//! Encoded messages are zero-padded to the 300-byte BOOTP minimum.

use crate::error::CodecError;
use crate::options::{self, DhcpOption, MessageType, tag};
use ipconf_transport::HardwareAddr;
use std::fmt;
use std::net::Ipv4Addr;

/// Fixed header size, up to the magic cookie
pub const HEADER_LEN: usize = 236;

/// Magic cookie marking the start of the options area
pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// Smallest valid buffer: header plus cookie
pub const MIN_DECODE_LEN: usize = HEADER_LEN + MAGIC_COOKIE.len();

/// Minimum encoded size
pub const MIN_MESSAGE_LEN: usize = 300;

/// Ethernet hardware type
pub const HTYPE_ETHERNET: u8 = 1;

/// Ask servers to broadcast their replies
pub const FLAG_BROADCAST: u16 = 0x8000;

const CHADDR_LEN: usize = 16;
const SNAME_LEN: usize = 64;
const FILE_LEN: usize = 128;
const SNAME_OFFSET: usize = 44;
const FILE_OFFSET: usize = SNAME_OFFSET + SNAME_LEN;

/// BOOTP operation code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Client to server
    BootRequest = 1,
    /// Server to client
    BootReply = 2,
}

impl TryFrom<u8> for OpCode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::BootRequest),
            2 => Ok(Self::BootReply),
            other => Err(CodecError::InvalidOpCode(other)),
        }
    }
}

/// Decoded BOOTP/DHCP message
#[derive(Clone, PartialEq, Eq)]
pub struct WireMessage {
    /// Operation code
    pub op: OpCode,
    /// Hardware address type
    pub htype: u8,
    /// Hardware address length
    pub hlen: u8,
    /// Relay hop count
    pub hops: u8,
    /// Transaction id
    pub xid: u32,
    /// Seconds since the client began acquisition
    pub secs: u16,
    /// Flags (bit 15: broadcast)
    pub flags: u16,
    /// Client address (filled in by clients that already have one)
    pub ciaddr: Ipv4Addr,
    /// Address assigned to the client
    pub yiaddr: Ipv4Addr,
    /// Next server to use in bootstrap
    pub siaddr: Ipv4Addr,
    /// Relay agent address
    pub giaddr: Ipv4Addr,
    /// Client hardware address
    pub chaddr: [u8; CHADDR_LEN],
    /// Server host name, NUL terminated
    pub sname: [u8; SNAME_LEN],
    /// Boot file name, NUL terminated
    pub file: [u8; FILE_LEN],
    /// Options in wire order
    pub options: Vec<DhcpOption>,
}

impl fmt::Debug for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hlen = usize::from(self.hlen).min(CHADDR_LEN);
        f.debug_struct("WireMessage")
            .field("op", &self.op)
            .field("xid", &format_args!("{:#010x}", self.xid))
            .field("chaddr", &hex::encode(&self.chaddr[..hlen]))
            .field("yiaddr", &self.yiaddr)
            .field("siaddr", &self.siaddr)
            .field("options", &self.options)
            .finish()
    }
}

impl WireMessage {
    /// Bare client request with no options
    #[must_use]
    pub fn request(xid: u32, hwaddr: HardwareAddr) -> Self {
        let mut chaddr = [0u8; CHADDR_LEN];
        chaddr[..hwaddr.as_bytes().len()].copy_from_slice(hwaddr.as_bytes());
        Self {
            op: OpCode::BootRequest,
            htype: HTYPE_ETHERNET,
            hlen: hwaddr.as_bytes().len() as u8,
            hops: 0,
            xid,
            secs: 0,
            flags: FLAG_BROADCAST,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            sname: [0; SNAME_LEN],
            file: [0; FILE_LEN],
            options: Vec::new(),
        }
    }

    /// DHCPDISCOVER
    #[must_use]
    pub fn discover(xid: u32, hwaddr: HardwareAddr) -> Self {
        let mut msg = Self::request(xid, hwaddr);
        msg.options.push(DhcpOption::message_type(MessageType::Discover));
        msg.push_client_parameters();
        msg
    }

    /// DHCPREQUEST for an offered address
    #[must_use]
    pub fn dhcp_request(
        xid: u32,
        hwaddr: HardwareAddr,
        requested: Ipv4Addr,
        server_id: Option<Ipv4Addr>,
    ) -> Self {
        let mut msg = Self::request(xid, hwaddr);
        msg.options.push(DhcpOption::message_type(MessageType::Request));
        msg.options
            .push(DhcpOption::ipv4(tag::REQUESTED_ADDRESS, requested));
        if let Some(server) = server_id {
            msg.options.push(DhcpOption::ipv4(tag::SERVER_ID, server));
        }
        msg.push_client_parameters();
        msg
    }

    /// Plain BOOTP request (cookie and END only)
    #[must_use]
    pub fn bootp_request(xid: u32, hwaddr: HardwareAddr) -> Self {
        Self::request(xid, hwaddr)
    }

    fn push_client_parameters(&mut self) {
        self.options.push(DhcpOption::u16(
            tag::MAX_MESSAGE_SIZE,
            options::MAX_MESSAGE_SIZE,
        ));
        self.options.push(DhcpOption::new(
            tag::PARAMETER_REQUEST_LIST,
            options::REQUESTED_PARAMETERS,
        ));
        self.options
            .push(DhcpOption::string(tag::VENDOR_CLASS_ID, options::VENDOR_CLASS));
    }

    /// BOOTP reply to `request` assigning `yiaddr`
    #[must_use]
    pub fn reply(request: &WireMessage, yiaddr: Ipv4Addr, siaddr: Ipv4Addr) -> Self {
        Self {
            op: OpCode::BootReply,
            htype: request.htype,
            hlen: request.hlen,
            hops: 0,
            xid: request.xid,
            secs: 0,
            flags: request.flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr,
            siaddr,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            sname: [0; SNAME_LEN],
            file: [0; FILE_LEN],
            options: Vec::new(),
        }
    }

    /// DHCPOFFER answering `request`
    #[must_use]
    pub fn offer(request: &WireMessage, yiaddr: Ipv4Addr, server_id: Ipv4Addr) -> Self {
        Self::reply(request, yiaddr, server_id)
            .with_option(DhcpOption::message_type(MessageType::Offer))
            .with_option(DhcpOption::ipv4(tag::SERVER_ID, server_id))
    }

    /// DHCPACK answering `request`
    #[must_use]
    pub fn ack(request: &WireMessage, yiaddr: Ipv4Addr, server_id: Ipv4Addr) -> Self {
        Self::reply(request, yiaddr, server_id)
            .with_option(DhcpOption::message_type(MessageType::Ack))
            .with_option(DhcpOption::ipv4(tag::SERVER_ID, server_id))
    }

    /// DHCPNAK answering `request`
    #[must_use]
    pub fn nak(request: &WireMessage, server_id: Ipv4Addr) -> Self {
        Self::reply(request, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED)
            .with_option(DhcpOption::message_type(MessageType::Nak))
            .with_option(DhcpOption::ipv4(tag::SERVER_ID, server_id))
    }

    /// Append an option
    #[must_use]
    pub fn with_option(mut self, option: DhcpOption) -> Self {
        self.options.push(option);
        self
    }

    /// Set the server host name field (truncated to fit)
    #[must_use]
    pub fn with_sname(mut self, name: &str) -> Self {
        copy_cstr(&mut self.sname, name);
        self
    }

    /// Set the boot file field (truncated to fit)
    #[must_use]
    pub fn with_file(mut self, name: &str) -> Self {
        copy_cstr(&mut self.file, name);
        self
    }

    /// Serialize to wire bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MIN_MESSAGE_LEN.max(MIN_DECODE_LEN + 64));

        buf.push(self.op as u8);
        buf.push(self.htype);
        buf.push(self.hlen);
        buf.push(self.hops);
        buf.extend_from_slice(&self.xid.to_be_bytes());
        buf.extend_from_slice(&self.secs.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&self.ciaddr.octets());
        buf.extend_from_slice(&self.yiaddr.octets());
        buf.extend_from_slice(&self.siaddr.octets());
        buf.extend_from_slice(&self.giaddr.octets());
        buf.extend_from_slice(&self.chaddr);
        buf.extend_from_slice(&self.sname);
        buf.extend_from_slice(&self.file);
        buf.extend_from_slice(&MAGIC_COOKIE);

        for option in &self.options {
            if option.tag == tag::PAD || option.tag == tag::END {
                continue;
            }
            // Over-long values become consecutive options of the same tag
            let mut chunks = option.value.chunks(u8::MAX as usize).peekable();
            if chunks.peek().is_none() {
                buf.extend_from_slice(&[option.tag, 0]);
            }
            for chunk in chunks {
                buf.push(option.tag);
                buf.push(chunk.len() as u8);
                buf.extend_from_slice(chunk);
            }
        }
        buf.push(tag::END);

        if buf.len() < MIN_MESSAGE_LEN {
            buf.resize(MIN_MESSAGE_LEN, 0);
        }
        buf
    }

    /// Parse wire bytes.
    ///
    /// Bytes after the END option are ignored. When option 52 says so, the
    /// `file` and `sname` fields are parsed for further options too; each
    /// such field ends at END or at its own boundary.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] for any structural violation; nothing is
    /// returned partially.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < MIN_DECODE_LEN {
            return Err(CodecError::TooShort {
                expected: MIN_DECODE_LEN,
                actual: data.len(),
            });
        }

        let op = OpCode::try_from(data[0])?;
        let hlen = data[2];
        if usize::from(hlen) > CHADDR_LEN {
            return Err(CodecError::InvalidHardwareLength(hlen));
        }

        let cookie = [data[236], data[237], data[238], data[239]];
        if cookie != MAGIC_COOKIE {
            return Err(CodecError::BadMagicCookie(cookie));
        }

        let mut chaddr = [0u8; CHADDR_LEN];
        chaddr.copy_from_slice(&data[28..44]);
        let mut sname = [0u8; SNAME_LEN];
        sname.copy_from_slice(&data[SNAME_OFFSET..FILE_OFFSET]);
        let mut file = [0u8; FILE_LEN];
        file.copy_from_slice(&data[FILE_OFFSET..HEADER_LEN]);

        let mut options = Vec::new();
        if !parse_options(data, MIN_DECODE_LEN, &mut options)? {
            return Err(CodecError::MissingEnd);
        }

        // Option overload: 1 = file, 2 = sname, 3 = both
        let overload = options
            .iter()
            .find(|o| o.tag == tag::OVERLOAD)
            .and_then(|o| o.value.first().copied())
            .unwrap_or(0);
        if overload & 1 != 0 {
            parse_options(&file, 0, &mut options)?;
        }
        if overload & 2 != 0 {
            parse_options(&sname, 0, &mut options)?;
        }

        Ok(Self {
            op,
            htype: data[1],
            hlen,
            hops: data[3],
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: ipv4_at(data, 12),
            yiaddr: ipv4_at(data, 16),
            siaddr: ipv4_at(data, 20),
            giaddr: ipv4_at(data, 24),
            chaddr,
            sname,
            file,
            options,
        })
    }

    /// Client hardware address, if it is a 6-byte Ethernet address
    #[must_use]
    pub fn hwaddr(&self) -> Option<HardwareAddr> {
        if self.hlen != 6 {
            return None;
        }
        let octets: [u8; 6] = self.chaddr[..6].try_into().ok()?;
        Some(HardwareAddr::new(octets))
    }

    /// First option with `tag`
    #[must_use]
    pub fn option(&self, tag: u8) -> Option<&DhcpOption> {
        self.options.iter().find(|o| o.tag == tag)
    }

    /// DHCP message type; `None` for plain BOOTP
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> {
        let opt = self.option(tag::MESSAGE_TYPE)?;
        match opt.value.as_slice() {
            [raw] => MessageType::try_from(*raw).ok(),
            _ => None,
        }
    }

    /// Server identifier (option 54)
    #[must_use]
    pub fn server_id(&self) -> Option<Ipv4Addr> {
        self.ipv4_option(tag::SERVER_ID)
    }

    /// First well-formed single-address option with `tag`
    #[must_use]
    pub fn ipv4_option(&self, tag: u8) -> Option<Ipv4Addr> {
        self.options
            .iter()
            .filter(|o| o.tag == tag)
            .find_map(DhcpOption::as_ipv4)
    }

    /// Addresses from every occurrence of `tag`, in order
    #[must_use]
    pub fn ipv4_list_option(&self, tag: u8) -> Vec<Ipv4Addr> {
        let bytes = self.concatenated(tag);
        bytes
            .chunks_exact(4)
            .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
            .collect()
    }

    /// 16-bit option
    #[must_use]
    pub fn u16_option(&self, tag: u8) -> Option<u16> {
        self.options
            .iter()
            .filter(|o| o.tag == tag)
            .find_map(DhcpOption::as_u16)
    }

    /// 32-bit option
    #[must_use]
    pub fn u32_option(&self, tag: u8) -> Option<u32> {
        self.options
            .iter()
            .filter(|o| o.tag == tag)
            .find_map(DhcpOption::as_u32)
    }

    /// Text option, concatenated across occurrences with trailing NULs trimmed
    #[must_use]
    pub fn string_option(&self, tag: u8) -> Option<String> {
        let bytes = self.concatenated(tag);
        let text = String::from_utf8_lossy(&bytes);
        let text = text.trim_end_matches('\0');
        (!text.is_empty()).then(|| text.to_string())
    }

    /// Server host name field
    #[must_use]
    pub fn sname_str(&self) -> Option<String> {
        cstr(&self.sname)
    }

    /// Boot file name field
    #[must_use]
    pub fn file_str(&self) -> Option<String> {
        cstr(&self.file)
    }

    fn concatenated(&self, tag: u8) -> Vec<u8> {
        self.options
            .iter()
            .filter(|o| o.tag == tag)
            .flat_map(|o| o.value.iter().copied())
            .collect()
    }
}

/// Parse TLVs from `data[start..]`. Returns whether END was seen.
fn parse_options(
    data: &[u8],
    start: usize,
    options: &mut Vec<DhcpOption>,
) -> Result<bool, CodecError> {
    let mut i = start;
    while i < data.len() {
        let code = data[i];
        match code {
            tag::PAD => i += 1,
            tag::END => return Ok(true),
            _ => {
                let len_at = i + 1;
                let Some(&len) = data.get(len_at) else {
                    return Err(CodecError::OptionOverrun {
                        tag: code,
                        offset: i,
                    });
                };
                let value_start = len_at + 1;
                let value_end = value_start + usize::from(len);
                if value_end > data.len() {
                    return Err(CodecError::OptionOverrun {
                        tag: code,
                        offset: i,
                    });
                }
                options.push(DhcpOption::new(code, &data[value_start..value_end]));
                i = value_end;
            }
        }
    }
    Ok(false)
}

fn ipv4_at(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    )
}

fn copy_cstr(dst: &mut [u8], src: &str) {
    dst.fill(0);
    // Keep room for the terminating NUL
    let len = src.len().min(dst.len() - 1);
    dst[..len].copy_from_slice(&src.as_bytes()[..len]);
}

fn cstr(field: &[u8]) -> Option<String> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    (end > 0).then(|| String::from_utf8_lossy(&field[..end]).into_owned())
}
