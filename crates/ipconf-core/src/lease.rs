//! Negotiated interface configuration.

use crate::config::Protocol;
use crate::message::WireMessage;
use crate::options::tag;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Lease value servers use for "never expires"
const INFINITE_LEASE: u32 = u32::MAX;

/// Result of a successful negotiation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigurationResult {
    /// Interface the configuration applies to
    pub interface: String,
    /// Protocol that produced it
    pub protocol: Protocol,
    /// Assigned address
    pub address: Ipv4Addr,
    /// Subnet prefix length
    pub prefix_len: u8,
    /// Default gateway
    pub gateway: Option<Ipv4Addr>,
    /// DNS servers in server order
    pub dns_servers: Vec<Ipv4Addr>,
    /// Lease in seconds; 0 means unlimited
    pub lease_secs: u32,
    /// DHCP server identifier
    pub server_id: Option<Ipv4Addr>,
    /// Next server to bootstrap from (siaddr)
    pub next_server: Option<Ipv4Addr>,
    /// Host name
    pub host_name: Option<String>,
    /// DNS domain
    pub domain_name: Option<String>,
    /// Root disk path
    pub root_path: Option<String>,
    /// Broadcast address, if the server sent one
    pub broadcast: Option<Ipv4Addr>,
    /// Interface MTU
    pub mtu: Option<u16>,
    /// NTP servers
    pub ntp_servers: Vec<Ipv4Addr>,
    /// Boot server host name
    pub server_name: Option<String>,
    /// Boot file name
    pub boot_file: Option<String>,
}

impl ConfigurationResult {
    /// Build a result from a final reply.
    ///
    /// `offer`, when given, supplies anything the reply omits.
    #[must_use]
    pub fn from_reply(
        interface: &str,
        protocol: Protocol,
        reply: &WireMessage,
        offer: Option<&WireMessage>,
    ) -> Self {
        let sources: Vec<&WireMessage> = std::iter::once(reply).chain(offer).collect();
        let ipv4 = |t: u8| sources.iter().find_map(|m| m.ipv4_option(t));
        let list = |t: u8| {
            sources
                .iter()
                .map(|m| m.ipv4_list_option(t))
                .find(|l| !l.is_empty())
                .unwrap_or_default()
        };
        let string = |t: u8| sources.iter().find_map(|m| m.string_option(t));
        let nonzero = |f: fn(&WireMessage) -> Ipv4Addr| {
            sources
                .iter()
                .map(|m| f(m))
                .find(|a| !a.is_unspecified())
        };

        let address = nonzero(|m| m.yiaddr).unwrap_or(Ipv4Addr::UNSPECIFIED);
        let prefix_len = ipv4(tag::SUBNET_MASK)
            .map(mask_to_prefix)
            .unwrap_or_else(|| classful_prefix(address));

        let lease_secs = match protocol {
            Protocol::Bootp => 0,
            Protocol::Dhcp => match sources.iter().find_map(|m| m.u32_option(tag::LEASE_TIME)) {
                Some(INFINITE_LEASE) | None => 0,
                Some(secs) => secs,
            },
        };

        Self {
            interface: interface.to_string(),
            protocol,
            address,
            prefix_len,
            gateway: list(tag::ROUTER).first().copied(),
            dns_servers: list(tag::DNS_SERVERS),
            lease_secs,
            server_id: ipv4(tag::SERVER_ID),
            next_server: nonzero(|m| m.siaddr),
            host_name: string(tag::HOST_NAME),
            domain_name: string(tag::DOMAIN_NAME),
            root_path: string(tag::ROOT_PATH),
            broadcast: ipv4(tag::BROADCAST_ADDRESS),
            mtu: sources.iter().find_map(|m| m.u16_option(tag::INTERFACE_MTU)),
            ntp_servers: list(tag::NTP_SERVERS),
            server_name: sources.iter().find_map(|m| m.sname_str()),
            boot_file: sources.iter().find_map(|m| m.file_str()),
        }
    }

    /// Subnet mask for `prefix_len`
    #[must_use]
    pub fn netmask(&self) -> Ipv4Addr {
        prefix_to_mask(self.prefix_len)
    }

    /// Broadcast address, derived from address and mask when not supplied
    #[must_use]
    pub fn broadcast_address(&self) -> Ipv4Addr {
        self.broadcast.unwrap_or_else(|| {
            Ipv4Addr::from(u32::from(self.address) | !u32::from(self.netmask()))
        })
    }

    /// Lease duration; `None` when unlimited
    #[must_use]
    pub fn lease(&self) -> Option<Duration> {
        (self.lease_secs != 0).then(|| Duration::from_secs(u64::from(self.lease_secs)))
    }
}

/// Prints the configuration as `KEY=value` lines
impl fmt::Display for ConfigurationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DEVICE={}", self.interface)?;
        writeln!(f, "PROTO={}", self.protocol)?;
        writeln!(f, "IPV4ADDR={}", self.address)?;
        writeln!(f, "IPV4NETMASK={}", self.netmask())?;
        writeln!(f, "IPV4BROADCAST={}", self.broadcast_address())?;
        if let Some(gateway) = self.gateway {
            writeln!(f, "IPV4GATEWAY={gateway}")?;
        }
        for (i, dns) in self.dns_servers.iter().enumerate() {
            writeln!(f, "IPV4DNS{i}={dns}")?;
        }
        for (label, value) in [
            ("HOSTNAME", &self.host_name),
            ("DNSDOMAIN", &self.domain_name),
            ("ROOTPATH", &self.root_path),
            ("FILENAME", &self.boot_file),
        ] {
            if let Some(value) = value {
                writeln!(f, "{label}={value}")?;
            }
        }
        if let Some(server) = self.next_server.or(self.server_id) {
            writeln!(f, "ROOTSERVER={server}")?;
        }
        if let Some(mtu) = self.mtu {
            writeln!(f, "MTU={mtu}")?;
        }
        for (i, ntp) in self.ntp_servers.iter().enumerate() {
            writeln!(f, "NTPSRV{i}={ntp}")?;
        }
        write!(f, "LEASETIME={}", self.lease_secs)
    }
}

/// Prefix length of a subnet mask (leading one bits)
#[must_use]
pub fn mask_to_prefix(mask: Ipv4Addr) -> u8 {
    u32::from(mask).leading_ones() as u8
}

/// Subnet mask for a prefix length (clamped to 32)
#[must_use]
pub fn prefix_to_mask(prefix_len: u8) -> Ipv4Addr {
    match prefix_len.min(32) {
        0 => Ipv4Addr::UNSPECIFIED,
        len => Ipv4Addr::from(u32::MAX << (32 - u32::from(len))),
    }
}

/// Classful default prefix for an address (A: /8, B: /16, C: /24)
#[must_use]
pub fn classful_prefix(addr: Ipv4Addr) -> u8 {
    match addr.octets()[0] {
        0..=127 => 8,
        128..=191 => 16,
        192..=223 => 24,
        _ => 32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::DhcpOption;
    use ipconf_transport::HardwareAddr;

    fn discover() -> WireMessage {
        WireMessage::discover(0x1234, HardwareAddr::new([2, 0, 0, 0, 0, 9]))
    }

    #[test]
    fn test_prefix_conversions() {
        assert_eq!(mask_to_prefix(Ipv4Addr::new(255, 255, 255, 0)), 24);
        assert_eq!(mask_to_prefix(Ipv4Addr::new(255, 255, 240, 0)), 20);
        assert_eq!(mask_to_prefix(Ipv4Addr::UNSPECIFIED), 0);
        assert_eq!(prefix_to_mask(24), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(prefix_to_mask(32), Ipv4Addr::BROADCAST);
        assert_eq!(prefix_to_mask(0), Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn test_classful_prefix() {
        assert_eq!(classful_prefix(Ipv4Addr::new(10, 1, 2, 3)), 8);
        assert_eq!(classful_prefix(Ipv4Addr::new(172, 16, 0, 1)), 16);
        assert_eq!(classful_prefix(Ipv4Addr::new(203, 0, 113, 5)), 24);
    }

    #[test]
    fn test_ack_with_offer_fallback() {
        let server = Ipv4Addr::new(203, 0, 113, 1);
        let addr = Ipv4Addr::new(203, 0, 113, 5);
        let offer = WireMessage::offer(&discover(), addr, server)
            .with_option(DhcpOption::ipv4(tag::SUBNET_MASK, Ipv4Addr::new(255, 255, 255, 0)))
            .with_option(DhcpOption::ipv4_list(tag::ROUTER, &[server]))
            .with_option(DhcpOption::ipv4_list(tag::DNS_SERVERS, &[Ipv4Addr::new(203, 0, 113, 53)]))
            .with_option(DhcpOption::string(tag::HOST_NAME, "node1"));
        let ack = WireMessage::ack(&discover(), addr, server)
            .with_option(DhcpOption::u32(tag::LEASE_TIME, 7200))
            .with_option(DhcpOption::string(tag::HOST_NAME, "node1-ack"));

        let result = ConfigurationResult::from_reply("eth0", Protocol::Dhcp, &ack, Some(&offer));
        assert_eq!(result.address, addr);
        assert_eq!(result.prefix_len, 24);
        assert_eq!(result.gateway, Some(server));
        assert_eq!(result.dns_servers, vec![Ipv4Addr::new(203, 0, 113, 53)]);
        assert_eq!(result.lease_secs, 7200);
        assert_eq!(result.host_name.as_deref(), Some("node1-ack"));
        assert_eq!(result.server_id, Some(server));
        assert_eq!(result.lease(), Some(Duration::from_secs(7200)));
    }

    #[test]
    fn test_bootp_result_is_unlimited() {
        let reply = WireMessage::reply(
            &WireMessage::bootp_request(1, HardwareAddr::new([2, 0, 0, 0, 0, 1])),
            Ipv4Addr::new(10, 4, 0, 20),
            Ipv4Addr::new(10, 4, 0, 1),
        )
        .with_option(DhcpOption::u32(tag::LEASE_TIME, 600))
        .with_file("pxelinux.0");

        let result = ConfigurationResult::from_reply("eth1", Protocol::Bootp, &reply, None);
        assert_eq!(result.lease_secs, 0);
        assert_eq!(result.lease(), None);
        assert_eq!(result.prefix_len, 8);
        assert_eq!(result.next_server, Some(Ipv4Addr::new(10, 4, 0, 1)));
        assert_eq!(result.boot_file.as_deref(), Some("pxelinux.0"));
        assert!(result.dns_servers.is_empty());
    }

    #[test]
    fn test_infinite_dhcp_lease() {
        let ack = WireMessage::ack(&discover(), Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 1))
            .with_option(DhcpOption::u32(tag::LEASE_TIME, u32::MAX));
        let result = ConfigurationResult::from_reply("eth0", Protocol::Dhcp, &ack, None);
        assert_eq!(result.lease_secs, 0);
    }

    #[test]
    fn test_display_key_value() {
        let ack = WireMessage::ack(&discover(), Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::new(192, 168, 1, 1))
            .with_option(DhcpOption::ipv4_list(tag::ROUTER, &[Ipv4Addr::new(192, 168, 1, 1)]))
            .with_option(DhcpOption::ipv4_list(
                tag::DNS_SERVERS,
                &[Ipv4Addr::new(192, 168, 1, 2), Ipv4Addr::new(192, 168, 1, 3)],
            ))
            .with_option(DhcpOption::u32(tag::LEASE_TIME, 86400));
        let text = ConfigurationResult::from_reply("eth0", Protocol::Dhcp, &ack, None).to_string();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "DEVICE=eth0");
        assert!(lines.contains(&"PROTO=dhcp"));
        assert!(lines.contains(&"IPV4ADDR=192.168.1.10"));
        assert!(lines.contains(&"IPV4NETMASK=255.255.255.0"));
        assert!(lines.contains(&"IPV4BROADCAST=192.168.1.255"));
        assert!(lines.contains(&"IPV4GATEWAY=192.168.1.1"));
        assert!(lines.contains(&"IPV4DNS0=192.168.1.2"));
        assert!(lines.contains(&"IPV4DNS1=192.168.1.3"));
        assert_eq!(lines.last(), Some(&"LEASETIME=86400"));
    }

    #[test]
    fn test_serialize_json() {
        let ack = WireMessage::ack(&discover(), Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 1));
        let result = ConfigurationResult::from_reply("eth0", Protocol::Dhcp, &ack, None);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["address"], "10.0.0.2");
        assert_eq!(json["protocol"], "dhcp");
        assert_eq!(json["lease_secs"], 0);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_prefix_mask_inverse(prefix in 0u8..=32) {
                prop_assert_eq!(mask_to_prefix(prefix_to_mask(prefix)), prefix);
            }

            #[test]
            fn prop_mask_option_drives_prefix(host in 1u32..0xDF00_0000, prefix in 1u8..=31) {
                let addr = Ipv4Addr::from(host);
                prop_assume!(!addr.is_loopback());
                let ack = WireMessage::ack(&discover(), addr, Ipv4Addr::new(10, 0, 0, 1))
                    .with_option(DhcpOption::ipv4(tag::SUBNET_MASK, prefix_to_mask(prefix)));
                let result = ConfigurationResult::from_reply("eth0", Protocol::Dhcp, &ack, None);

                prop_assert_eq!(result.prefix_len, prefix);
                let mask = u32::from(result.netmask());
                prop_assert_eq!(u32::from(result.broadcast_address()) & mask, host & mask);
            }
        }
    }
}
