//! Managed network interface descriptors.
//!
//! The platform layer enumerates devices and reads their hardware addresses;
//! this module only describes what it hands over.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of an Ethernet hardware address
pub const HWADDR_LEN: usize = 6;

/// Ethernet (link-layer) hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HardwareAddr([u8; HWADDR_LEN]);

impl HardwareAddr {
    /// Link-layer broadcast address (`ff:ff:ff:ff:ff:ff`)
    pub const BROADCAST: Self = Self([0xFF; HWADDR_LEN]);

    /// Create a hardware address from raw octets
    #[must_use]
    pub const fn new(octets: [u8; HWADDR_LEN]) -> Self {
        Self(octets)
    }

    /// Raw octets
    #[must_use]
    pub const fn octets(&self) -> [u8; HWADDR_LEN] {
        self.0
    }

    /// Borrow the raw octets
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check for the all-zero address some drivers report before init
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HWADDR_LEN]
    }
}

impl From<[u8; HWADDR_LEN]> for HardwareAddr {
    fn from(octets: [u8; HWADDR_LEN]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, octet) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            f.write_str(&hex::encode([*octet]))?;
        }
        Ok(())
    }
}

impl Serialize for HardwareAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Error returned when a hardware address string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hardware address: {0}")]
pub struct ParseHardwareAddrError(String);

impl FromStr for HardwareAddr {
    type Err = ParseHardwareAddrError;

    /// Parses `aa:bb:cc:dd:ee:ff` (also accepts `-` separators)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.trim().split([':', '-']).collect();
        let bytes = hex::decode(&digits).map_err(|_| ParseHardwareAddrError(s.to_string()))?;
        let octets: [u8; HWADDR_LEN] = bytes
            .try_into()
            .map_err(|_| ParseHardwareAddrError(s.to_string()))?;
        Ok(Self(octets))
    }
}

/// Link-level state reported by the platform layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Carrier down or interface administratively down
    Down,
    /// Carrier present
    #[default]
    Up,
}

/// One managed network device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    /// Kernel interface name (e.g. "eth0")
    pub name: String,
    /// Hardware address used as `chaddr` and for reply matching
    pub hwaddr: HardwareAddr,
    /// Link state at startup
    pub link: LinkState,
}

impl Interface {
    /// Create an interface descriptor with link up
    pub fn new(name: impl Into<String>, hwaddr: HardwareAddr) -> Self {
        Self {
            name: name.into(),
            hwaddr,
            link: LinkState::Up,
        }
    }

    /// Override the link state
    #[must_use]
    pub fn with_link(mut self, link: LinkState) -> Self {
        self.link = link;
        self
    }

    /// Whether the link is up
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.link == LinkState::Up
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hwaddr_display() {
        let mac = HardwareAddr::new([0x02, 0x00, 0x5E, 0x10, 0xAB, 0xCD]);
        assert_eq!(mac.to_string(), "02:00:5e:10:ab:cd");
    }

    #[test]
    fn test_hwaddr_parse() {
        let mac: HardwareAddr = "02:00:5E:10:ab:cd".parse().unwrap();
        assert_eq!(mac.octets(), [0x02, 0x00, 0x5E, 0x10, 0xAB, 0xCD]);

        let dashed: HardwareAddr = "02-00-5e-10-ab-cd".parse().unwrap();
        assert_eq!(mac, dashed);
    }

    #[test]
    fn test_hwaddr_parse_invalid() {
        assert!("02:00:5e".parse::<HardwareAddr>().is_err());
        assert!("zz:00:5e:10:ab:cd".parse::<HardwareAddr>().is_err());
        assert!("02:00:5e:10:ab:cd:ef".parse::<HardwareAddr>().is_err());
    }

    #[test]
    fn test_interface_link_state() {
        let iface = Interface::new("eth0", HardwareAddr::new([2, 0, 0, 0, 0, 1]));
        assert!(iface.is_up());

        let down = iface.with_link(LinkState::Down);
        assert!(!down.is_up());
    }

    #[test]
    fn test_hwaddr_zero() {
        assert!(HardwareAddr::default().is_zero());
        assert!(!HardwareAddr::BROADCAST.is_zero());
    }
}
