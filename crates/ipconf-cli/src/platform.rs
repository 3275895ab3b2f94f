//! Interface discovery from sysfs.

use anyhow::Context;
use ipconf_transport::{HardwareAddr, Interface, LinkState};
use std::fs;
use std::path::Path;

/// Where the kernel exposes network devices
pub const SYSFS_NET: &str = "/sys/class/net";

/// Resolve an `IFACE[=MAC]` argument against sysfs.
///
/// # Errors
///
/// Returns an error for an empty name or an unparsable hardware address.
pub fn resolve(arg: &str) -> anyhow::Result<Interface> {
    resolve_in(Path::new(SYSFS_NET), arg)
}

/// Resolve an `IFACE[=MAC]` argument against the device tree at `root`.
///
/// A device missing from sysfs, or one without a usable hardware address,
/// still yields an interface, marked down, so it fails on its own instead of
/// aborting the others.
///
/// # Errors
///
/// Returns an error for an empty name or an unparsable hardware address.
pub fn resolve_in(root: &Path, arg: &str) -> anyhow::Result<Interface> {
    let (name, mac) = match arg.split_once('=') {
        Some((name, mac)) => (name.trim(), Some(mac.trim())),
        None => (arg.trim(), None),
    };
    if name.is_empty() || name.contains('/') {
        anyhow::bail!("invalid interface name: {arg:?}");
    }

    let device = root.join(name);
    let hwaddr = match mac {
        Some(mac) => mac
            .parse::<HardwareAddr>()
            .with_context(|| format!("interface {name}"))?,
        None => read_attr(&device, "address")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default(),
    };

    let mut link = match read_attr(&device, "operstate").as_deref() {
        // "unknown" is common for drivers without carrier reporting
        Some("down" | "lowerlayerdown" | "notpresent") => LinkState::Down,
        Some(_) => LinkState::Up,
        None if mac.is_some() => LinkState::Up,
        None => LinkState::Down,
    };

    // Without a hardware address no reply can be matched to us
    if hwaddr.is_zero() {
        tracing::warn!(interface = name, "no hardware address known, disabling");
        link = LinkState::Down;
    }
    tracing::debug!(interface = name, %hwaddr, ?link, "resolved interface");

    Ok(Interface::new(name, hwaddr).with_link(link))
}

fn read_attr(device: &Path, attr: &str) -> Option<String> {
    fs::read_to_string(device.join(attr))
        .ok()
        .map(|s| s.trim().to_string())
}
