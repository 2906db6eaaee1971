//! Local interface selection

use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::net::Ipv4Addr;

/// Interface name prefixes that never face the LAN
const VIRTUAL_PREFIXES: &[&str] = &[
    "lo", "docker", "veth", "br-", "virbr", "vmnet", "vboxnet", "tun", "tap", "utun", "zt", "wg",
];

/// First non-loopback IPv4 address of a LAN-facing interface.
///
/// Enumeration failures are logged and reported as `None`.
pub fn local_address() -> Option<Ipv4Addr> {
    let interfaces = match NetworkInterface::show() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            tracing::warn!("Failed to enumerate network interfaces: {}", e);
            return None;
        }
    };

    let candidates = interfaces.into_iter().flat_map(|iface| {
        let name = iface.name;
        iface.addr.into_iter().filter_map(move |addr| match addr {
            Addr::V4(v4) => Some((name.clone(), v4.ip)),
            Addr::V6(_) => None,
        })
    });

    let chosen = pick_address(candidates);
    match chosen {
        Some(ip) => tracing::debug!("Using local address {}", ip),
        None => tracing::debug!("No usable local IPv4 address"),
    }
    chosen
}

/// Pick the first usable address from `(interface name, address)` pairs
pub(crate) fn pick_address(
    candidates: impl IntoIterator<Item = (String, Ipv4Addr)>,
) -> Option<Ipv4Addr> {
    candidates
        .into_iter()
        .find(|(name, ip)| !is_virtual(name) && is_usable(ip))
        .map(|(_, ip)| ip)
}

fn is_virtual(name: &str) -> bool {
    VIRTUAL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

fn is_usable(ip: &Ipv4Addr) -> bool {
    !(ip.is_loopback() || ip.is_link_local() || ip.is_unspecified())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(name: &str, ip: [u8; 4]) -> (String, Ipv4Addr) {
        (name.to_string(), Ipv4Addr::from(ip))
    }

    #[test]
    fn test_skips_loopback_and_virtual() {
        let picked = pick_address(vec![
            pair("lo", [127, 0, 0, 1]),
            pair("docker0", [172, 17, 0, 1]),
            pair("wlan0", [169, 254, 3, 4]),
            pair("eth0", [192, 168, 1, 50]),
        ]);
        assert_eq!(picked, Some(Ipv4Addr::new(192, 168, 1, 50)));
    }

    #[test]
    fn test_nothing_usable() {
        assert_eq!(pick_address(vec![pair("lo", [127, 0, 0, 1])]), None);
        assert_eq!(pick_address(Vec::new()), None);
    }
}
