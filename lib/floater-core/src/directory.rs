//! Floating IP lookup by address
//!
//! IPv4 floating IPs match by exact address, IPv6 floating IPs by containment
//! of the address in their block. The first match in list order wins, which
//! assumes the floating IPs of an account never overlap.

use std::net::IpAddr;

use crate::{CoreError, FloatingIp, FloatingIpAddress, Result};

/// Find the floating IP serving `ip`
pub fn find_floating_ip(floating_ips: &[FloatingIp], ip: IpAddr) -> Result<&FloatingIp> {
    let ip = ip.to_canonical();
    floating_ips
        .iter()
        .find(|floating_ip| serves(&floating_ip.address, ip))
        .ok_or(CoreError::FloatingIpNotFound(ip))
}

fn serves(address: &FloatingIpAddress, ip: IpAddr) -> bool {
    match (address, ip) {
        (FloatingIpAddress::V4(addr), IpAddr::V4(ip)) => *addr == ip,
        (FloatingIpAddress::V6(network), IpAddr::V6(ip)) => network.contains(ip),
        _ => false,
    }
}
