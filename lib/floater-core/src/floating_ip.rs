//! Floating IP model
use std::fmt;
use std::net::Ipv4Addr;

use ipnetwork::Ipv6Network;

pub type FloatingIpId = u64;
pub type ServerId = u64;

/// Address of a floating IP: a single IPv4 address or an IPv6 block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FloatingIpAddress {
    V4(Ipv4Addr),
    V6(Ipv6Network),
}

impl fmt::Display for FloatingIpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FloatingIpAddress::V4(addr) => write!(f, "{}", addr),
            FloatingIpAddress::V6(net) => write!(f, "{}", net),
        }
    }
}

/// A cloud-managed floating IP as last reported by the cloud API
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FloatingIp {
    pub id: FloatingIpId,
    pub name: String,
    pub address: FloatingIpAddress,
    /// Server the floating IP currently routes to, if any
    pub server: Option<ServerId>,
}

impl FloatingIp {
    pub fn is_assigned_to(&self, server: ServerId) -> bool {
        self.server == Some(server)
    }
}
