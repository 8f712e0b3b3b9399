//! Node identity
//!
//! The node's routable IPv4 address doubles as its identity in the
//! cluster: it names the registration key, the leader record and the
//! service id. The address is resolved from a configured interface name
//! so the pick stays stable across restarts.

use std::net::Ipv4Addr;

use get_if_addrs::{get_if_addrs, IfAddr, Interface};

use crate::config::ConfigError;

/// Resolve the node's IPv4 address from the named interface.
pub fn local_ip(interface: &str) -> Result<Ipv4Addr, ConfigError> {
    let interfaces = get_if_addrs()?;
    find_interface_ip(&interfaces, interface)
        .ok_or_else(|| ConfigError::NoAddress(interface.to_string()))
}

/// First IPv4 address carried by the interface with the given name.
pub(crate) fn find_interface_ip(interfaces: &[Interface], name: &str) -> Option<Ipv4Addr> {
    interfaces.iter().find_map(|interface| {
        if interface.name != name {
            return None;
        }
        match &interface.addr {
            IfAddr::V4(v4) => Some(v4.ip),
            IfAddr::V6(_) => None,
        }
    })
}

#[cfg(test)]
#[path = "net_test.rs"]
mod tests;
