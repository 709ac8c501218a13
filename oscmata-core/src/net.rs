//! Network address selection for the OSC listener
//!
//! The bridge host has two DHCP-paired local addresses on the same subnet:
//! WLAN addresses are reserved as even final octets, the corresponding LAN
//! address is the WLAN octet plus one. Discovery finds whichever address
//! routes toward the router, derives the paired one, and classifies both so
//! the same configuration works on either interface.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use tracing::debug;

use crate::error::{BridgeError, Result};

/// Subnet prefix shared by both interfaces.
const SUBNET_PREFIX: [u8; 3] = [192, 168, 1];

/// Nominal destination port for local-route discovery. No packets are sent;
/// connecting the datagram socket only asks the kernel for the outbound
/// route.
const DISCOVERY_PORT: u16 = 80;

/// Which of the two paired interfaces to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    Wlan,
    Lan,
}

impl Interface {
    /// Selection policy: bind LAN only when the single CLI argument is the
    /// literal `LAN`, otherwise WLAN.
    pub fn from_cli_arg(arg: Option<&str>) -> Self {
        match arg {
            Some("LAN") => Interface::Lan,
            _ => Interface::Wlan,
        }
    }
}

/// The WLAN/LAN address pair of this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPair {
    pub wlan: Ipv4Addr,
    pub lan: Ipv4Addr,
}

impl AddressPair {
    /// Classify two paired addresses: the even final octet is the WLAN
    /// address, the odd one is LAN. The result does not depend on which of
    /// the two was discovered first.
    pub fn classify(a: Ipv4Addr, b: Ipv4Addr) -> Self {
        if a.octets()[3] % 2 == 0 {
            Self { wlan: a, lan: b }
        } else {
            Self { wlan: b, lan: a }
        }
    }

    /// Discover the primary outbound address via the router and derive the
    /// paired one. Fatal at startup when the route lookup fails; there is
    /// no retry.
    pub fn discover(router_ip: &str) -> Result<Self> {
        let primary = discover_local_ip(router_ip)?;
        let paired = paired_address(primary);
        debug!("Discovered local address {}, paired {}", primary, paired);
        Ok(Self::classify(primary, paired))
    }

    /// Address to bind for the requested interface.
    pub fn select(&self, interface: Interface) -> Ipv4Addr {
        match interface {
            Interface::Wlan => self.wlan,
            Interface::Lan => self.lan,
        }
    }
}

/// Discover the local address that routes toward the router.
///
/// Opens a connectionless socket and connects it toward the router address,
/// then reads the locally bound address. Nothing is transmitted.
pub fn discover_local_ip(router_ip: &str) -> Result<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .map_err(|e| BridgeError::Network(format!("Failed to open discovery socket: {}", e)))?;

    socket
        .connect((router_ip, DISCOVERY_PORT))
        .map_err(|e| BridgeError::Network(format!("No route toward router {}: {}", router_ip, e)))?;

    let local = socket
        .local_addr()
        .map_err(|e| BridgeError::Network(format!("Failed to read local address: {}", e)))?;

    match local.ip() {
        IpAddr::V4(addr) => Ok(addr),
        IpAddr::V6(addr) => Err(BridgeError::Network(format!(
            "Expected an IPv4 local address, got {}",
            addr
        ))),
    }
}

/// Derive the DHCP-paired address: final octet plus one if even, minus one
/// if odd, on the fixed subnet prefix.
pub fn paired_address(addr: Ipv4Addr) -> Ipv4Addr {
    let last = addr.octets()[3];
    let paired = if last % 2 == 0 { last + 1 } else { last - 1 };
    Ipv4Addr::new(SUBNET_PREFIX[0], SUBNET_PREFIX[1], SUBNET_PREFIX[2], paired)
}
