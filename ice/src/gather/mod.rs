#[cfg(test)]
mod gather_test;

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

use proto::CandidateKind;

use crate::error::{Error, Result};

/// Out-of-band source of server-reflexive or relayed candidates.
///
/// STUN and TURN clients are external collaborators; the engine only
/// consumes "here is a candidate" results polled from the ticking
/// thread. Returns `(kind, addr, base_addr)` tuples, `None` when
/// nothing new was discovered since the last poll.
pub trait ReflexiveSource {
    fn poll(&mut self) -> Option<(CandidateKind, SocketAddrV4, SocketAddrV4)>;
}

/// True for addresses that may be advertised as host candidates.
/// Loopback, link-local and the unspecified/broadcast addresses never
/// leave the machine usefully.
pub fn is_usable_host(ip: &Ipv4Addr) -> bool {
    !ip.is_loopback() && !ip.is_link_local() && !ip.is_unspecified() && !ip.is_broadcast()
}

/// True when both addresses sit in the same /24.
pub fn same_subnet24(a: &Ipv4Addr, b: &Ipv4Addr) -> bool {
    a.octets()[..3] == b.octets()[..3]
}

/// Discovers the default-route interface address with a connected UDP
/// socket. No datagram is sent; `connect` only selects the route.
pub fn default_route_ip() -> Result<Ipv4Addr> {
    let sock = UdpSocket::bind("0.0.0.0:0")?;
    sock.connect("8.8.8.8:80")?;
    match sock.local_addr()? {
        std::net::SocketAddr::V4(addr) => Ok(*addr.ip()),
        std::net::SocketAddr::V6(_) => Err(Error::ErrNoHostAddress),
    }
}

/// Enumerates the host addresses to advertise: the allow-list when one
/// is configured, otherwise the default-route interface address.
///
/// An explicit allow-list is authoritative — it may name loopback for
/// same-machine setups; only unusable wildcard addresses are dropped.
pub fn host_ips(allow_list: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
    if !allow_list.is_empty() {
        return allow_list
            .iter()
            .copied()
            .filter(|ip| !ip.is_unspecified() && !ip.is_broadcast())
            .collect();
    }
    match default_route_ip() {
        Ok(ip) if is_usable_host(&ip) => vec![ip],
        Ok(_) => Vec::new(),
        Err(e) => {
            log::warn!("host address discovery failed: {e}");
            Vec::new()
        }
    }
}
