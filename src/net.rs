pub mod sniffer;
pub mod socket;

use crate::error::IoResult;
use socket::Socket;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;

/// An address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd)]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Family {
    /// The family of an address.
    #[must_use]
    pub const fn of(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::Ipv4,
            IpAddr::V6(_) => Self::Ipv6,
        }
    }
}

impl Display for Family {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ipv4 => write!(f, "ipv4"),
            Self::Ipv6 => write!(f, "ipv6"),
        }
    }
}

/// The probing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd)]
pub enum Protocol {
    /// Internet Control Message Protocol
    Icmp,
}

impl Display for Protocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Icmp => write!(f, "icmp"),
        }
    }
}

/// A coarse capture filter.
///
/// Wide enough to include every possible reply to any probe the packet layer
/// forges; false positives are expected and resolved by fingerprint matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFilter {
    /// The address family to capture.
    pub family: Family,
    /// The protocol to capture.
    pub protocol: Protocol,
}

impl CaptureFilter {
    #[must_use]
    pub const fn new(family: Family, protocol: Protocol) -> Self {
        Self { family, protocol }
    }
}

/// A pool of raw sending endpoints keyed by address family and protocol.
///
/// Sockets are created lazily on first lend, cached for reuse and closed when
/// the pool is dropped at engine shutdown.  A lend lasts for one transmission:
/// the mutable borrow is the loan.
#[derive(Debug, Default)]
pub struct SocketPool<S> {
    sockets: BTreeMap<(Family, Protocol), S>,
}

impl<S: Socket> SocketPool<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sockets: BTreeMap::new(),
        }
    }

    /// Lend the sending endpoint for the given family and protocol, creating
    /// it on first use.
    pub fn lend(&mut self, family: Family, protocol: Protocol) -> IoResult<&mut S> {
        match self.sockets.entry((family, protocol)) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                tracing::debug!(%family, %protocol, "creating send socket");
                let socket = match (family, protocol) {
                    (Family::Ipv4, Protocol::Icmp) => S::new_icmp_send_socket_ipv4()?,
                    (Family::Ipv6, Protocol::Icmp) => S::new_icmp_send_socket_ipv6()?,
                };
                Ok(entry.insert(socket))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::socket::MockSocket;
    use super::*;
    use std::io;

    // A single test as the mocked socket constructors are static and
    // expectations on them are process-wide.
    #[test]
    fn test_socket_pool() {
        use crate::error::{IoError, IoOperation};

        // sockets are created lazily, cached per key and keyed by family
        {
            let ctx_v4 = MockSocket::new_icmp_send_socket_ipv4_context();
            ctx_v4.expect().times(1).returning(|| Ok(MockSocket::new()));
            let ctx_v6 = MockSocket::new_icmp_send_socket_ipv6_context();
            ctx_v6.expect().times(1).returning(|| Ok(MockSocket::new()));
            let mut pool = SocketPool::<MockSocket>::new();
            pool.lend(Family::Ipv4, Protocol::Icmp).unwrap();
            pool.lend(Family::Ipv4, Protocol::Icmp).unwrap();
            pool.lend(Family::Ipv6, Protocol::Icmp).unwrap();
            pool.lend(Family::Ipv4, Protocol::Icmp).unwrap();
        }

        // creation failure is surfaced to the caller
        {
            let ctx_v4 = MockSocket::new_icmp_send_socket_ipv4_context();
            ctx_v4.expect().times(1).returning(|| {
                Err(IoError::Other(
                    io::Error::from(io::ErrorKind::PermissionDenied),
                    IoOperation::NewSocket,
                ))
            });
            let mut pool = SocketPool::<MockSocket>::new();
            let err = pool.lend(Family::Ipv4, Protocol::Icmp).unwrap_err();
            assert_eq!(io::ErrorKind::PermissionDenied, err.kind());
        }
    }
}
