use crate::error::IoResult;
use std::net::SocketAddr;
use std::time::Duration;

/// A raw network socket.
///
/// The seam between the engine and the platform socket layer.  The engine
/// borrows sending sockets from the [`crate::SocketPool`] and the provided
/// sniffer reads captured frames from a receive socket.
#[cfg_attr(test, mockall::automock)]
pub trait Socket
where
    Self: Sized,
{
    /// Create an IPv4 socket for sending ICMP probes.
    fn new_icmp_send_socket_ipv4() -> IoResult<Self>;
    /// Create an IPv6 socket for sending ICMP probes.
    fn new_icmp_send_socket_ipv6() -> IoResult<Self>;
    /// Create an IPv4 socket for receiving ICMP replies.
    fn new_recv_socket_ipv4() -> IoResult<Self>;
    /// Create an IPv6 socket for receiving ICMP replies.
    fn new_recv_socket_ipv6() -> IoResult<Self>;
    /// Set the time-to-live for subsequent sends.
    fn set_ttl(&mut self, ttl: u32) -> IoResult<()>;
    /// Send a datagram; the socket is non-blocking and an immediate
    /// `WouldBlock` is a transient error.
    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> IoResult<()>;
    /// Returns true if the socket becomes readable before the timeout, false otherwise.
    fn is_readable(&mut self, timeout: Duration) -> IoResult<bool>;
    /// Read the next datagram.
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize>;
}

#[cfg(unix)]
mod unix {
    use super::Socket;
    use crate::error::{IoError, IoOperation, IoResult};
    use nix::sys::select::FdSet;
    use nix::sys::time::{TimeVal, TimeValLike};
    use socket2::{Domain, Protocol, SockAddr, Type};
    use std::io::Read;
    use std::net::SocketAddr;
    use std::os::fd::AsFd;
    use std::time::Duration;
    use tracing::instrument;

    /// A non-blocking raw network socket.
    pub struct SocketImpl {
        inner: socket2::Socket,
    }

    impl SocketImpl {
        fn new_raw(domain: Domain, protocol: Protocol) -> IoResult<Self> {
            let socket = Self {
                inner: socket2::Socket::new(domain, Type::RAW, Some(protocol))
                    .map_err(|err| IoError::Other(err, IoOperation::NewSocket))?,
            };
            socket.set_nonblocking(true)?;
            Ok(socket)
        }

        fn set_nonblocking(&self, nonblocking: bool) -> IoResult<()> {
            self.inner
                .set_nonblocking(nonblocking)
                .map_err(|err| IoError::Other(err, IoOperation::SetNonBlocking))
        }
    }

    impl Socket for SocketImpl {
        #[instrument(level = "trace")]
        fn new_icmp_send_socket_ipv4() -> IoResult<Self> {
            Self::new_raw(Domain::IPV4, Protocol::ICMPV4)
        }
        #[instrument(level = "trace")]
        fn new_icmp_send_socket_ipv6() -> IoResult<Self> {
            Self::new_raw(Domain::IPV6, Protocol::ICMPV6)
        }
        #[instrument(level = "trace")]
        fn new_recv_socket_ipv4() -> IoResult<Self> {
            Self::new_raw(Domain::IPV4, Protocol::ICMPV4)
        }
        #[instrument(level = "trace")]
        fn new_recv_socket_ipv6() -> IoResult<Self> {
            Self::new_raw(Domain::IPV6, Protocol::ICMPV6)
        }
        #[instrument(skip(self), level = "trace")]
        fn set_ttl(&mut self, ttl: u32) -> IoResult<()> {
            self.inner
                .set_ttl(ttl)
                .map_err(|err| IoError::Other(err, IoOperation::SetTtl))
        }
        #[instrument(skip(self, buf), level = "trace")]
        fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> IoResult<()> {
            self.inner
                .send_to(buf, &SockAddr::from(addr))
                .map_err(|err| IoError::SendTo(err, addr))?;
            Ok(())
        }
        #[instrument(skip(self), level = "trace")]
        fn is_readable(&mut self, timeout: Duration) -> IoResult<bool> {
            let mut read = FdSet::new();
            read.insert(self.inner.as_fd());
            let readable = nix::sys::select::select(
                None,
                Some(&mut read),
                None,
                None,
                Some(&mut TimeVal::milliseconds(timeout.as_millis() as i64)),
            );
            match readable {
                Ok(readable) => Ok(readable == 1),
                Err(nix::Error::EINTR) => Ok(false),
                Err(err) => Err(IoError::Other(
                    std::io::Error::from(err),
                    IoOperation::Select,
                )),
            }
        }
        #[instrument(skip(self, buf), level = "trace")]
        fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
            let bytes_read = self
                .inner
                .read(buf)
                .map_err(|err| IoError::Other(err, IoOperation::Read))?;
            tracing::trace!(bytes_read);
            Ok(bytes_read)
        }
    }
}

#[cfg(unix)]
pub use unix::SocketImpl;
