use crate::error::Result;
use crate::net::socket::Socket;
use crate::net::{CaptureFilter, Family};
use crate::packet::Codec;
use crate::probe::Reply;
use crate::queue::ReplySink;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// The maximum size of a captured frame.
const MAX_PACKET_SIZE: usize = 1024;

/// The capture side consumed by the engine.
///
/// An implementation binds a coarse filter, pushes every captured reply into
/// the sink and reports readiness to the loop.  The readiness wait is the
/// loop's only suspension point.  An implementation which runs its own
/// capture thread may push into the sink from that thread; the sink is the
/// only engine structure it may touch.
pub trait Sniffer {
    /// Start capturing frames which pass the filter.
    fn start(&mut self, filter: CaptureFilter, sink: ReplySink) -> Result<()>;

    /// Stop capturing.
    fn stop(&mut self);

    /// Wait until a captured frame is ready or the timeout elapses.
    fn wait_readable(&mut self, timeout: Duration) -> Result<bool>;

    /// Drain captured frames into the sink, returning how many were pushed.
    fn drain(&mut self) -> Result<usize>;
}

/// A sniffer over a raw receive socket.
///
/// Reads whole datagrams from the socket and has the packet layer parse each
/// one into a reply; frames the packet layer rejects are discarded, the
/// filter is coarse by design.
pub struct SocketSniffer<S> {
    codec: Arc<dyn Codec>,
    socket: Option<S>,
    sink: Option<ReplySink>,
}

impl<S> SocketSniffer<S> {
    #[must_use]
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self {
            codec,
            socket: None,
            sink: None,
        }
    }
}

impl<S: Socket> Sniffer for SocketSniffer<S> {
    fn start(&mut self, filter: CaptureFilter, sink: ReplySink) -> Result<()> {
        let socket = match filter.family {
            Family::Ipv4 => S::new_recv_socket_ipv4()?,
            Family::Ipv6 => S::new_recv_socket_ipv6()?,
        };
        self.socket = Some(socket);
        self.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.socket = None;
        self.sink = None;
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<bool> {
        match self.socket.as_mut() {
            Some(socket) => Ok(socket.is_readable(timeout)?),
            None => Ok(false),
        }
    }

    fn drain(&mut self) -> Result<usize> {
        let (Some(socket), Some(sink)) = (self.socket.as_mut(), self.sink.as_ref()) else {
            return Ok(0);
        };
        let mut count = 0;
        let mut buf = [0_u8; MAX_PACKET_SIZE];
        while socket.is_readable(Duration::ZERO)? {
            let len = match socket.read(&mut buf) {
                Ok(0) => break,
                Ok(len) => len,
                Err(err) if err.is_transient() => break,
                Err(err) => return Err(err.into()),
            };
            let bytes = buf[..len].to_vec();
            match self.codec.parse(&bytes) {
                Ok(fields) => {
                    sink.push(Reply::new(bytes, fields, SystemTime::now()));
                    count += 1;
                }
                Err(err) => {
                    tracing::debug!(%err, "discarding unparseable frame");
                }
            }
        }
        Ok(count)
    }
}
