//! A scripted network for engine-level tests.
//!
//! The fake sockets and sniffer share a [`World`] which models a routed path
//! per destination: a transmitted probe is resolved against the route for its
//! destination and the responding hop's reply is surfaced through the sniffer
//! on the next capture wait.  No real sockets, packets or timers are
//! involved, so scenarios run deterministically and instantly.

use crate::algorithm::{Algorithm, Context};
use crate::builder::Builder;
use crate::engine::Engine;
use crate::error::{IoError, IoOperation, IoResult, Result};
use crate::event::Event;
use crate::net::socket::Socket;
use crate::net::{CaptureFilter, Family, Protocol};
use crate::packet::{fields, Codec, Fingerprint, PacketError, PacketResult};
use crate::probe::{FieldValue, Fields, Probe, Reply};
use crate::queue::ReplySink;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

thread_local! {
    static CURRENT_WORLD: RefCell<Option<Rc<RefCell<World>>>> = const { RefCell::new(None) };
}

/// A hop on a simulated route.
#[derive(Debug, Clone, Copy)]
pub enum Hop {
    /// Replies from the given address.
    Responder(IpAddr),
    /// Never replies.
    Silent,
    /// Replies from the given address, but only after the probe's deadline
    /// has passed.
    Late(IpAddr),
}

/// A transmitted probe as observed by the simulated network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentProbe {
    pub dest: IpAddr,
    pub ttl: u8,
    pub identifier: u16,
    pub sequence: u16,
}

/// The simulated network state.
#[derive(Debug, Default)]
pub struct World {
    routes: BTreeMap<IpAddr, Vec<Hop>>,
    pending: VecDeque<Reply>,
    delayed: Vec<(u64, Reply)>,
    waits: u64,
    /// Every probe transmitted, in order.
    pub sent: Vec<SentProbe>,
    /// Scripted send failures, consumed one per `send_to`.
    pub fail_sends: VecDeque<io::ErrorKind>,
    /// Fail the next socket creation with this kind.
    pub fail_socket_create: Option<io::ErrorKind>,
}

impl World {
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::default()))
    }

    /// Make this world visible to fake sockets created on this thread.
    pub fn install(world: &Rc<RefCell<Self>>) {
        CURRENT_WORLD.with(|current| *current.borrow_mut() = Some(Rc::clone(world)));
    }

    /// Define the route to a destination.
    ///
    /// Index `i` is the responder for ttl `i + 1`; probes with a larger ttl
    /// resolve to the final hop, which plays the part of the target itself.
    pub fn route(&mut self, dest: IpAddr, hops: Vec<Hop>) {
        self.routes.insert(dest, hops);
    }

    fn on_send(&mut self, dest: IpAddr, ttl: u8, bytes: &[u8]) {
        let identifier = u16::from_be_bytes([bytes[0], bytes[1]]);
        let sequence = u16::from_be_bytes([bytes[2], bytes[3]]);
        self.sent.push(SentProbe {
            dest,
            ttl,
            identifier,
            sequence,
        });
        let Some(route) = self.routes.get(&dest) else {
            return;
        };
        if route.is_empty() || ttl == 0 {
            return;
        }
        let hop_at = (usize::from(ttl) - 1).min(route.len() - 1);
        match route[hop_at] {
            Hop::Responder(src) => {
                let reply = make_reply(src, identifier, sequence);
                self.pending.push_back(reply);
            }
            Hop::Silent => {}
            Hop::Late(src) => {
                let reply = make_reply(src, identifier, sequence);
                self.delayed.push((self.waits + 2, reply));
            }
        }
    }

    fn on_wait(&mut self) {
        self.waits += 1;
        let due = self.waits;
        let mut released = Vec::new();
        self.delayed.retain(|(release_at, reply)| {
            if *release_at <= due {
                released.push(reply.clone());
                false
            } else {
                true
            }
        });
        self.pending.extend(released);
    }
}

fn make_reply(src: IpAddr, identifier: u16, sequence: u16) -> Reply {
    let mut reply_fields = Fields::new();
    reply_fields
        .set(fields::SRC_IP, FieldValue::Addr(src))
        .set(fields::ICMP_ID, FieldValue::U16(identifier))
        .set(fields::ICMP_SEQ, FieldValue::U16(sequence));
    Reply::new(Vec::new(), reply_fields, SystemTime::now())
}

fn current_world() -> Rc<RefCell<World>> {
    CURRENT_WORLD.with(|current| {
        Rc::clone(
            current
                .borrow()
                .as_ref()
                .expect("no world installed on this thread"),
        )
    })
}

/// A socket which transmits into the installed [`World`].
pub struct FakeSocket {
    world: Rc<RefCell<World>>,
    ttl: u8,
}

impl FakeSocket {
    fn create() -> IoResult<Self> {
        let world = current_world();
        let failure = world.borrow_mut().fail_socket_create.take();
        if let Some(kind) = failure {
            return Err(IoError::Other(
                io::Error::from(kind),
                IoOperation::NewSocket,
            ));
        }
        Ok(Self { world, ttl: 0 })
    }
}

impl Socket for FakeSocket {
    fn new_icmp_send_socket_ipv4() -> IoResult<Self> {
        Self::create()
    }
    fn new_icmp_send_socket_ipv6() -> IoResult<Self> {
        Self::create()
    }
    fn new_recv_socket_ipv4() -> IoResult<Self> {
        Self::create()
    }
    fn new_recv_socket_ipv6() -> IoResult<Self> {
        Self::create()
    }
    fn set_ttl(&mut self, ttl: u32) -> IoResult<()> {
        self.ttl = ttl as u8;
        Ok(())
    }
    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> IoResult<()> {
        let mut world = self.world.borrow_mut();
        if let Some(kind) = world.fail_sends.pop_front() {
            return Err(IoError::SendTo(io::Error::from(kind), addr));
        }
        world.on_send(addr.ip(), self.ttl, buf);
        Ok(())
    }
    fn is_readable(&mut self, _timeout: Duration) -> IoResult<bool> {
        Ok(false)
    }
    fn read(&mut self, _buf: &mut [u8]) -> IoResult<usize> {
        Ok(0)
    }
}

/// A codec over 4-byte `(identifier, sequence)` wire payloads.
pub struct FakeCodec;

impl Codec for FakeCodec {
    fn filter(&self) -> CaptureFilter {
        CaptureFilter::new(Family::Ipv4, Protocol::Icmp)
    }

    fn forge(&self, probe_fields: &Fields) -> PacketResult<Vec<u8>> {
        let identifier = probe_fields
            .get(fields::ICMP_ID)
            .and_then(FieldValue::as_u16)
            .ok_or(PacketError::MissingField(fields::ICMP_ID))?;
        let sequence = probe_fields
            .get(fields::ICMP_SEQ)
            .and_then(FieldValue::as_u16)
            .ok_or(PacketError::MissingField(fields::ICMP_SEQ))?;
        let mut bytes = Vec::with_capacity(4);
        bytes.extend_from_slice(&identifier.to_be_bytes());
        bytes.extend_from_slice(&sequence.to_be_bytes());
        Ok(bytes)
    }

    fn parse(&self, _bytes: &[u8]) -> PacketResult<Fields> {
        Err(PacketError::NotACandidate)
    }

    fn fingerprint(&self, from: &Fields) -> Option<Fingerprint> {
        let identifier = from.get(fields::ICMP_ID).and_then(FieldValue::as_u16)?;
        let sequence = from.get(fields::ICMP_SEQ).and_then(FieldValue::as_u16)?;
        Some(Fingerprint(
            (u64::from(identifier) << 16) | u64::from(sequence),
        ))
    }
}

/// A sniffer which surfaces the world's pending replies.
///
/// Replies become visible on the capture wait after the probe which elicited
/// them was sent, so a reply is always drained before the probe's own
/// deadline is serviced, as with a real capture.
pub struct FakeSniffer {
    world: Rc<RefCell<World>>,
    sink: Option<ReplySink>,
}

impl FakeSniffer {
    pub fn new(world: Rc<RefCell<World>>) -> Self {
        Self { world, sink: None }
    }
}

impl crate::net::sniffer::Sniffer for FakeSniffer {
    fn start(&mut self, _filter: CaptureFilter, sink: ReplySink) -> Result<()> {
        self.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.sink = None;
    }

    fn wait_readable(&mut self, _timeout: Duration) -> Result<bool> {
        let mut world = self.world.borrow_mut();
        world.on_wait();
        if world.waits > 100_000 {
            return Err(crate::error::Error::Other(String::from(
                "simulation ran away",
            )));
        }
        Ok(!world.pending.is_empty())
    }

    fn drain(&mut self) -> Result<usize> {
        let Some(sink) = self.sink.as_ref() else {
            return Ok(0);
        };
        let mut world = self.world.borrow_mut();
        let mut count = 0;
        while let Some(reply) = world.pending.pop_front() {
            sink.push(reply);
            count += 1;
        }
        Ok(count)
    }
}

/// Build an engine wired to the given world.
pub fn test_engine(world: &Rc<RefCell<World>>, timeout: Duration) -> Engine<FakeSocket> {
    World::install(world);
    Builder::new()
        .timeout(timeout)
        .poll_interval(Duration::ZERO)
        .build::<FakeSocket>(Arc::new(FakeCodec), Box::new(FakeSniffer::new(Rc::clone(world))))
        .expect("valid test config")
}

/// An algorithm which records every event it receives.
///
/// Sends its scripted probes on init and terminates after a fixed number of
/// probe outcomes (replies, timeouts or send failures).
pub struct Recorder {
    log: Rc<RefCell<Vec<Event>>>,
    probes_on_init: Vec<Probe>,
    terminate_after: usize,
    outcomes: usize,
}

impl Recorder {
    pub fn new(
        log: Rc<RefCell<Vec<Event>>>,
        probes_on_init: Vec<Probe>,
        terminate_after: usize,
    ) -> Self {
        Self {
            log,
            probes_on_init,
            terminate_after,
            outcomes: 0,
        }
    }
}

impl Algorithm for Recorder {
    fn on_event(&mut self, ctx: &mut Context, event: &Event) -> Result<()> {
        self.log.borrow_mut().push(event.clone());
        match event {
            Event::Init => {
                for probe in self.probes_on_init.drain(..) {
                    ctx.send_probe(probe);
                }
            }
            Event::Reply(_) | Event::Timeout(_) | Event::SendFailed(_, _) => {
                self.outcomes += 1;
                if self.outcomes >= self.terminate_after {
                    ctx.terminate();
                }
            }
            _ => {}
        }
        Ok(())
    }
}
