use crate::algorithm::{Action, Algorithm, AlgorithmFactory, Context, Options, Registration};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::event::{Dispatch, Event};
use crate::net::sniffer::Sniffer;
use crate::net::socket::Socket;
use crate::net::{Family, SocketPool};
use crate::packet::{fields, Codec};
use crate::probe::{FieldValue, PendingProbe, Probe, ProbeRecord, ProbeReply, Reply};
use crate::queue::{ReplyQueue, SendQueue};
use crate::timer::DeadlineQueue;
use crate::types::{InstanceId, ProbeFlags, ProbeTag, TimerId};
use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::instrument;

/// A transmitted probe awaiting a reply or its deadline.
#[derive(Debug, Clone)]
struct FlightEntry {
    record: Arc<ProbeRecord>,
    timer: TimerId,
}

/// A running algorithm instance.
struct InstanceSlot {
    algorithm: Box<dyn Algorithm>,
    caller: Option<InstanceId>,
}

/// The probe lifecycle engine.
///
/// A single cooperative loop multiplexing the send queue, the sniffer and its
/// receive queue, the probe deadline queue and the events algorithm instances
/// emit.  One pass services the ready sources in a fixed priority order:
/// sniffer drain, reply matching, deadline expiry, transmission, algorithm
/// events.  Replies already captured are therefore always matched before the
/// corresponding deadline can fire.
///
/// Construct with the [`crate::Builder`]; probes, replies and deadlines are
/// engine-internal and owned exclusively by the loop thread.  The only state
/// shared with another thread is the receive queue the sniffer pushes into.
pub struct Engine<S: Socket> {
    config: EngineConfig,
    codec: Arc<dyn Codec>,
    sniffer: Box<dyn Sniffer>,
    pool: SocketPool<S>,
    sendq: SendQueue,
    recvq: ReplyQueue,
    flight: Vec<FlightEntry>,
    timers: DeadlineQueue,
    last_tag: u64,
    registry: BTreeMap<String, Registration>,
    instances: BTreeMap<InstanceId, InstanceSlot>,
    next_instance: u64,
    events: VecDeque<Dispatch>,
    started: bool,
    stopped: bool,
}

impl<S: Socket> std::fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl<S: Socket> Engine<S> {
    pub(crate) fn new(
        config: EngineConfig,
        codec: Arc<dyn Codec>,
        sniffer: Box<dyn Sniffer>,
    ) -> Self {
        Self {
            config,
            codec,
            sniffer,
            pool: SocketPool::new(),
            sendq: SendQueue::new(config.send_queue_capacity),
            recvq: ReplyQueue::new(config.reply_queue_capacity),
            flight: Vec::new(),
            timers: DeadlineQueue::new(),
            last_tag: 0,
            registry: BTreeMap::new(),
            instances: BTreeMap::new(),
            next_instance: 0,
            events: VecDeque::new(),
            started: false,
            stopped: false,
        }
    }

    /// The engine-wide probe timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Set the engine-wide probe timeout.
    ///
    /// Affects probes armed after the call; probes already in flight keep
    /// their deadline.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = timeout;
    }

    /// Register an algorithm under a name, with the default options new
    /// instances are merged over.
    pub fn register_algorithm(&mut self, name: &str, factory: AlgorithmFactory, defaults: Options) {
        self.registry.insert(
            name.to_string(),
            Registration { factory, defaults },
        );
    }

    /// Create an instance of a registered algorithm.
    ///
    /// The options are overlaid on the registered defaults; unknown keys and
    /// invalid values are rejected here, before any probe is transmitted.
    /// The instance receives [`Event::Init`] once the loop runs.  With no
    /// caller, the instance is a root whose notices surface through the sink
    /// passed to [`Engine::run_with`].
    pub fn run_instance(
        &mut self,
        name: &str,
        options: &Options,
        caller: Option<InstanceId>,
    ) -> Result<InstanceId> {
        self.spawn_instance(name, options, caller)
    }

    /// Enqueue a probe for transmission on behalf of an instance.
    pub fn send(&mut self, origin: InstanceId, probe: Probe) -> Result<()> {
        self.sendq.push(PendingProbe { probe, origin })
    }

    /// Stop the loop at the start of its next pass.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Run the loop until it is stopped or every instance has terminated.
    pub fn run(&mut self) -> Result<()> {
        self.run_with(|_, _| ())
    }

    /// Run the loop, surfacing root instance events through `sink`.
    ///
    /// The sink receives every notice emitted by a root instance together
    /// with the emitting instance id, and a final [`Event::Terminated`] when
    /// a root instance is destroyed.  Engine-level failures (socket
    /// permissions, tag exhaustion) stop the loop and are returned;
    /// per-probe failures are delivered to the originating instance instead.
    pub fn run_with<F>(&mut self, mut sink: F) -> Result<()>
    where
        F: FnMut(InstanceId, &Event),
    {
        self.stopped = false;
        if !self.started {
            self.sniffer.start(self.codec.filter(), self.recvq.sink())?;
            self.started = true;
        }
        loop {
            self.dispatch_pending(&mut sink)?;
            if self.stopped || self.instances.is_empty() {
                return Ok(());
            }
            self.tick()?;
        }
    }

    /// One pass of the loop: a bounded capture wait, then every source
    /// serviced in priority order.  The events this queues are dispatched at
    /// the top of the next pass.
    fn tick(&mut self) -> Result<()> {
        let budget = self.wait_budget(SystemTime::now());
        self.sniffer.wait_readable(budget)?;
        self.sniffer.drain()?;
        self.process_recvq();
        self.process_timeouts();
        self.process_sendq()?;
        Ok(())
    }

    /// How long the capture wait may block.
    ///
    /// Zero when any in-memory source is already ready; otherwise bounded by
    /// the earliest armed deadline and the configured poll interval.
    fn wait_budget(&self, now: SystemTime) -> Duration {
        if !self.events.is_empty()
            || self.recvq.is_readable()
            || self.sendq.is_readable()
            || self.timers.is_readable(now)
        {
            return Duration::ZERO;
        }
        let poll = self.config.poll_interval;
        self.timers.next_deadline().map_or(poll, |deadline| {
            deadline
                .duration_since(now)
                .unwrap_or(Duration::ZERO)
                .min(poll)
        })
    }

    /// Drain the receive queue, matching each reply against the in-flight
    /// list.
    fn process_recvq(&mut self) {
        while let Some(reply) = self.recvq.pop() {
            self.match_reply(reply);
        }
    }

    /// Match a reply against the in-flight list, oldest first.
    ///
    /// The first insertion wins, so a reply can only resolve the oldest
    /// compatible probe.  An unmatched reply is dropped silently; the capture
    /// filter is coarse and unmatched replies are common.
    #[instrument(skip(self, reply), level = "trace")]
    fn match_reply(&mut self, reply: Reply) {
        let matched = self
            .flight
            .iter()
            .position(|entry| self.codec.matches(&entry.record.fields, &reply.fields));
        let Some(at) = matched else {
            tracing::debug!("reply matched no in-flight probe, dropped");
            return;
        };
        let entry = self.flight.remove(at);
        self.timers.disarm(entry.timer);
        let source = self.codec.source_address(&reply.fields);
        tracing::debug!(tag = %entry.record.tag, ?source, "probe reply matched");
        let matched = Arc::new(ProbeReply {
            probe: Arc::clone(&entry.record),
            reply: Arc::new(reply),
            source,
        });
        self.events.push_back(Dispatch {
            target: entry.record.origin,
            event: Event::Reply(matched),
        });
    }

    /// Expire every probe whose deadline has elapsed, oldest first.
    ///
    /// A probe whose reply was already matched has had its deadline disarmed
    /// and cannot expire; reply and timeout are mutually exclusive.
    fn process_timeouts(&mut self) {
        let now = SystemTime::now();
        for timer in self.timers.pop_expired(now) {
            if let Some(at) = self.flight.iter().position(|entry| entry.timer == timer) {
                let entry = self.flight.remove(at);
                tracing::debug!(tag = %entry.record.tag, "probe timed out");
                self.events.push_back(Dispatch {
                    target: entry.record.origin,
                    event: Event::Timeout(entry.record),
                });
            }
        }
    }

    /// Drain up to `send_batch` probes from the send queue.
    fn process_sendq(&mut self) -> Result<()> {
        for _ in 0..self.config.send_batch {
            let Some(pending) = self.sendq.pop() else {
                break;
            };
            self.transmit(pending)?;
        }
        Ok(())
    }

    /// Transmit one probe.
    ///
    /// Assigns a fresh tag, forges the wire bytes, sends them through a
    /// pool-borrowed socket, arms the deadline and appends the frozen record
    /// to the in-flight list.  A transient send error requeues the probe once
    /// for the next pass; any further failure is delivered to the origin
    /// instance as [`Event::SendFailed`].  Socket creation failure is fatal.
    #[instrument(skip(self, pending), level = "trace")]
    fn transmit(&mut self, pending: PendingProbe) -> Result<()> {
        let PendingProbe { mut probe, origin } = pending;
        if !self.instances.contains_key(&origin) {
            tracing::debug!(%origin, "dropping probe from terminated instance");
            return Ok(());
        }
        let tag = self.next_tag()?;
        debug_assert!(self.flight.iter().all(|entry| entry.record.tag != tag));
        let payload = match self.codec.forge(probe.fields()) {
            Ok(payload) => payload,
            Err(err) => {
                self.send_failed(probe, tag, origin, Vec::new(), &err.to_string());
                return Ok(());
            }
        };
        let ttl = probe.fields().get(fields::TTL).and_then(FieldValue::as_u8);
        let dest = SocketAddr::new(probe.dest(), 0);
        let protocol = self.codec.filter().protocol;
        let outcome = {
            let socket = self.pool.lend(Family::of(probe.dest()), protocol)?;
            match ttl {
                Some(ttl) => socket
                    .set_ttl(u32::from(ttl))
                    .and_then(|()| socket.send_to(&payload, dest)),
                None => socket.send_to(&payload, dest),
            }
        };
        match outcome {
            Ok(()) => {
                let sent_at = SystemTime::now();
                let deadline = sent_at + self.config.timeout;
                debug_assert!(self
                    .flight
                    .last()
                    .is_none_or(|entry| entry.record.sent_at <= sent_at));
                let timer = self.timers.arm(deadline);
                let record = Arc::new(probe.into_record(tag, origin, payload, sent_at, deadline));
                tracing::debug!(tag = %record.tag, dest = %record.dest, "probe transmitted");
                self.flight.push(FlightEntry { record, timer });
            }
            Err(err) if err.is_transient() && !probe.flags().contains(ProbeFlags::RETRIED) => {
                tracing::debug!(%err, "transient send error, probe requeued");
                probe.flags_mut().insert(ProbeFlags::RETRIED);
                self.sendq.push_front(PendingProbe { probe, origin });
            }
            Err(err) => {
                self.send_failed(probe, tag, origin, payload, &err.to_string());
            }
        }
        Ok(())
    }

    /// Deliver a send failure to the origin instance.
    fn send_failed(
        &mut self,
        probe: Probe,
        tag: ProbeTag,
        origin: InstanceId,
        payload: Vec<u8>,
        cause: &str,
    ) {
        tracing::debug!(%tag, %origin, cause, "probe send failed");
        let now = SystemTime::now();
        let record = Arc::new(probe.into_record(tag, origin, payload, now, now));
        self.events.push_back(Dispatch {
            target: origin,
            event: Event::SendFailed(record, cause.to_string()),
        });
    }

    /// Allocate the next probe tag.
    fn next_tag(&mut self) -> Result<ProbeTag> {
        self.last_tag = self
            .last_tag
            .checked_add(1)
            .ok_or(Error::TagSpaceExhausted)?;
        Ok(ProbeTag(self.last_tag))
    }

    /// Deliver every queued event in order.
    fn dispatch_pending<F>(&mut self, sink: &mut F) -> Result<()>
    where
        F: FnMut(InstanceId, &Event),
    {
        while let Some(Dispatch { target, event }) = self.events.pop_front() {
            self.dispatch(target, &event, sink);
        }
        Ok(())
    }

    /// Deliver one event to its target instance and apply the effects the
    /// handler collected.
    ///
    /// Events whose target has already terminated are dropped; that is how a
    /// probe outlives its origin without dangling.
    fn dispatch<F>(&mut self, target: InstanceId, event: &Event, sink: &mut F)
    where
        F: FnMut(InstanceId, &Event),
    {
        let Some(mut slot) = self.instances.remove(&target) else {
            tracing::debug!(%target, "dropping event for terminated instance");
            return;
        };
        let caller = slot.caller;
        let mut ctx = Context::new(target);
        let outcome = slot.algorithm.on_event(&mut ctx, event);
        let is_final = matches!(event, Event::Terminated);
        if is_final {
            self.cancel_probes(target);
            if caller.is_none() {
                sink(target, &Event::Terminated);
            }
        } else {
            self.instances.insert(target, slot);
        }
        let mut terminate = false;
        for action in ctx.into_actions() {
            match action {
                Action::Send(probe) => {
                    if is_final {
                        continue;
                    }
                    if let Err(err) = self.sendq.push(PendingProbe {
                        probe,
                        origin: target,
                    }) {
                        tracing::warn!(%target, %err, "probe submission failed");
                        self.events.push_back(Dispatch {
                            target,
                            event: Event::Error(err.to_string()),
                        });
                        terminate = true;
                    }
                }
                Action::Spawn { name, options } => {
                    if let Err(err) = self.spawn_instance(&name, &options, Some(target)) {
                        self.events.push_back(Dispatch {
                            target,
                            event: Event::Error(err.to_string()),
                        });
                        terminate = true;
                    }
                }
                Action::Emit(notice) => match caller {
                    Some(parent) => self.events.push_back(Dispatch {
                        target: parent,
                        event: Event::Notice(notice),
                    }),
                    None => sink(target, &Event::Notice(notice)),
                },
                Action::Terminate => terminate = true,
                Action::Stop => self.stopped = true,
            }
        }
        if let Err(err) = outcome {
            tracing::warn!(%target, %err, "handler failed");
            if !is_final && !matches!(event, Event::Error(_)) {
                self.events.push_back(Dispatch {
                    target,
                    event: Event::Error(err.to_string()),
                });
                terminate = true;
            }
        }
        if terminate && !is_final {
            self.events.push_back(Dispatch {
                target,
                event: Event::Terminated,
            });
        }
    }

    /// Disarm the deadlines of a terminated instance's in-flight probes.
    ///
    /// Replies for those probes may still arrive; they find nothing on the
    /// in-flight list and are dropped.
    fn cancel_probes(&mut self, target: InstanceId) {
        let timers = &mut self.timers;
        self.flight.retain(|entry| {
            if entry.record.origin == target {
                timers.disarm(entry.timer);
                false
            } else {
                true
            }
        });
    }

    fn spawn_instance(
        &mut self,
        name: &str,
        options: &Options,
        caller: Option<InstanceId>,
    ) -> Result<InstanceId> {
        let registration = self
            .registry
            .get(name)
            .ok_or_else(|| Error::UnknownAlgorithm(name.to_string()))?;
        let merged = registration.defaults.merged_with(options)?;
        let algorithm = (registration.factory)(&merged)?;
        self.next_instance += 1;
        let id = InstanceId(self.next_instance);
        self.instances.insert(id, InstanceSlot { algorithm, caller });
        self.events.push_back(Dispatch {
            target: id,
            event: Event::Init,
        });
        tracing::debug!(%id, name, "instance created");
        Ok(id)
    }
}

impl<S: Socket> Drop for Engine<S> {
    fn drop(&mut self) {
        if self.started {
            self.sniffer.stop();
        }
    }
}
