use crate::algorithm::{Algorithm, AlgorithmFactory, Context, Options, OptionValue};
use crate::constants::MAX_TTL;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::event::{Event, Notice};
use crate::net::socket::Socket;
use crate::packet::fields;
use crate::probe::{FieldValue, Probe, ProbeReply};
use crate::types::TimeToLive;
use std::net::IpAddr;
use std::sync::Arc;

/// A reply matched one of the instance's probes; forwarded for every hop.
pub const TRACEROUTE_PROBE_REPLY: &str = "traceroute-probe-reply";

/// The destination replied; the trace is complete.
pub const TRACEROUTE_DESTINATION_REACHED: &str = "traceroute-destination-reached";

/// The maximum ttl was crossed before the destination replied.
pub const TRACEROUTE_MAX_TTL_REACHED: &str = "traceroute-max-ttl-reached";

/// The number of consecutive fully-starred hops after which the trace gives
/// up.
const GAP_STOP_HOPS: usize = 3;

/// Validated traceroute options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracerouteOptions {
    /// The first ttl to probe.
    pub min_ttl: TimeToLive,
    /// The last ttl to probe.
    pub max_ttl: TimeToLive,
    /// The number of probes per hop.
    pub num_probes: usize,
    /// The destination address.
    pub dst_ip: IpAddr,
}

impl TracerouteOptions {
    /// Parse and validate the option surface.
    ///
    /// Unknown keys are rejected upstream when the options are merged over
    /// the registered defaults.
    pub fn parse(options: &Options) -> Result<Self> {
        let min_ttl = parse_ttl(options, "min-ttl")?;
        let max_ttl = parse_ttl(options, "max-ttl")?;
        if min_ttl >= max_ttl {
            return Err(Error::InvalidOption(format!(
                "min-ttl ({}) must be less than max-ttl ({})",
                min_ttl.0, max_ttl.0
            )));
        }
        let num_probes = options
            .get_int("num-probes")
            .filter(|&count| count >= 1)
            .ok_or_else(|| Error::InvalidOption(String::from("num-probes")))?;
        let dst_ip = options
            .get_str("dst-ip")
            .unwrap_or_default()
            .parse()
            .map_err(|_| Error::InvalidOption(String::from("dst-ip")))?;
        Ok(Self {
            min_ttl,
            max_ttl,
            num_probes: num_probes as usize,
            dst_ip,
        })
    }
}

fn parse_ttl(options: &Options, name: &str) -> Result<TimeToLive> {
    options
        .get_int(name)
        .filter(|&ttl| (1..=i64::from(MAX_TTL)).contains(&ttl))
        .map(|ttl| TimeToLive(ttl as u8))
        .ok_or_else(|| Error::InvalidOption(name.to_string()))
}

/// The traceroute algorithm.
///
/// Probes the destination hop by hop, `num_probes` probes per ttl, forwarding
/// every matched reply to its caller.  The trace completes when the
/// destination replies, when the maximum ttl is crossed, or when three
/// consecutive hops produce no reply at all (the gap stop).
#[derive(Debug)]
pub struct Traceroute {
    options: TracerouteOptions,
    ttl: TimeToLive,
    num_sent_probes: usize,
    num_stars: usize,
    num_undiscovered: usize,
    destination_reached: bool,
}

impl Traceroute {
    #[must_use]
    pub fn new(options: TracerouteOptions) -> Self {
        Self {
            options,
            ttl: options.min_ttl,
            num_sent_probes: 0,
            num_stars: 0,
            num_undiscovered: 0,
            destination_reached: false,
        }
    }

    /// Have `num_probes` probes been sent for the current hop?
    fn at_hop_boundary(&self) -> bool {
        self.num_sent_probes % self.options.num_probes == 0
    }

    /// Send the probe for the current ttl, or report that the maximum ttl
    /// has been crossed and stop.
    fn send_next_probe(&mut self, ctx: &mut Context, payload: Option<Arc<ProbeReply>>) {
        if self.ttl > self.options.max_ttl {
            ctx.emit(Notice::new(TRACEROUTE_MAX_TTL_REACHED, payload));
            ctx.terminate();
            return;
        }
        self.num_sent_probes += 1;
        let mut probe = Probe::new(self.options.dst_ip);
        probe
            .fields_mut()
            .set(fields::TTL, FieldValue::U8(self.ttl.0))
            .set(fields::ICMP_ID, FieldValue::U16(ctx.instance().0 as u16))
            .set(fields::ICMP_SEQ, FieldValue::U16(self.num_sent_probes as u16));
        ctx.send_probe(probe);
    }
}

impl Algorithm for Traceroute {
    fn on_event(&mut self, ctx: &mut Context, event: &Event) -> Result<()> {
        match event {
            Event::Init => {
                self.send_next_probe(ctx, None);
            }
            Event::Reply(matched) => {
                // An address was discovered, reset the star counters.
                self.num_stars = 0;
                self.num_undiscovered = 0;
                if matched.source == Some(self.options.dst_ip) {
                    self.destination_reached = true;
                }
                ctx.emit(Notice::new(TRACEROUTE_PROBE_REPLY, Some(Arc::clone(matched))));
                if self.at_hop_boundary() {
                    if self.destination_reached {
                        ctx.emit(Notice::new(
                            TRACEROUTE_DESTINATION_REACHED,
                            Some(Arc::clone(matched)),
                        ));
                        ctx.terminate();
                        return Ok(());
                    }
                    self.ttl += TimeToLive(1);
                }
                self.send_next_probe(ctx, Some(Arc::clone(matched)));
            }
            Event::Timeout(_) => {
                self.num_stars += 1;
                if self.at_hop_boundary() {
                    if self.num_stars == self.options.num_probes {
                        self.num_undiscovered += 1;
                    }
                    // The last hops were all stars, give up.
                    if self.num_undiscovered == GAP_STOP_HOPS {
                        ctx.terminate();
                        return Ok(());
                    }
                    self.num_stars = 0;
                    self.ttl += TimeToLive(1);
                }
                self.send_next_probe(ctx, None);
            }
            Event::SendFailed(_, cause) => {
                return Err(Error::Other(cause.clone()));
            }
            Event::Terminated | Event::Error(_) | Event::Notice(_) => {}
        }
        Ok(())
    }
}

/// The default options the traceroute algorithm is registered with.
#[must_use]
pub fn traceroute_defaults() -> Options {
    Options::new()
        .with("min-ttl", OptionValue::Int(1))
        .with("max-ttl", OptionValue::Int(30))
        .with("num-probes", OptionValue::Int(3))
        .with("dst-ip", OptionValue::Str(String::new()))
}

/// Register the traceroute algorithm with an engine under the name
/// `traceroute`.
pub fn register_traceroute<S: Socket>(engine: &mut Engine<S>) {
    let factory: AlgorithmFactory = Box::new(|options| {
        Ok(Box::new(Traceroute::new(TracerouteOptions::parse(options)?)))
    });
    engine.register_algorithm("traceroute", factory, traceroute_defaults());
}
