//! Pathprobe - a programmable active network measurement engine.
//!
//! This crate provides a probe lifecycle engine: a single cooperative event
//! loop which transmits crafted probes, correlates captured replies against
//! the probes in flight, expires per-probe deadlines and dispatches typed
//! events to a tree of user-supplied algorithm instances.  A traceroute
//! algorithm is included as the reference instance.
//!
//! The engine consumes the packet layer through the [`Codec`] trait (forge,
//! parse, fingerprint matching) and the capture layer through the [`Sniffer`]
//! trait; [`IcmpCodec`] and [`SocketSniffer`] are the provided ICMP-over-IPv4
//! implementations.
//!
//! # Example
//!
//! The following example traces the path to a target and prints each event
//! as it surfaces:
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use pathprobe::{Builder, IcmpCodec, OptionValue, Options, SocketImpl, SocketSniffer};
//! use std::sync::Arc;
//!
//! let codec = Arc::new(IcmpCodec::default());
//! let sniffer = Box::new(SocketSniffer::<SocketImpl>::new(codec.clone()));
//! let mut engine = Builder::new().build::<SocketImpl>(codec, sniffer)?;
//! pathprobe::register_traceroute(&mut engine);
//! let options = Options::new()
//!     .with("dst-ip", OptionValue::Str(String::from("1.1.1.1")))
//!     .with("max-ttl", OptionValue::Int(16));
//! engine.run_instance("traceroute", &options, None)?;
//! engine.run_with(|instance, event| println!("{instance}: {event:?}"))?;
//! # Ok(())
//! # }
//! ```
//!
//! Note that transmitting probes and capturing replies requires raw socket
//! access (the `CAP_NET_RAW` capability on Linux).
//!
//! # See Also
//!
//! - [`Builder`] - Build an [`Engine`].
//! - [`Engine::run_instance`] - Start an algorithm instance.
//! - [`Engine::run_with`] - Run the loop with an event sink.
//! - [`Algorithm`] - Implement a custom algorithm.
#![warn(clippy::all, clippy::pedantic, clippy::nursery, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::option_if_let_else,
    clippy::missing_const_for_fn,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]
#![deny(unsafe_code)]

mod algorithm;
mod builder;
mod config;
mod constants;
mod engine;
mod error;
mod event;
mod net;
mod packet;
mod probe;
mod queue;
#[cfg(test)]
mod sim;
mod timer;
mod trace;
mod types;

pub use algorithm::{Algorithm, AlgorithmFactory, Context, OptionValue, Options};
pub use builder::Builder;
pub use config::{defaults, EngineConfig};
pub use constants::MAX_TTL;
pub use engine::Engine;
pub use error::{Error, IoError, IoOperation, IoResult, Result};
pub use event::{Event, Notice};
pub use net::sniffer::{Sniffer, SocketSniffer};
pub use net::socket::Socket;
#[cfg(unix)]
pub use net::socket::SocketImpl;
pub use net::{CaptureFilter, Family, Protocol, SocketPool};
pub use packet::{fields, Codec, Fingerprint, IcmpCodec, PacketError, PacketResult};
pub use probe::{FieldValue, Fields, Probe, ProbeRecord, ProbeReply, Reply};
pub use queue::ReplySink;
pub use trace::{
    register_traceroute, traceroute_defaults, Traceroute, TracerouteOptions,
    TRACEROUTE_DESTINATION_REACHED, TRACEROUTE_MAX_TTL_REACHED, TRACEROUTE_PROBE_REPLY,
};
pub use types::{InstanceId, ProbeFlags, ProbeTag, TimeToLive, TimerId};
