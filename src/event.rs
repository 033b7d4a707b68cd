use crate::probe::{ProbeRecord, ProbeReply};
use crate::types::InstanceId;
use std::sync::Arc;

/// An event dispatched to an algorithm instance handler.
///
/// Handlers are invoked with one event at a time and must return promptly;
/// long-running work must be re-posted as further events.  Probe payloads are
/// shared by reference so that an instance may forward them to its caller
/// without copying.
#[derive(Debug, Clone)]
pub enum Event {
    /// Delivered once when the instance is created.
    ///
    /// The handler typically sends its first probe from here.
    Init,
    /// A reply matched one of this instance's probes.
    Reply(Arc<ProbeReply>),
    /// A probe of this instance expired without a reply.
    Timeout(Arc<ProbeRecord>),
    /// Transmission of a probe failed after a retry.
    SendFailed(Arc<ProbeRecord>, String),
    /// The instance is being destroyed; this is the last event it receives.
    Terminated,
    /// The instance handler failed; termination follows.
    Error(String),
    /// An instance-defined notification forwarded from a child instance.
    Notice(Notice),
}

/// An instance-defined notification.
///
/// Emitted by an instance to its caller via [`crate::Context::emit`].  For a
/// root instance the notice surfaces through the sink passed to
/// [`crate::Engine::run_with`].
#[derive(Debug, Clone)]
pub struct Notice {
    /// The notice kind, e.g. [`crate::TRACEROUTE_DESTINATION_REACHED`].
    pub kind: &'static str,
    /// The probe and reply pair the notice refers to, if any.
    pub payload: Option<Arc<ProbeReply>>,
}

impl Notice {
    #[must_use]
    pub const fn new(kind: &'static str, payload: Option<Arc<ProbeReply>>) -> Self {
        Self { kind, payload }
    }
}

/// An event queued for delivery to a target instance.
#[derive(Debug, Clone)]
pub(crate) struct Dispatch {
    pub target: InstanceId,
    pub event: Event,
}
