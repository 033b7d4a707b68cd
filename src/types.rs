use bitflags::bitflags;
use derive_more::{Add, AddAssign, Sub};
use std::fmt::{Display, Formatter};

/// `ProbeTag` newtype.
///
/// The engine-internal identity of a transmitted probe.  Tags are allocated
/// from a monotonic 64-bit counter and are never reused, which keeps them
/// distinct from whatever identifier is embedded in the probe's wire bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub struct ProbeTag(pub u64);

impl Display for ProbeTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// `TimeToLive` (ttl) newtype.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Ord, PartialOrd, Add, Sub, AddAssign)]
pub struct TimeToLive(pub u8);

/// `InstanceId` newtype.
///
/// Identifies a running algorithm instance.  Probe records hold the id of
/// their origin instance rather than a reference, as the instance may have
/// terminated by the time a reply or deadline arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub struct InstanceId(pub u64);

impl Display for InstanceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "instance-{}", self.0)
    }
}

/// `TimerId` newtype.
///
/// A handle to an armed deadline in the deadline queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub struct TimerId(pub u64);

bitflags! {
    /// Probe flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProbeFlags: u32 {
        /// The probe transmission failed transiently and was requeued once.
        const RETRIED = 1;
    }
}
