use crate::types::{InstanceId, ProbeFlags, ProbeTag};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;

/// A typed packet field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    U8(u8),
    U16(u16),
    Str(String),
    Addr(IpAddr),
}

impl FieldValue {
    #[must_use]
    pub fn as_u8(&self) -> Option<u8> {
        if let Self::U8(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_u16(&self) -> Option<u16> {
        if let Self::U16(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        if let Self::Str(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_addr(&self) -> Option<IpAddr> {
        if let Self::Addr(value) = self {
            Some(*value)
        } else {
            None
        }
    }
}

/// A typed packet field map.
///
/// Probes carry the fields the packet layer forges into wire bytes and
/// replies carry the fields the packet layer parsed out of captured bytes.
/// The subset of fields which must echo in a reply forms the probe
/// fingerprint used for matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    values: BTreeMap<&'static str, FieldValue>,
}

impl Fields {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing any previous value.
    pub fn set(&mut self, name: &'static str, value: FieldValue) -> &mut Self {
        self.values.insert(name, value);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

/// A probe awaiting transmission.
///
/// Built by an algorithm instance and submitted through
/// [`crate::Context::send_probe`].  A probe is mutable only while it is
/// pending; once transmitted the engine freezes it into a [`ProbeRecord`].
#[derive(Debug, Clone)]
pub struct Probe {
    dest: IpAddr,
    fields: Fields,
    flags: ProbeFlags,
}

impl Probe {
    #[must_use]
    pub fn new(dest: IpAddr) -> Self {
        Self {
            dest,
            fields: Fields::new(),
            flags: ProbeFlags::empty(),
        }
    }

    #[must_use]
    pub const fn dest(&self) -> IpAddr {
        self.dest
    }

    #[must_use]
    pub const fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Fields {
        &mut self.fields
    }

    #[must_use]
    pub const fn flags(&self) -> ProbeFlags {
        self.flags
    }

    pub fn flags_mut(&mut self) -> &mut ProbeFlags {
        &mut self.flags
    }

    /// Freeze the probe into the immutable record kept on the in-flight list.
    #[must_use]
    pub(crate) fn into_record(
        self,
        tag: ProbeTag,
        origin: InstanceId,
        payload: Vec<u8>,
        sent_at: SystemTime,
        deadline: SystemTime,
    ) -> ProbeRecord {
        ProbeRecord {
            tag,
            origin,
            dest: self.dest,
            fields: self.fields,
            payload,
            sent_at,
            deadline,
        }
    }
}

/// A probe pending transmission, together with its origin instance.
#[derive(Debug, Clone)]
pub(crate) struct PendingProbe {
    pub probe: Probe,
    pub origin: InstanceId,
}

/// A transmitted probe.
///
/// Created by the engine at transmit time and read-only thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRecord {
    /// The engine-assigned probe tag.
    pub tag: ProbeTag,
    /// The algorithm instance which submitted the probe.
    pub origin: InstanceId,
    /// The destination address.
    pub dest: IpAddr,
    /// The fields the payload was forged from.
    pub fields: Fields,
    /// The forged wire bytes.
    pub payload: Vec<u8>,
    /// Timestamp when the probe was sent.
    pub sent_at: SystemTime,
    /// Timestamp at which the probe expires without a reply.
    pub deadline: SystemTime,
}

/// A captured packet which may match an in-flight probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// The captured wire bytes.
    pub bytes: Vec<u8>,
    /// The fields the packet layer parsed from the bytes.
    pub fields: Fields,
    /// Timestamp of the capture.
    pub received_at: SystemTime,
}

impl Reply {
    #[must_use]
    pub fn new(bytes: Vec<u8>, fields: Fields, received_at: SystemTime) -> Self {
        Self {
            bytes,
            fields,
            received_at,
        }
    }
}

/// A matched probe and reply pair.
///
/// Shared by reference between the engine, the originating instance and any
/// callers the instance forwards it to.
#[derive(Debug, Clone)]
pub struct ProbeReply {
    /// The probe which elicited the reply.
    pub probe: Arc<ProbeRecord>,
    /// The captured reply.
    pub reply: Arc<Reply>,
    /// The responder address, as extracted by the packet layer.
    pub source: Option<IpAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_fields() {
        let mut fields = Fields::new();
        fields
            .set("ttl", FieldValue::U8(7))
            .set("icmp_seq", FieldValue::U16(33434));
        assert_eq!(Some(7), fields.get("ttl").and_then(FieldValue::as_u8));
        assert_eq!(
            Some(33434),
            fields.get("icmp_seq").and_then(FieldValue::as_u16)
        );
        assert_eq!(None, fields.get("ttl").and_then(FieldValue::as_u16));
        assert!(!fields.contains("icmp_id"));
    }

    #[test]
    fn test_field_replacement() {
        let mut fields = Fields::new();
        fields.set("ttl", FieldValue::U8(1));
        fields.set("ttl", FieldValue::U8(2));
        assert_eq!(Some(2), fields.get("ttl").and_then(FieldValue::as_u8));
    }

    #[test]
    fn test_probe_freeze() {
        let dest = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let mut probe = Probe::new(dest);
        probe.fields_mut().set("ttl", FieldValue::U8(3));
        let sent_at = SystemTime::now();
        let deadline = sent_at + std::time::Duration::from_secs(3);
        let record = probe.into_record(
            crate::types::ProbeTag(42),
            crate::types::InstanceId(1),
            vec![0xde, 0xad],
            sent_at,
            deadline,
        );
        assert_eq!(crate::types::ProbeTag(42), record.tag);
        assert_eq!(dest, record.dest);
        assert_eq!(vec![0xde, 0xad], record.payload);
        assert_eq!(Some(3), record.fields.get("ttl").and_then(FieldValue::as_u8));
        assert_eq!(sent_at, record.sent_at);
        assert_eq!(deadline, record.deadline);
    }
}
