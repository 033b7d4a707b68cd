use crate::net::{CaptureFilter, Family, Protocol};
use crate::probe::{FieldValue, Fields};
use std::net::IpAddr;
use thiserror::Error;

/// Well-known packet field names.
pub mod fields {
    /// The responder address of a reply (outer source address).
    pub const SRC_IP: &str = "src_ip";
    /// The time-to-live to transmit a probe with.
    pub const TTL: &str = "ttl";
    /// The ICMP echo identifier.
    pub const ICMP_ID: &str = "icmp_id";
    /// The ICMP echo sequence number.
    pub const ICMP_SEQ: &str = "icmp_seq";
    /// The ICMP type of a parsed reply.
    pub const ICMP_TYPE: &str = "icmp_type";
}

/// A packet error result.
pub type PacketResult<T> = std::result::Result<T, PacketError>;

/// A packet error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("insufficient bytes for {0}")]
    Truncated(&'static str),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("unsupported packet type: {0}")]
    UnsupportedType(u8),
    #[error("not a reply candidate")]
    NotACandidate,
}

/// A probe fingerprint.
///
/// The value of the field subset which must echo in a reply.  Two packets
/// match when their fingerprints are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub u64);

/// The packet layer consumed by the engine.
///
/// The engine does not parse headers itself: it forges outgoing bytes from a
/// typed field map, has captured bytes parsed back into a field map, and
/// equates probes with replies by fingerprint.
pub trait Codec {
    /// The coarse capture filter which includes all possible replies to any
    /// probe this codec forges.
    fn filter(&self) -> CaptureFilter;

    /// Forge the wire bytes for a probe from its fields.
    fn forge(&self, fields: &Fields) -> PacketResult<Vec<u8>>;

    /// Parse captured bytes into reply fields.
    fn parse(&self, bytes: &[u8]) -> PacketResult<Fields>;

    /// Extract the fingerprint from probe or reply fields.
    fn fingerprint(&self, fields: &Fields) -> Option<Fingerprint>;

    /// Does the reply echo the probe's fingerprint?
    fn matches(&self, probe: &Fields, reply: &Fields) -> bool {
        match (self.fingerprint(probe), self.fingerprint(reply)) {
            (Some(probe_key), Some(reply_key)) => probe_key == reply_key,
            _ => false,
        }
    }

    /// The responder address of a reply.
    fn source_address(&self, reply: &Fields) -> Option<IpAddr> {
        reply.get(fields::SRC_IP).and_then(FieldValue::as_addr)
    }
}

const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_DEST_UNREACHABLE: u8 = 3;
const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_TIME_EXCEEDED: u8 = 11;

/// The size of an ICMP echo header.
const ICMP_HEADER_SIZE: usize = 8;

/// The minimum size of an IPv4 header.
const IPV4_HEADER_SIZE: usize = 20;

/// An ICMP-echo-in-IPv4 packet codec.
///
/// Forges ICMP `EchoRequest` packets (the IP header, including the ttl, is
/// left to the sending socket) and parses the three reply shapes a traced
/// path produces: `EchoReply` from the target and `TimeExceeded` or
/// `DestinationUnreachable` from intermediate hops, both of which quote the
/// original datagram and thereby echo the request identifier and sequence.
#[derive(Debug, Clone)]
pub struct IcmpCodec {
    payload_size: usize,
    payload_pattern: u8,
}

impl Default for IcmpCodec {
    fn default() -> Self {
        Self {
            payload_size: 24,
            payload_pattern: 0,
        }
    }
}

impl IcmpCodec {
    #[must_use]
    pub const fn new(payload_size: usize, payload_pattern: u8) -> Self {
        Self {
            payload_size,
            payload_pattern,
        }
    }

    /// Read the echo identifier and sequence at the start of an ICMP echo
    /// header.
    fn parse_echo_ids(icmp: &[u8]) -> PacketResult<(u16, u16)> {
        if icmp.len() < ICMP_HEADER_SIZE {
            return Err(PacketError::Truncated("icmp echo"));
        }
        let identifier = u16::from_be_bytes([icmp[4], icmp[5]]);
        let sequence = u16::from_be_bytes([icmp[6], icmp[7]]);
        Ok((identifier, sequence))
    }

    /// Skip an IPv4 header, returning the payload.
    fn strip_ipv4(bytes: &[u8]) -> PacketResult<(IpAddr, &[u8])> {
        if bytes.len() < IPV4_HEADER_SIZE {
            return Err(PacketError::Truncated("ipv4 header"));
        }
        if bytes[0] >> 4 != 4 || bytes[9] != 1 {
            return Err(PacketError::NotACandidate);
        }
        let header_len = usize::from(bytes[0] & 0x0f) * 4;
        if header_len < IPV4_HEADER_SIZE || bytes.len() < header_len {
            return Err(PacketError::Truncated("ipv4 header"));
        }
        let src = IpAddr::from([bytes[12], bytes[13], bytes[14], bytes[15]]);
        Ok((src, &bytes[header_len..]))
    }
}

impl Codec for IcmpCodec {
    fn filter(&self) -> CaptureFilter {
        CaptureFilter::new(Family::Ipv4, Protocol::Icmp)
    }

    fn forge(&self, fields: &Fields) -> PacketResult<Vec<u8>> {
        let identifier = fields
            .get(fields::ICMP_ID)
            .and_then(FieldValue::as_u16)
            .ok_or(PacketError::MissingField(fields::ICMP_ID))?;
        let sequence = fields
            .get(fields::ICMP_SEQ)
            .and_then(FieldValue::as_u16)
            .ok_or(PacketError::MissingField(fields::ICMP_SEQ))?;
        let mut packet = vec![0_u8; ICMP_HEADER_SIZE + self.payload_size];
        packet[0] = ICMP_ECHO_REQUEST;
        packet[4..6].copy_from_slice(&identifier.to_be_bytes());
        packet[6..8].copy_from_slice(&sequence.to_be_bytes());
        for byte in &mut packet[ICMP_HEADER_SIZE..] {
            *byte = self.payload_pattern;
        }
        let checksum = internet_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
        Ok(packet)
    }

    fn parse(&self, bytes: &[u8]) -> PacketResult<Fields> {
        let (src, icmp) = Self::strip_ipv4(bytes)?;
        if icmp.is_empty() {
            return Err(PacketError::Truncated("icmp header"));
        }
        let icmp_type = icmp[0];
        let (identifier, sequence) = match icmp_type {
            ICMP_ECHO_REPLY => Self::parse_echo_ids(icmp)?,
            ICMP_TIME_EXCEEDED | ICMP_DEST_UNREACHABLE => {
                if icmp.len() < ICMP_HEADER_SIZE {
                    return Err(PacketError::Truncated("icmp header"));
                }
                let (_, inner_icmp) = Self::strip_ipv4(&icmp[ICMP_HEADER_SIZE..])?;
                if inner_icmp.first() != Some(&ICMP_ECHO_REQUEST) {
                    return Err(PacketError::NotACandidate);
                }
                Self::parse_echo_ids(inner_icmp)?
            }
            other => return Err(PacketError::UnsupportedType(other)),
        };
        let mut parsed = Fields::new();
        parsed
            .set(fields::SRC_IP, FieldValue::Addr(src))
            .set(fields::ICMP_TYPE, FieldValue::U8(icmp_type))
            .set(fields::ICMP_ID, FieldValue::U16(identifier))
            .set(fields::ICMP_SEQ, FieldValue::U16(sequence));
        Ok(parsed)
    }

    fn fingerprint(&self, fields: &Fields) -> Option<Fingerprint> {
        let identifier = fields.get(fields::ICMP_ID).and_then(FieldValue::as_u16)?;
        let sequence = fields.get(fields::ICMP_SEQ).and_then(FieldValue::as_u16)?;
        Some(Fingerprint(
            (u64::from(identifier) << 16) | u64::from(sequence),
        ))
    }
}

/// Calculate the RFC 1071 internet checksum.
///
/// The checksum field of `data` must be zeroed by the caller.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum = 0_u32;
    let mut chunks = data.chunks_exact(2);
    for chunk in chunks.by_ref() {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xffff);
    }
    !(sum as u16)
}
