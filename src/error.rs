use crate::packet::PacketError;
use std::fmt::{Display, Formatter};
use std::io;
use std::io::ErrorKind;
use std::net::SocketAddr;
use thiserror::Error;

/// An engine error result.
pub type Result<T> = std::result::Result<T, Error>;

/// An engine error.
///
/// Enumerates the error conditions which can occur while configuring or
/// running the measurement engine.  Per-probe failures are not represented
/// here, they are localized to the originating algorithm instance as
/// `SendFailed` events.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid config: {0}")]
    BadConfig(String),
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("send queue full")]
    SendQueueFull,
    #[error("probe tag space exhausted")]
    TagSpaceExhausted,
    #[error("invalid packet: {0}")]
    Packet(#[from] PacketError),
    #[error("IO error: {0}")]
    Io(#[from] IoError),
    #[error("engine error: {0}")]
    Other(String),
}

/// Custom IO error result.
pub type IoResult<T> = std::result::Result<T, IoError>;

/// Custom IO error.
///
/// Socket layer errors which capture the operation that failed.
#[derive(Error, Debug)]
pub enum IoError {
    #[error("Sendto error for {1}: {0}")]
    SendTo(io::Error, SocketAddr),
    #[error("Failed to {1}: {0}")]
    Other(io::Error, IoOperation),
}

impl IoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SendTo(e, _) | Self::Other(e, _) => e.kind(),
        }
    }

    /// Would retrying the operation on a later tick plausibly succeed?
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
    }
}

/// Io operation.
#[derive(Debug)]
pub enum IoOperation {
    NewSocket,
    SetNonBlocking,
    SetTtl,
    Select,
    Read,
}

impl Display for IoOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewSocket => write!(f, "create new socket"),
            Self::SetNonBlocking => write!(f, "set non-blocking"),
            Self::SetTtl => write!(f, "set TTL"),
            Self::Select => write!(f, "select"),
            Self::Read => write!(f, "read"),
        }
    }
}
