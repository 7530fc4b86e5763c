//! # Error Definitions
//!
//! Failures while reading or writing packet headers. Payload errors stay in
//! `varpack::Error`; anything listed here means the stream itself is broken.

use varpack::Error as PackError;

#[derive(Debug, Clone)]
pub enum Error {
    /// The header bytes could not be encoded or decoded.
    Codec(PackError),
    /// A packet type tag this protocol does not know.
    UnknownPacket(u64),
    /// A service key longer than the protocol allows.
    InvalidServiceKey(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "packet codec error: {}", e),
            Self::UnknownPacket(tag) => write!(f, "unknown packet type: {}", tag),
            Self::InvalidServiceKey(len) => {
                write!(f, "service key of {} bytes exceeds {}", len, crate::SERVICE_KEY_LEN)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self {
        Self::Codec(e)
    }
}

/// A specialized Result type for packet framing.
pub type Result<T> = std::result::Result<T, Error>;
