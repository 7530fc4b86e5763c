//! # Protocol Frames
//!
//! Packet headers for the four message kinds that cross a connection.
//!
//! ## Invariants
//! - **Panic Safety**: every read path returns `Result`; an unknown tag or an
//!   oversized key is an error, never a panic.
//! - **Payload Blindness**: for `Request` and `Response` the payload is left on
//!   the decoder. Whoever owns the call knows its shape; this layer does not.

use varpack::Decoder;
use varpack::Encoder;

use crate::SERVICE_KEY_LEN;
use crate::error::Error;
use crate::error::Result;

/// The leading tag of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Request = 1,
    Response = 2,
    ContextEnd = 3,
    ClosingNow = 4,
}

impl PacketType {
    pub fn tag(self) -> u64 {
        self as u64
    }

    pub fn from_tag(tag: u64) -> Result<Self> {
        match tag {
            1 => Ok(Self::Request),
            2 => Ok(Self::Response),
            3 => Ok(Self::ContextEnd),
            4 => Ok(Self::ClosingNow),
            other => Err(Error::UnknownPacket(other)),
        }
    }
}

/// The registry key of a service: at most the first four bytes of its id.
///
/// Two ids sharing a four-byte prefix map to the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ServiceKey {
    len: u8,
    bytes: [u8; SERVICE_KEY_LEN],
}

impl ServiceKey {
    /// Builds a key from a full service id, truncating it.
    pub fn from_id(id: &[u8]) -> Self {
        let len = id.len().min(SERVICE_KEY_LEN);
        let mut bytes = [0u8; SERVICE_KEY_LEN];
        bytes[..len].copy_from_slice(&id[..len]);
        Self { len: len as u8, bytes }
    }

    /// Builds a key from bytes read off the wire, which must already fit.
    pub fn from_wire(raw: &[u8]) -> Result<Self> {
        if raw.len() > SERVICE_KEY_LEN {
            return Err(Error::InvalidServiceKey(raw.len()));
        }
        Ok(Self::from_id(raw))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// Opens an outbound call. The request payload follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub req_num: u64,
    pub service: ServiceKey,
    pub func_id: u64,
}

/// Answers the call numbered `req_num`. The result payload follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub req_num: u64,
}

/// Tells the executing side that the caller gave up on `req_num`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEnd {
    pub req_num: u64,
    pub cause: String,
}

/// A decoded packet header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Request(RequestHeader),
    Response(ResponseHeader),
    ContextEnd(ContextEnd),
    ClosingNow,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Request(_) => PacketType::Request,
            Self::Response(_) => PacketType::Response,
            Self::ContextEnd(_) => PacketType::ContextEnd,
            Self::ClosingNow => PacketType::ClosingNow,
        }
    }

    /// Appends the tag and header fields. Any payload is written after this
    /// into the same encoder, then the whole buffer goes out in one write.
    pub fn write(&self, enc: &mut Encoder) -> Result<()> {
        enc.uvarint(self.packet_type().tag())?;
        match self {
            Self::Request(h) => {
                enc.u64(h.req_num)?;
                enc.bytes(h.service.as_bytes())?;
                enc.u64(h.func_id)?;
            }
            Self::Response(h) => {
                enc.u64(h.req_num)?;
            }
            Self::ContextEnd(h) => {
                enc.u64(h.req_num)?;
                enc.str(&h.cause)?;
            }
            Self::ClosingNow => {}
        }
        Ok(())
    }

    /// Reads the next header off the stream.
    pub async fn read(dec: &mut Decoder) -> Result<Self> {
        let tag = dec.uvarint().await?;
        let packet = match PacketType::from_tag(tag)? {
            PacketType::Request => {
                let req_num = dec.u64().await?;
                let raw = dec.bytes().await?;
                let service = ServiceKey::from_wire(&raw)?;
                let func_id = dec.u64().await?;
                Self::Request(RequestHeader { req_num, service, func_id })
            }
            PacketType::Response => Self::Response(ResponseHeader { req_num: dec.u64().await? }),
            PacketType::ContextEnd => {
                let req_num = dec.u64().await?;
                let cause = dec.string().await?;
                Self::ContextEnd(ContextEnd { req_num, cause })
            }
            PacketType::ClosingNow => Self::ClosingNow,
        };
        Ok(packet)
    }
}
