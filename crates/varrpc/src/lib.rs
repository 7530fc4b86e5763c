//! # VarRPC
//!
//! The packet layer of a multiplexed RPC connection over Varpack.
//!
//! ## Architecture
//!
//! A connection is a plain byte stream with no outer framing. Each packet is
//! a uvarint type tag followed by a fixed header; `Request` and `Response`
//! headers are followed by a payload whose shape only the two ends of the
//! call know.
//!
//! ```text
//! Request    = [1][req_num][service key: bytes <= 4][func_id] payload
//! Response   = [2][req_num] payload
//! ContextEnd = [3][req_num][cause: str]
//! ClosingNow = [4]
//! ```
//!
//! Request numbers are small integers from the caller's fixed slot pool, so
//! they stay one byte on the wire in practice.

pub mod error;
pub mod frame;

pub use error::Error;
pub use error::Result;
pub use frame::ContextEnd;
pub use frame::Packet;
pub use frame::PacketType;
pub use frame::RequestHeader;
pub use frame::ResponseHeader;
pub use frame::ServiceKey;

/// Bytes of a service id that take part in routing.
pub const SERVICE_KEY_LEN: usize = 4;
