//! # Varpack
//!
//! A compact, schema-free binary codec built on variable-length integers.
//!
//! ## Philosophy
//!
//! - **Positional**: no tags, no field names. Both sides agree on the shape
//!   of a value; the bytes carry only the data.
//! - **Small integers stay small**: every general-purpose integer is a LEB128
//!   varint (zig-zag for signed). Width-locked integers and floats are raw
//!   little-endian.
//! - **Streamable**: the `Decoder` reads straight off an async byte stream,
//!   pulling only the bytes the next value needs.
//!
//! ## Format
//!
//! - **Scalars**: `bool` and `u8`/`i8` are one byte; other integers are
//!   varints; floats are `[bits: 4b|8b LE]`.
//! - **Blobs**: `[Len: uvarint][Data: Len]`.
//! - **Sequences / Maps**: `[Count: uvarint][Item]*`.
//! - **Pointers**: `[Present: bool][Value?]`.

extern crate self as varpack;

mod macros;

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod pack;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::Error;
pub use error::FieldContext;
pub use error::Result;
pub use pack::BinaryMarshal;
pub use pack::ByteBuf;
pub use pack::Fixed;
pub use pack::Marshaled;
pub use pack::Pack;
pub use pack::Unpack;
pub use pack::from_bytes;
pub use pack::to_bytes;

pub use async_trait::async_trait;
pub use futures::future::BoxFuture;

#[cfg(feature = "derive")]
pub use varpack_derive::Pack;
#[cfg(feature = "derive")]
pub use varpack_derive::Unpack;
