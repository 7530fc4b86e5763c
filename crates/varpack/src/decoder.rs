//! # Decoder
//!
//! A buffered async source. Varpack values carry no framing of their own, so
//! the decoder pulls exactly as many bytes as the value being read needs and
//! leaves the rest of the stream untouched for whoever reads next.
//!
//! ## Invariants
//! - **Panic Safety**: every path returns `Result`; hostile input never panics.
//! - **Bounded**: declared lengths are checked against `max_len` before any
//!   allocation happens.

use futures::future::BoxFuture;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;

use crate::encoder::MAX_VARINT_LEN;
use crate::error::Error;
use crate::error::Result;

/// Default ceiling for any single declared length (64 MiB).
pub const DEFAULT_MAX_LEN: usize = 64 * 1024 * 1024;

/// Upper bound on speculative preallocation for decoded containers.
pub const PREALLOC_LIMIT: usize = 4096;

/// Reverses `zigzag`.
#[inline]
pub fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Buffered byte source for Varpack values.
pub struct Decoder {
    reader: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    max_len: usize,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder").field("max_len", &self.max_len).finish()
    }
}

impl Decoder {
    /// Creates a decoder over any async reader.
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            reader: BufReader::new(reader),
            max_len: DEFAULT_MAX_LEN,
        }
    }

    /// Creates a decoder over an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(std::io::Cursor::new(bytes.into()))
    }

    /// Sets the ceiling for declared lengths.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Returns true once the source is exhausted.
    pub async fn is_at_end(&mut self) -> Result<bool> {
        Ok(self.reader.fill_buf().await?.is_empty())
    }

    async fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.reader.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Decodes a boolean byte.
    pub async fn bool(&mut self) -> Result<bool> {
        match self.reader.read_u8().await? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(Error::InvalidBool(b)),
        }
    }

    /// Decodes one raw byte.
    pub async fn u8(&mut self) -> Result<u8> {
        Ok(self.reader.read_u8().await?)
    }

    /// Decodes one raw byte as a signed integer.
    pub async fn i8(&mut self) -> Result<i8> {
        Ok(self.reader.read_u8().await? as i8)
    }

    /// Decodes an unsigned LEB128 varint.
    pub async fn uvarint(&mut self) -> Result<u64> {
        let mut x: u64 = 0;
        let mut shift = 0u32;
        for i in 0..MAX_VARINT_LEN {
            let b = self.reader.read_u8().await?;
            if b < 0x80 {
                if i == MAX_VARINT_LEN - 1 && b > 1 {
                    return Err(Error::VarintOverflow);
                }
                return Ok(x | (b as u64) << shift);
            }
            x |= ((b & 0x7f) as u64) << shift;
            shift += 7;
        }
        Err(Error::VarintOverflow)
    }

    /// Decodes a zig-zag signed varint.
    pub async fn varint(&mut self) -> Result<i64> {
        Ok(unzigzag(self.uvarint().await?))
    }

    pub async fn u16(&mut self) -> Result<u16> {
        let v = self.uvarint().await?;
        u16::try_from(v).map_err(|_| Error::IntOutOfRange { ty: "u16", value: v as i128 })
    }

    pub async fn u32(&mut self) -> Result<u32> {
        let v = self.uvarint().await?;
        u32::try_from(v).map_err(|_| Error::IntOutOfRange { ty: "u32", value: v as i128 })
    }

    pub async fn u64(&mut self) -> Result<u64> {
        self.uvarint().await
    }

    pub async fn usize(&mut self) -> Result<usize> {
        let v = self.uvarint().await?;
        usize::try_from(v).map_err(|_| Error::IntOutOfRange { ty: "usize", value: v as i128 })
    }

    pub async fn i16(&mut self) -> Result<i16> {
        let v = self.varint().await?;
        i16::try_from(v).map_err(|_| Error::IntOutOfRange { ty: "i16", value: v as i128 })
    }

    pub async fn i32(&mut self) -> Result<i32> {
        let v = self.varint().await?;
        i32::try_from(v).map_err(|_| Error::IntOutOfRange { ty: "i32", value: v as i128 })
    }

    pub async fn i64(&mut self) -> Result<i64> {
        self.varint().await
    }

    pub async fn isize(&mut self) -> Result<isize> {
        let v = self.varint().await?;
        isize::try_from(v).map_err(|_| Error::IntOutOfRange { ty: "isize", value: v as i128 })
    }

    /// Decodes a width-locked u16 (2 LE bytes).
    pub async fn fixed_u16(&mut self) -> Result<u16> { Ok(u16::from_le_bytes(self.read_array().await?)) }
    /// Decodes a width-locked u32 (4 LE bytes).
    pub async fn fixed_u32(&mut self) -> Result<u32> { Ok(u32::from_le_bytes(self.read_array().await?)) }
    /// Decodes a width-locked u64 (8 LE bytes).
    pub async fn fixed_u64(&mut self) -> Result<u64> { Ok(u64::from_le_bytes(self.read_array().await?)) }
    /// Decodes a width-locked i16 (2 LE bytes).
    pub async fn fixed_i16(&mut self) -> Result<i16> { Ok(i16::from_le_bytes(self.read_array().await?)) }
    /// Decodes a width-locked i32 (4 LE bytes).
    pub async fn fixed_i32(&mut self) -> Result<i32> { Ok(i32::from_le_bytes(self.read_array().await?)) }
    /// Decodes a width-locked i64 (8 LE bytes).
    pub async fn fixed_i64(&mut self) -> Result<i64> { Ok(i64::from_le_bytes(self.read_array().await?)) }

    /// Decodes a 32-bit float from its exact bit pattern.
    pub async fn f32(&mut self) -> Result<f32> { Ok(f32::from_bits(self.fixed_u32().await?)) }
    /// Decodes a 64-bit float from its exact bit pattern.
    pub async fn f64(&mut self) -> Result<f64> { Ok(f64::from_bits(self.fixed_u64().await?)) }

    /// Decodes a char from its scalar value.
    pub async fn char(&mut self) -> Result<char> {
        let v = self.u32().await?;
        char::from_u32(v).ok_or(Error::InvalidChar(v))
    }

    /// Decodes a length or element count, enforcing `max_len`.
    pub async fn length(&mut self) -> Result<usize> {
        let len = self.uvarint().await?;
        if len > self.max_len as u64 {
            return Err(Error::LengthLimit { len, max: self.max_len });
        }
        Ok(len as usize)
    }

    /// Decodes a length-prefixed byte string.
    pub async fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.length().await?;
        let mut buf = Vec::with_capacity(len.min(PREALLOC_LIMIT));
        (&mut self.reader).take(len as u64).read_to_end(&mut buf).await?;
        if buf.len() < len {
            return Err(Error::UnexpectedEnd);
        }
        Ok(buf)
    }

    /// Decodes a length-prefixed UTF-8 string.
    pub async fn string(&mut self) -> Result<String> {
        String::from_utf8(self.bytes().await?).map_err(|_| Error::InvalidUtf8)
    }

    /// Decodes a sequence: the element count, then each element via `elem`.
    ///
    /// A zero count yields an empty vector.
    pub async fn slice<T, F>(&mut self, mut elem: F) -> Result<Vec<T>>
    where
        F: for<'a> FnMut(&'a mut Decoder) -> BoxFuture<'a, Result<T>>,
    {
        let len = self.length().await?;
        let mut out = Vec::with_capacity(len.min(PREALLOC_LIMIT));
        for _ in 0..len {
            out.push(elem(self).await?);
        }
        Ok(out)
    }

    /// Decodes an associative container: the entry count, then each pair via
    /// `key` and `val`.
    ///
    /// Entries are inserted in wire order, so with map-like containers a
    /// repeated key overwrites the earlier value.
    pub async fn map<C, K, V, FK, FV>(&mut self, mut key: FK, mut val: FV) -> Result<C>
    where
        C: Default + Extend<(K, V)>,
        FK: for<'a> FnMut(&'a mut Decoder) -> BoxFuture<'a, Result<K>>,
        FV: for<'a> FnMut(&'a mut Decoder) -> BoxFuture<'a, Result<V>>,
    {
        let len = self.length().await?;
        let mut out = C::default();
        for _ in 0..len {
            let k = key(self).await?;
            let v = val(self).await?;
            out.extend(std::iter::once((k, v)));
        }
        Ok(out)
    }
}
