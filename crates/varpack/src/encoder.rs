//! # Encoder
//!
//! A growable in-memory sink. Values are appended in call order; the owner
//! flushes the finished buffer to wherever it is going in one write.

use crate::error::Result;

/// Maximum number of bytes a 64-bit varint can occupy.
pub const MAX_VARINT_LEN: usize = 10;

/// Maps signed integers onto unsigned so small magnitudes stay short.
#[inline]
pub fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

/// Buffered byte sink for Varpack values.
///
/// Encoding never inspects earlier output; every method appends exactly the
/// bytes of one value. `clear()` resets the sink for reuse without releasing
/// its allocation.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Creates a new encoder with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Creates a new encoder with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    /// Returns a view of the bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the encoder and returns the final byte vector.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drops all written bytes, keeping the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Encodes a boolean as a single `0`/`1` byte.
    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.buf.push(v as u8);
        Ok(())
    }

    /// Encodes an unsigned 8-bit integer as one raw byte.
    pub fn u8(&mut self, v: u8) -> Result<()> {
        self.buf.push(v);
        Ok(())
    }

    /// Encodes a signed 8-bit integer as one raw byte.
    pub fn i8(&mut self, v: i8) -> Result<()> {
        self.buf.push(v as u8);
        Ok(())
    }

    /// Encodes an unsigned LEB128 varint.
    pub fn uvarint(&mut self, mut v: u64) -> Result<()> {
        while v >= 0x80 {
            self.buf.push((v as u8) | 0x80);
            v >>= 7;
        }
        self.buf.push(v as u8);
        Ok(())
    }

    /// Encodes a zig-zag signed varint.
    pub fn varint(&mut self, v: i64) -> Result<()> {
        self.uvarint(zigzag(v))
    }

    pub fn u16(&mut self, v: u16) -> Result<()> { self.uvarint(v as u64) }
    pub fn u32(&mut self, v: u32) -> Result<()> { self.uvarint(v as u64) }
    pub fn u64(&mut self, v: u64) -> Result<()> { self.uvarint(v) }
    pub fn usize(&mut self, v: usize) -> Result<()> { self.uvarint(v as u64) }

    pub fn i16(&mut self, v: i16) -> Result<()> { self.varint(v as i64) }
    pub fn i32(&mut self, v: i32) -> Result<()> { self.varint(v as i64) }
    pub fn i64(&mut self, v: i64) -> Result<()> { self.varint(v) }
    pub fn isize(&mut self, v: isize) -> Result<()> { self.varint(v as i64) }

    /// Encodes a width-locked u16 as 2 LE bytes.
    pub fn fixed_u16(&mut self, v: u16) -> Result<()> { self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    /// Encodes a width-locked u32 as 4 LE bytes.
    pub fn fixed_u32(&mut self, v: u32) -> Result<()> { self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    /// Encodes a width-locked u64 as 8 LE bytes.
    pub fn fixed_u64(&mut self, v: u64) -> Result<()> { self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    /// Encodes a width-locked i16 as 2 LE bytes.
    pub fn fixed_i16(&mut self, v: i16) -> Result<()> { self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    /// Encodes a width-locked i32 as 4 LE bytes.
    pub fn fixed_i32(&mut self, v: i32) -> Result<()> { self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    /// Encodes a width-locked i64 as 8 LE bytes.
    pub fn fixed_i64(&mut self, v: i64) -> Result<()> { self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }

    /// Encodes the IEEE-754 bits of a 32-bit float (LE).
    pub fn f32(&mut self, v: f32) -> Result<()> { self.fixed_u32(v.to_bits()) }
    /// Encodes the IEEE-754 bits of a 64-bit float (LE).
    pub fn f64(&mut self, v: f64) -> Result<()> { self.fixed_u64(v.to_bits()) }

    /// Encodes a char as its scalar value.
    pub fn char(&mut self, v: char) -> Result<()> {
        self.uvarint(v as u64)
    }

    /// Encodes a length or element count.
    pub fn length(&mut self, n: usize) -> Result<()> {
        self.uvarint(n as u64)
    }

    /// Encodes a length-prefixed byte string.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.length(v.len())?;
        self.buf.extend_from_slice(v);
        Ok(())
    }

    /// Encodes a UTF-8 string, length-prefixed like `bytes`.
    pub fn str(&mut self, v: &str) -> Result<()> {
        self.bytes(v.as_bytes())
    }

    /// Encodes a sequence: the element count, then every element via `elem`.
    pub fn slice<T, F>(&mut self, items: &[T], mut elem: F) -> Result<()>
    where
        F: FnMut(&mut Self, &T) -> Result<()>,
    {
        self.length(items.len())?;
        for item in items {
            elem(self, item)?;
        }
        Ok(())
    }

    /// Encodes an associative container: the entry count, then each key/value
    /// pair via `key` and `val`.
    pub fn map<'a, K, V, I, FK, FV>(&mut self, entries: I, mut key: FK, mut val: FV) -> Result<()>
    where
        K: 'a,
        V: 'a,
        I: IntoIterator<Item = (&'a K, &'a V)>,
        I::IntoIter: ExactSizeIterator,
        FK: FnMut(&mut Self, &K) -> Result<()>,
        FV: FnMut(&mut Self, &V) -> Result<()>,
    {
        let entries = entries.into_iter();
        self.length(entries.len())?;
        for (k, v) in entries {
            key(self, k)?;
            val(self, v)?;
        }
        Ok(())
    }
}
