//! # Pack / Unpack
//!
//! The two capabilities every wire value has: it can write itself into an
//! `Encoder`, and it can be rebuilt from a `Decoder`.
//!
//! ## Wire shapes
//!
//! - **Integers**: varints (`u8`/`i8` are one raw byte; `Fixed<T>` is raw LE).
//! - **Floats**: raw LE IEEE-754 bits.
//! - **Strings, `ByteBuf`**: `[len: uvarint][bytes]`.
//! - **Sequences, sets**: `[count: uvarint][elem]*`.
//! - **Maps**: `[count: uvarint]([key][value])*`.
//! - **`Option<T>`** (pointers): `[present: bool][T?]`.
//! - **`Result<T, E>`**: `[0|1: u8][T | E]`.
//! - **Tuples, records**: fields back to back, no header.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::hash::BuildHasher;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;

use crate::decoder::Decoder;
use crate::decoder::PREALLOC_LIMIT;
use crate::encoder::Encoder;
use crate::error::Error;
use crate::error::FieldContext;
use crate::error::Result;

/// A value that can serialize itself.
pub trait Pack {
    fn pack(&self, enc: &mut Encoder) -> Result<()>;
}

/// A value that can deserialize itself.
#[async_trait]
pub trait Unpack: Sized + Send {
    /// Reads a fresh value off the decoder.
    async fn unpack(dec: &mut Decoder) -> Result<Self>;

    /// Overwrites `self` with the next value on the decoder.
    ///
    /// Whatever `self` held before is discarded, so a present `Option`
    /// becomes `None` when the wire says nil.
    async fn unpack_into(&mut self, dec: &mut Decoder) -> Result<()> {
        *self = Self::unpack(dec).await?;
        Ok(())
    }
}

/// Packs a value into a fresh byte vector.
pub fn to_bytes<T: Pack + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    value.pack(&mut enc)?;
    Ok(enc.into_bytes())
}

/// Unpacks a value from an in-memory buffer.
pub async fn from_bytes<T: Unpack>(bytes: impl Into<Vec<u8>>) -> Result<T> {
    let mut dec = Decoder::from_bytes(bytes);
    T::unpack(&mut dec).await
}

// ============================================================================
//  SCALARS
// ============================================================================

macro_rules! impl_scalar {
    ($($ty:ty => $name:ident;)*) => {
        $(
            impl Pack for $ty {
                #[inline]
                fn pack(&self, enc: &mut Encoder) -> Result<()> {
                    enc.$name(*self)
                }
            }

            #[async_trait]
            impl Unpack for $ty {
                async fn unpack(dec: &mut Decoder) -> Result<Self> {
                    dec.$name().await
                }
            }
        )*
    };
}

impl_scalar! {
    bool => bool;
    u8 => u8;
    i8 => i8;
    u16 => u16;
    u32 => u32;
    u64 => u64;
    usize => usize;
    i16 => i16;
    i32 => i32;
    i64 => i64;
    isize => isize;
    f32 => f32;
    f64 => f64;
    char => char;
}

impl Pack for () {
    fn pack(&self, _enc: &mut Encoder) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Unpack for () {
    async fn unpack(_dec: &mut Decoder) -> Result<Self> {
        Ok(())
    }
}

/// Width-locked integer, encoded as raw little-endian bytes instead of a varint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fixed<T>(pub T);

macro_rules! impl_fixed {
    ($($ty:ty => $enc:ident, $dec:ident;)*) => {
        $(
            impl Pack for Fixed<$ty> {
                fn pack(&self, enc: &mut Encoder) -> Result<()> {
                    enc.$enc(self.0)
                }
            }

            #[async_trait]
            impl Unpack for Fixed<$ty> {
                async fn unpack(dec: &mut Decoder) -> Result<Self> {
                    Ok(Fixed(dec.$dec().await?))
                }
            }
        )*
    };
}

impl_fixed! {
    u16 => fixed_u16, fixed_u16;
    u32 => fixed_u32, fixed_u32;
    u64 => fixed_u64, fixed_u64;
    i16 => fixed_i16, fixed_i16;
    i32 => fixed_i32, fixed_i32;
    i64 => fixed_i64, fixed_i64;
}

// ============================================================================
//  BLOBS
// ============================================================================

impl Pack for str {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.str(self)
    }
}

impl Pack for String {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.str(self)
    }
}

#[async_trait]
impl Unpack for String {
    async fn unpack(dec: &mut Decoder) -> Result<Self> {
        dec.string().await
    }
}

/// A raw byte buffer written as one length-prefixed blob.
///
/// Same wire shape as `Vec<u8>`, without the per-element round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteBuf(pub Vec<u8>);

impl std::ops::Deref for ByteBuf {
    type Target = Vec<u8>;
    fn deref(&self) -> &Vec<u8> {
        &self.0
    }
}

impl From<Vec<u8>> for ByteBuf {
    fn from(v: Vec<u8>) -> Self {
        ByteBuf(v)
    }
}

impl Pack for ByteBuf {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.bytes(&self.0)
    }
}

#[async_trait]
impl Unpack for ByteBuf {
    async fn unpack(dec: &mut Decoder) -> Result<Self> {
        Ok(ByteBuf(dec.bytes().await?))
    }
}

// ============================================================================
//  POINTERS
// ============================================================================

impl<T: Pack + ?Sized> Pack for &T {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        (**self).pack(enc)
    }
}

impl<T: Pack + ?Sized> Pack for Box<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        (**self).pack(enc)
    }
}

#[async_trait]
impl<T: Unpack> Unpack for Box<T> {
    async fn unpack(dec: &mut Decoder) -> Result<Self> {
        Ok(Box::new(T::unpack(dec).await?))
    }
}

impl<T: Pack + ?Sized> Pack for Arc<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        (**self).pack(enc)
    }
}

#[async_trait]
impl<T: Unpack + Sync> Unpack for Arc<T> {
    async fn unpack(dec: &mut Decoder) -> Result<Self> {
        Ok(Arc::new(T::unpack(dec).await?))
    }
}

impl<T: Pack> Pack for Option<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        match self {
            Some(v) => {
                enc.bool(true)?;
                v.pack(enc)
            }
            None => enc.bool(false),
        }
    }
}

#[async_trait]
impl<T: Unpack> Unpack for Option<T> {
    async fn unpack(dec: &mut Decoder) -> Result<Self> {
        if dec.bool().await? {
            Ok(Some(T::unpack(dec).await?))
        } else {
            Ok(None)
        }
    }
}

impl<T: Pack, E: Pack> Pack for std::result::Result<T, E> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        match self {
            Ok(v) => {
                enc.u8(0)?;
                v.pack(enc)
            }
            Err(e) => {
                enc.u8(1)?;
                e.pack(enc)
            }
        }
    }
}

#[async_trait]
impl<T: Unpack, E: Unpack> Unpack for std::result::Result<T, E> {
    async fn unpack(dec: &mut Decoder) -> Result<Self> {
        match dec.u8().await? {
            0 => Ok(Ok(T::unpack(dec).await?)),
            1 => Ok(Err(E::unpack(dec).await?)),
            value => Err(Error::InvalidDiscriminant { ty: "Result", value }),
        }
    }
}

// ============================================================================
//  SEQUENCES
// ============================================================================

impl<T: Pack> Pack for [T] {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.slice(self, |enc, item| item.pack(enc))
    }
}

impl<T: Pack> Pack for Vec<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        self.as_slice().pack(enc)
    }
}

#[async_trait]
impl<T: Unpack> Unpack for Vec<T> {
    async fn unpack(dec: &mut Decoder) -> Result<Self> {
        let len = dec.length().await?;
        let mut out = Vec::with_capacity(len.min(PREALLOC_LIMIT));
        for _ in 0..len {
            out.push(T::unpack(dec).await?);
        }
        Ok(out)
    }
}

impl<T: Pack> Pack for VecDeque<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.length(self.len())?;
        self.iter().try_for_each(|item| item.pack(enc))
    }
}

#[async_trait]
impl<T: Unpack> Unpack for VecDeque<T> {
    async fn unpack(dec: &mut Decoder) -> Result<Self> {
        Ok(Vec::<T>::unpack(dec).await?.into())
    }
}

impl<T: Pack, S> Pack for HashSet<T, S> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.length(self.len())?;
        self.iter().try_for_each(|item| item.pack(enc))
    }
}

#[async_trait]
impl<T, S> Unpack for HashSet<T, S>
where
    T: Unpack + Eq + Hash,
    S: BuildHasher + Default + Send,
{
    async fn unpack(dec: &mut Decoder) -> Result<Self> {
        Ok(Vec::<T>::unpack(dec).await?.into_iter().collect())
    }
}

impl<T: Pack> Pack for BTreeSet<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.length(self.len())?;
        self.iter().try_for_each(|item| item.pack(enc))
    }
}

#[async_trait]
impl<T: Unpack + Ord> Unpack for BTreeSet<T> {
    async fn unpack(dec: &mut Decoder) -> Result<Self> {
        Ok(Vec::<T>::unpack(dec).await?.into_iter().collect())
    }
}

// ============================================================================
//  MAPS
// ============================================================================

impl<K: Pack, V: Pack, S> Pack for HashMap<K, V, S> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.map(self, |enc, k| k.pack(enc), |enc, v| v.pack(enc))
    }
}

#[async_trait]
impl<K, V, S> Unpack for HashMap<K, V, S>
where
    K: Unpack + Eq + Hash,
    V: Unpack,
    S: BuildHasher + Default + Send,
{
    async fn unpack(dec: &mut Decoder) -> Result<Self> {
        let len = dec.length().await?;
        let mut out = HashMap::with_capacity_and_hasher(len.min(PREALLOC_LIMIT), S::default());
        for _ in 0..len {
            let k = K::unpack(dec).await?;
            let v = V::unpack(dec).await?;
            out.insert(k, v);
        }
        Ok(out)
    }
}

impl<K: Pack, V: Pack> Pack for BTreeMap<K, V> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.map(self, |enc, k| k.pack(enc), |enc, v| v.pack(enc))
    }
}

#[async_trait]
impl<K: Unpack + Ord, V: Unpack> Unpack for BTreeMap<K, V> {
    async fn unpack(dec: &mut Decoder) -> Result<Self> {
        let len = dec.length().await?;
        let mut out = BTreeMap::new();
        for _ in 0..len {
            let k = K::unpack(dec).await?;
            let v = V::unpack(dec).await?;
            out.insert(k, v);
        }
        Ok(out)
    }
}

// ============================================================================
//  TUPLES
// ============================================================================

macro_rules! impl_tuple {
    ($($name:ident: $idx:tt),+) => {
        impl<$($name: Pack),+> Pack for ($($name,)+) {
            fn pack(&self, enc: &mut Encoder) -> Result<()> {
                $( self.$idx.pack(enc)?; )+
                Ok(())
            }
        }

        #[async_trait]
        impl<$($name: Unpack),+> Unpack for ($($name,)+) {
            async fn unpack(dec: &mut Decoder) -> Result<Self> {
                Ok(($(
                    $name::unpack(dec)
                        .await
                        .in_field(stringify!($idx), std::any::type_name::<$name>())?,
                )+))
            }
        }
    };
}

impl_tuple!(A: 0);
impl_tuple!(A: 0, B: 1);
impl_tuple!(A: 0, B: 1, C: 2);
impl_tuple!(A: 0, B: 1, C: 2, D: 3);

// ============================================================================
//  BINARY MARSHAL
// ============================================================================

/// A type with its own self-describing byte representation.
///
/// Wrapping such a value in `Marshaled` skips structural encoding entirely;
/// the bytes go on the wire as one length-prefixed blob.
pub trait BinaryMarshal: Sized {
    fn marshal_binary(&self) -> Result<Vec<u8>>;
    fn unmarshal_binary(bytes: &[u8]) -> Result<Self>;
}

/// Encodes `T` through its `BinaryMarshal` representation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Marshaled<T>(pub T);

impl<T: BinaryMarshal> Pack for Marshaled<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        let bytes = self.0.marshal_binary()?;
        enc.bytes(&bytes)
    }
}

#[async_trait]
impl<T: BinaryMarshal + Send> Unpack for Marshaled<T> {
    async fn unpack(dec: &mut Decoder) -> Result<Self> {
        let bytes = dec.bytes().await?;
        Ok(Marshaled(T::unmarshal_binary(&bytes)?))
    }
}

impl BinaryMarshal for std::net::IpAddr {
    fn marshal_binary(&self) -> Result<Vec<u8>> {
        Ok(match self {
            std::net::IpAddr::V4(v4) => v4.octets().to_vec(),
            std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
        })
    }

    fn unmarshal_binary(bytes: &[u8]) -> Result<Self> {
        if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
            return Ok(std::net::IpAddr::from(octets));
        }
        if let Ok(octets) = <[u8; 16]>::try_from(bytes) {
            return Ok(std::net::IpAddr::from(octets));
        }
        Err(Error::Marshal(format!("ip address must be 4 or 16 bytes, got {}", bytes.len())))
    }
}

impl BinaryMarshal for std::time::Duration {
    fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(12);
        out.extend_from_slice(&self.as_secs().to_le_bytes());
        out.extend_from_slice(&self.subsec_nanos().to_le_bytes());
        Ok(out)
    }

    fn unmarshal_binary(bytes: &[u8]) -> Result<Self> {
        let raw = <[u8; 12]>::try_from(bytes)
            .map_err(|_| Error::Marshal(format!("duration must be 12 bytes, got {}", bytes.len())))?;
        let mut secs = [0u8; 8];
        let mut nanos = [0u8; 4];
        secs.copy_from_slice(&raw[..8]);
        nanos.copy_from_slice(&raw[8..]);
        let nanos = u32::from_le_bytes(nanos);
        if nanos >= 1_000_000_000 {
            return Err(Error::Marshal(format!("duration nanos out of range: {}", nanos)));
        }
        Ok(std::time::Duration::new(u64::from_le_bytes(secs), nanos))
    }
}
