//! Wire serialization codec (§4.5).
//!
//! Every RPC payload and every `graph_value` field is encoded through this
//! module so the byte layout is identical regardless of which transport
//! carried it. Integers and floats are little-endian fixed-width; byte
//! sequences, ordered sequences, and mappings are all length-prefixed with a
//! `u64` count; tagged unions are a one-byte tag followed by the variant's
//! payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DbError, DbResult};

/// Types that can append themselves to a wire buffer.
pub trait Encode {
    fn encode(&self, buf: &mut BytesMut);
}

/// Types that can be read back out of a wire buffer.
///
/// Decoding is cursor-based: implementors consume bytes from the front of
/// `buf` and leave the remainder for the next field.
pub trait Decode: Sized {
    fn decode(buf: &mut Bytes) -> DbResult<Self>;
}

fn need(buf: &Bytes, n: usize) -> DbResult<()> {
    if buf.remaining() < n {
        return Err(DbError::Codec(format!(
            "expected {n} more bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

macro_rules! impl_scalar {
    ($t:ty, $put:ident, $get:ident, $size:expr) => {
        impl Encode for $t {
            fn encode(&self, buf: &mut BytesMut) {
                buf.$put(*self);
            }
        }
        impl Decode for $t {
            fn decode(buf: &mut Bytes) -> DbResult<Self> {
                need(buf, $size)?;
                Ok(buf.$get())
            }
        }
    };
}

impl_scalar!(u8, put_u8, get_u8, 1);
impl_scalar!(u16, put_u16_le, get_u16_le, 2);
impl_scalar!(u32, put_u32_le, get_u32_le, 4);
impl_scalar!(u64, put_u64_le, get_u64_le, 8);
impl_scalar!(i32, put_i32_le, get_i32_le, 4);
impl_scalar!(i64, put_i64_le, get_i64_le, 8);
impl_scalar!(f64, put_f64_le, get_f64_le, 8);

/// The zero-width unit — used as `T` in batch replies whose per-item
/// result carries no payload (e.g. a bare `add_vertex`).
impl Encode for () {
    fn encode(&self, _buf: &mut BytesMut) {}
}
impl Decode for () {
    fn decode(_buf: &mut Bytes) -> DbResult<Self> {
        Ok(())
    }
}

impl Encode for bool {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(*self as u8);
    }
}
impl Decode for bool {
    fn decode(buf: &mut Bytes) -> DbResult<Self> {
        Ok(u8::decode(buf)? != 0)
    }
}

/// `[u64 length][bytes]`
impl Encode for Vec<u8> {
    fn encode(&self, buf: &mut BytesMut) {
        (self.len() as u64).encode(buf);
        buf.put_slice(self);
    }
}
impl Decode for Vec<u8> {
    fn decode(buf: &mut Bytes) -> DbResult<Self> {
        let len = u64::decode(buf)? as usize;
        need(buf, len)?;
        Ok(buf.split_to(len).to_vec())
    }
}

impl Encode for String {
    fn encode(&self, buf: &mut BytesMut) {
        self.as_bytes().to_vec().encode(buf);
    }
}
impl Decode for String {
    fn decode(buf: &mut Bytes) -> DbResult<Self> {
        let bytes = Vec::<u8>::decode(buf)?;
        String::from_utf8(bytes).map_err(|e| DbError::Codec(format!("invalid utf8: {e}")))
    }
}

/// Ordered sequence: `[u64 count][T...]`.
///
/// Not a blanket `impl<T> Encode for Vec<T>` because that would collide
/// with the length-prefixed-bytes impl for `Vec<u8>` above; sequence types
/// call these free functions explicitly instead.
pub fn encode_seq<T: Encode>(items: &[T], buf: &mut BytesMut) {
    (items.len() as u64).encode(buf);
    for item in items {
        item.encode(buf);
    }
}

pub fn decode_seq<T: Decode>(buf: &mut Bytes) -> DbResult<Vec<T>> {
    let count = u64::decode(buf)? as usize;
    let mut out = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        out.push(T::decode(buf)?);
    }
    Ok(out)
}

pub fn encode_map<K: Encode, V: Encode>(items: &[(K, V)], buf: &mut BytesMut) {
    (items.len() as u64).encode(buf);
    for (k, v) in items {
        k.encode(buf);
        v.encode(buf);
    }
}

pub fn decode_map<K: Decode, V: Decode>(buf: &mut Bytes) -> DbResult<Vec<(K, V)>> {
    let count = u64::decode(buf)? as usize;
    let mut out = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        out.push((K::decode(buf)?, V::decode(buf)?));
    }
    Ok(out)
}

/// Encode a value with its own buffer and return the bytes.
pub fn to_bytes<T: Encode>(value: &T) -> Vec<u8> {
    let mut buf = BytesMut::new();
    value.encode(&mut buf);
    buf.to_vec()
}

/// Decode a value from a byte slice, requiring the whole slice to be
/// consumed.
pub fn from_bytes<T: Decode>(bytes: &[u8]) -> DbResult<T> {
    let mut buf = Bytes::copy_from_slice(bytes);
    let value = T::decode(&mut buf)?;
    if buf.has_remaining() {
        return Err(DbError::Codec(format!(
            "{} trailing bytes after decode",
            buf.remaining()
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trip() {
        let mut buf = BytesMut::new();
        42u64.encode(&mut buf);
        (-7i32).encode(&mut buf);
        3.5f64.encode(&mut buf);
        true.encode(&mut buf);
        let mut cursor = buf.freeze();
        assert_eq!(u64::decode(&mut cursor).unwrap(), 42);
        assert_eq!(i32::decode(&mut cursor).unwrap(), -7);
        assert_eq!(f64::decode(&mut cursor).unwrap(), 3.5);
        assert!(bool::decode(&mut cursor).unwrap());
    }

    #[test]
    fn string_round_trip() {
        let s = "vertex3".to_string();
        let bytes = to_bytes(&s);
        let back: String = from_bytes(&bytes).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn seq_round_trip() {
        let items = vec![1u64, 2, 3, 4];
        let mut buf = BytesMut::new();
        encode_seq(&items, &mut buf);
        let mut cursor = buf.freeze();
        let back: Vec<u64> = decode_seq(&mut cursor).unwrap();
        assert_eq!(items, back);
    }

    #[test]
    fn map_round_trip() {
        let items = vec![(1u16, "a".to_string()), (2u16, "b".to_string())];
        let mut buf = BytesMut::new();
        encode_map(&items, &mut buf);
        let mut cursor = buf.freeze();
        let back: Vec<(u16, String)> = decode_map(&mut cursor).unwrap();
        assert_eq!(items, back);
    }

    #[test]
    fn short_buffer_errors_instead_of_panicking() {
        let mut cursor = Bytes::copy_from_slice(&[1, 2]);
        assert!(u64::decode(&mut cursor).is_err());
    }
}
