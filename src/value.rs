//! Scalar field values (§3 "Scalar field value (tagged)").
//!
//! A [`FieldValue`] is the tagged union carried by every row cell; a
//! [`Field`] wraps one with the null flag, the delta-commit flag, the
//! modified flag, and the pre-modification snapshot needed to compute
//! additive deltas at commit time (§8 property 6).

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{decode_seq, encode_seq, Decode, Encode};
use crate::error::{DbError, DbResult};

/// Stable tag numbering for the wire format — never renumber existing
/// variants, only append.
const TAG_VID: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_DOUBLE: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_BLOB: u8 = 4;
const TAG_DOUBLE_VEC: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    VidI64,
    IntI64,
    DoubleF64,
    String,
    Blob,
    DoubleVec,
}

impl FieldType {
    pub fn tag(self) -> u8 {
        match self {
            FieldType::VidI64 => TAG_VID,
            FieldType::IntI64 => TAG_INT,
            FieldType::DoubleF64 => TAG_DOUBLE,
            FieldType::String => TAG_STRING,
            FieldType::Blob => TAG_BLOB,
            FieldType::DoubleVec => TAG_DOUBLE_VEC,
        }
    }

    pub fn from_tag(tag: u8) -> DbResult<Self> {
        Ok(match tag {
            TAG_VID => FieldType::VidI64,
            TAG_INT => FieldType::IntI64,
            TAG_DOUBLE => FieldType::DoubleF64,
            TAG_STRING => FieldType::String,
            TAG_BLOB => FieldType::Blob,
            TAG_DOUBLE_VEC => FieldType::DoubleVec,
            other => return Err(DbError::Codec(format!("unknown field type tag {other}"))),
        })
    }

    /// Numeric variants are the only ones `use_delta_commit` may apply to.
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::IntI64 | FieldType::DoubleF64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    VidI64(u64),
    IntI64(i64),
    DoubleF64(f64),
    String(Vec<u8>),
    Blob(Vec<u8>),
    DoubleVec(Vec<f64>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::VidI64(_) => FieldType::VidI64,
            FieldValue::IntI64(_) => FieldType::IntI64,
            FieldValue::DoubleF64(_) => FieldType::DoubleF64,
            FieldValue::String(_) => FieldType::String,
            FieldValue::Blob(_) => FieldType::Blob,
            FieldValue::DoubleVec(_) => FieldType::DoubleVec,
        }
    }

    fn payload(&self, buf: &mut BytesMut) {
        match self {
            FieldValue::VidI64(v) => v.encode(buf),
            FieldValue::IntI64(v) => v.encode(buf),
            FieldValue::DoubleF64(v) => v.encode(buf),
            FieldValue::String(v) => v.clone().encode(buf),
            FieldValue::Blob(v) => v.clone().encode(buf),
            FieldValue::DoubleVec(v) => encode_seq(v, buf),
        }
    }

    fn decode_payload(ty: FieldType, buf: &mut Bytes) -> DbResult<Self> {
        Ok(match ty {
            FieldType::VidI64 => FieldValue::VidI64(u64::decode(buf)?),
            FieldType::IntI64 => FieldValue::IntI64(i64::decode(buf)?),
            FieldType::DoubleF64 => FieldValue::DoubleF64(f64::decode(buf)?),
            FieldType::String => FieldValue::String(Vec::<u8>::decode(buf)?),
            FieldType::Blob => FieldValue::Blob(Vec::<u8>::decode(buf)?),
            FieldType::DoubleVec => FieldValue::DoubleVec(decode_seq(buf)?),
        })
    }

    /// Add `delta` to a numeric value. Non-numeric types reject this.
    pub fn add_delta(&self, delta: &FieldValue) -> DbResult<FieldValue> {
        match (self, delta) {
            (FieldValue::IntI64(a), FieldValue::IntI64(b)) => Ok(FieldValue::IntI64(a + b)),
            (FieldValue::DoubleF64(a), FieldValue::DoubleF64(b)) => Ok(FieldValue::DoubleF64(a + b)),
            _ => Err(DbError::InvalidType(
                "delta commit is only valid for IntI64/DoubleF64 fields".into(),
            )),
        }
    }
}

/// Tagged union: `[u8 tag][payload...]` (§4.5), used wherever a bare value
/// (not wrapped in a `Field`'s null/delta bookkeeping) crosses the wire —
/// e.g. RPC request/reply bodies.
impl Encode for FieldValue {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.field_type().tag());
        self.payload(buf);
    }
}

impl Decode for FieldValue {
    fn decode(buf: &mut Bytes) -> DbResult<Self> {
        let tag = u8::decode(buf)?;
        let ty = FieldType::from_tag(tag)?;
        FieldValue::decode_payload(ty, buf)
    }
}

/// `graph_value` wire form: `(type_tag, null_flag, use_delta_commit,
/// payload_len, payload?)`.
#[derive(Debug, Clone)]
pub struct Field {
    ty: FieldType,
    value: Option<FieldValue>,
    use_delta_commit: bool,
    modified: bool,
    old_value: Option<FieldValue>,
}

impl Field {
    pub fn null(ty: FieldType) -> Self {
        Field {
            ty,
            value: None,
            use_delta_commit: false,
            modified: false,
            old_value: None,
        }
    }

    pub fn field_type(&self) -> FieldType {
        self.ty
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    pub fn value(&self) -> Option<&FieldValue> {
        self.value.as_ref()
    }

    pub fn use_delta_commit(&self) -> bool {
        self.use_delta_commit
    }

    pub fn modified(&self) -> bool {
        self.modified
    }

    pub fn set_use_delta_commit(&mut self, on: bool) -> DbResult<()> {
        if on && !self.ty.is_numeric() {
            return Err(DbError::InvalidType(
                "use_delta_commit is only valid on numeric fields".into(),
            ));
        }
        self.use_delta_commit = on;
        Ok(())
    }

    /// Apply a set, honoring the `delta` invariant of §3: a numeric field
    /// with `delta=true` adds to `old_value`; `delta=false` replaces.
    pub fn set(&mut self, new_value: FieldValue, delta: bool) -> DbResult<()> {
        if new_value.field_type() != self.ty {
            return Err(DbError::InvalidType(format!(
                "field is {:?}, got {:?}",
                self.ty,
                new_value.field_type()
            )));
        }
        if delta && !self.ty.is_numeric() {
            return Err(DbError::InvalidType(
                "delta=true is only valid for numeric fields".into(),
            ));
        }
        let applied = if delta {
            let base = self.old_value.clone().unwrap_or(match self.ty {
                FieldType::IntI64 => FieldValue::IntI64(0),
                FieldType::DoubleF64 => FieldValue::DoubleF64(0.0),
                _ => unreachable!("delta already rejected for non-numeric types"),
            });
            base.add_delta(&new_value)?
        } else {
            new_value
        };
        self.value = Some(applied);
        self.modified = true;
        Ok(())
    }

    /// Apply a set and immediately commit it: the shard server has no
    /// separate commit phase (every request is applied and replied to in
    /// one step), so each successful `set` folds straight into
    /// `old_value` — the next delta builds on top of this one.
    pub fn apply(&mut self, new_value: FieldValue, delta: bool) -> DbResult<()> {
        self.set(new_value, delta)?;
        self.post_commit();
        Ok(())
    }

    /// Snapshot the current value as the new baseline and clear the
    /// modified flag, as `post_commit_state` does in the original
    /// implementation.
    pub fn post_commit(&mut self) {
        if self.ty.is_numeric() {
            self.old_value = self.value.clone();
        }
        self.modified = false;
    }
}

impl Encode for Field {
    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&[self.ty.tag()]);
        self.is_null().encode(buf);
        self.use_delta_commit.encode(buf);
        match &self.value {
            None => (0u64).encode(buf),
            Some(v) => {
                let mut payload = BytesMut::new();
                v.payload(&mut payload);
                (payload.len() as u64).encode(buf);
                buf.extend_from_slice(&payload);
            }
        }
    }
}

impl Decode for Field {
    fn decode(buf: &mut Bytes) -> DbResult<Self> {
        let tag = u8::decode(buf)?;
        let ty = FieldType::from_tag(tag)?;
        let null_flag = bool::decode(buf)?;
        let use_delta_commit = bool::decode(buf)?;
        let payload_len = u64::decode(buf)? as usize;
        let value = if null_flag {
            if payload_len != 0 {
                return Err(DbError::Codec("null field carries a payload".into()));
            }
            None
        } else {
            let mut payload = buf.split_to(payload_len);
            Some(FieldValue::decode_payload(ty, &mut payload)?)
        };
        Ok(Field {
            ty,
            value: value.clone(),
            use_delta_commit,
            modified: false,
            old_value: value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{from_bytes, to_bytes};

    #[test]
    fn null_field_round_trips() {
        let f = Field::null(FieldType::String);
        let bytes = to_bytes(&f);
        let back: Field = from_bytes(&bytes).unwrap();
        assert!(back.is_null());
        assert_eq!(back.field_type(), FieldType::String);
    }

    #[test]
    fn set_replaces_by_default() {
        let mut f = Field::null(FieldType::IntI64);
        f.set(FieldValue::IntI64(5), false).unwrap();
        assert_eq!(f.value(), Some(&FieldValue::IntI64(5)));
        f.set(FieldValue::IntI64(9), false).unwrap();
        assert_eq!(f.value(), Some(&FieldValue::IntI64(9)));
    }

    #[test]
    fn delta_commit_accumulates() {
        let mut f = Field::null(FieldType::DoubleF64);
        f.set_use_delta_commit(true).unwrap();
        for _ in 0..4 {
            f.apply(FieldValue::DoubleF64(0.25), true).unwrap();
        }
        assert_eq!(f.value(), Some(&FieldValue::DoubleF64(1.0)));
    }

    #[test]
    fn delta_on_non_numeric_rejected() {
        let mut f = Field::null(FieldType::String);
        assert!(f.set_use_delta_commit(true).is_err());
        assert!(f
            .set(FieldValue::String(b"x".to_vec()), true)
            .is_err());
    }

    #[test]
    fn type_mismatch_rejected() {
        let mut f = Field::null(FieldType::IntI64);
        assert!(f.set(FieldValue::String(b"oops".to_vec()), false).is_err());
    }
}
