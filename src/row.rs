//! Row and schema (§3 "Row", "Schema").

use bytes::{Bytes, BytesMut};

use crate::codec::{decode_seq, encode_seq, Decode, Encode};
use crate::error::{DbError, DbResult};
use crate::ids::FieldId;
use crate::value::{Field, FieldType};

/// One entry of a schema: `(name, type, indexed_flag)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaField {
    pub name: String,
    pub ty: FieldType,
    pub indexed: bool,
}

/// Process-wide mapping from [`FieldId`] to its definition, kept separately
/// for vertex rows and edge rows. Mutating the schema (appending a field) is
/// meant to be applied to every shard before any row is written against the
/// new shape — the shard server enforces the append-only part of that
/// contract; the "before any row" ordering is a caller responsibility
/// (§4.9's client issues it as a broadcast, see `ShardManager`/`GraphClient`).
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<SchemaField>,
}

impl Schema {
    pub fn new() -> Self {
        Schema { fields: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, id: FieldId) -> Option<&SchemaField> {
        self.fields.get(id as usize)
    }

    pub fn find(&self, name: &str) -> Option<FieldId> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .map(|i| i as FieldId)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchemaField> {
        self.fields.iter()
    }

    /// Append a new field. Fails with `Duplicate` if the name already
    /// exists — schemas are add-only, matching §4.6's "Removing a field is
    /// forbidden" invariant (there is simply no remove operation).
    pub fn add_field(&mut self, name: String, ty: FieldType, indexed: bool) -> DbResult<FieldId> {
        if self.find(&name).is_some() {
            return Err(DbError::Duplicate(format!("field '{name}' already exists")));
        }
        let id = self.fields.len() as FieldId;
        self.fields.push(SchemaField { name, ty, indexed });
        Ok(id)
    }
}

/// An ordered sequence of fields plus an `is_vertex` flag.
///
/// Invariant: `row.len() == schema.len()` and `row.field(i).type ==
/// schema[i].type` at all times — `Row::grow_to` is the only way new slots
/// appear, and it always appends NULLs of the schema's declared type.
#[derive(Debug, Clone)]
pub struct Row {
    is_vertex: bool,
    fields: Vec<Field>,
}

impl Row {
    pub fn empty(schema: &Schema, is_vertex: bool) -> Self {
        Row {
            is_vertex,
            fields: schema.iter().map(|f| Field::null(f.ty)).collect(),
        }
    }

    pub fn is_vertex(&self) -> bool {
        self.is_vertex
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.get(id as usize)
    }

    pub fn field_mut(&mut self, id: FieldId) -> Option<&mut Field> {
        self.fields.get_mut(id as usize)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// True if every field is NULL — used by `add_vertex` to decide whether
    /// re-adding an existing vertex id is an overwrite or a `Duplicate`.
    pub fn is_all_null(&self) -> bool {
        self.fields.iter().all(|f| f.is_null())
    }

    /// Append NULL fields until `len() == target_len`, called whenever the
    /// owning schema grows (§4.6 `add_vertex_field`/`add_edge_field`).
    pub fn grow_to(&mut self, target_len: usize, schema: &Schema) {
        while self.fields.len() < target_len {
            let id = self.fields.len();
            let ty = schema.field(id as FieldId).expect("schema grew").ty;
            self.fields.push(Field::null(ty));
        }
    }
}

impl Encode for Row {
    fn encode(&self, buf: &mut BytesMut) {
        self.is_vertex.encode(buf);
        encode_seq(&self.fields, buf);
    }
}

impl Decode for Row {
    fn decode(buf: &mut Bytes) -> DbResult<Self> {
        let is_vertex = bool::decode(buf)?;
        let fields = decode_seq(buf)?;
        Ok(Row { is_vertex, fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_field_rejects_duplicate_name() {
        let mut schema = Schema::new();
        schema.add_field("title".into(), FieldType::String, false).unwrap();
        assert!(schema
            .add_field("title".into(), FieldType::IntI64, false)
            .is_err());
    }

    #[test]
    fn row_grows_with_schema() {
        let mut schema = Schema::new();
        schema.add_field("title".into(), FieldType::String, false).unwrap();
        let mut row = Row::empty(&schema, true);
        assert_eq!(row.len(), 1);

        schema.add_field("weight".into(), FieldType::DoubleF64, false).unwrap();
        row.grow_to(schema.len(), &schema);
        assert_eq!(row.len(), 2);
        assert!(row.field(1).unwrap().is_null());
        assert_eq!(row.field(1).unwrap().field_type(), FieldType::DoubleF64);
    }

    #[test]
    fn fresh_row_is_all_null() {
        let mut schema = Schema::new();
        schema.add_field("a".into(), FieldType::IntI64, false).unwrap();
        let row = Row::empty(&schema, false);
        assert!(row.is_all_null());
    }
}
