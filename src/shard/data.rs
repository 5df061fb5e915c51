//! The `Shard` data plane (§3 "Shard", §4.6).

use std::collections::HashMap;

use crate::error::{DbError, DbResult};
use crate::ids::{EdgeId, FieldId, ShardId, VertexId};
use crate::row::{Row, Schema};
use crate::value::{FieldType, FieldValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

struct VertexRecord {
    id: VertexId,
    row: Row,
    mirrors: Vec<ShardId>,
}

struct EdgeRecord {
    src: VertexId,
    dst: VertexId,
    row: Row,
}

/// A single shard's slice of the graph: master vertices, directed edges,
/// and the forward/reverse adjacency indexes linking them.
///
/// All mutation goes through `&mut self`; the shard server wraps one
/// instance behind a coarse mutex (§4.7, §5 "Shared-resource policies") so
/// this type itself need not be internally synchronized.
pub struct Shard {
    shard_id: ShardId,
    vertex_schema: Schema,
    edge_schema: Schema,
    vertices: Vec<VertexRecord>,
    vertex_index: HashMap<VertexId, usize>,
    edges: Vec<EdgeRecord>,
    // VertexId -> positions in `edges` where this vertex is the source.
    forward: HashMap<VertexId, Vec<usize>>,
    // VertexId -> positions in `edges` where this vertex is the destination.
    reverse: HashMap<VertexId, Vec<usize>>,
}

impl Shard {
    pub fn new(shard_id: ShardId) -> Self {
        Shard {
            shard_id,
            vertex_schema: Schema::new(),
            edge_schema: Schema::new(),
            vertices: Vec::new(),
            vertex_index: HashMap::new(),
            edges: Vec::new(),
            forward: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn vertex_schema(&self) -> &Schema {
        &self.vertex_schema
    }

    pub fn edge_schema(&self) -> &Schema {
        &self.edge_schema
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// §4.6: a vertex id already present with an all-NULL row is
    /// overwritten in place; one with any non-NULL field is a `Duplicate`.
    pub fn add_vertex(&mut self, id: VertexId, row: Row) -> DbResult<()> {
        if row.len() != self.vertex_schema.len() {
            return Err(DbError::InvalidType(
                "vertex row shape does not match schema".into(),
            ));
        }
        if let Some(&pos) = self.vertex_index.get(&id) {
            if self.vertices[pos].row.is_all_null() {
                self.vertices[pos].row = row;
                return Ok(());
            }
            return Err(DbError::Duplicate(format!("vertex {id} already exists")));
        }
        let pos = self.vertices.len();
        self.vertices.push(VertexRecord {
            id,
            row,
            mirrors: Vec::new(),
        });
        self.vertex_index.insert(id, pos);
        Ok(())
    }

    pub fn get_vertex(&self, id: VertexId) -> DbResult<&Row> {
        let pos = *self
            .vertex_index
            .get(&id)
            .ok_or_else(|| DbError::InvalidId(format!("vertex {id} not found")))?;
        Ok(&self.vertices[pos].row)
    }

    pub fn set_vertex_field(
        &mut self,
        id: VertexId,
        field: FieldId,
        value: FieldValue,
        delta: bool,
    ) -> DbResult<()> {
        let pos = *self
            .vertex_index
            .get(&id)
            .ok_or_else(|| DbError::InvalidId(format!("vertex {id} not found")))?;
        let row = &mut self.vertices[pos].row;
        let f = row
            .field_mut(field)
            .ok_or_else(|| DbError::InvalidId(format!("field {field} not found")))?;
        f.apply(value, delta)
    }

    /// No-op if `m == shard_id` (the master never mirrors itself); inserts
    /// an empty vertex first if `v` is not yet present.
    pub fn add_vertex_mirror(&mut self, v: VertexId, m: ShardId) -> DbResult<()> {
        if m == self.shard_id {
            return Ok(());
        }
        if !self.vertex_index.contains_key(&v) {
            self.add_vertex(v, Row::empty(&self.vertex_schema, true))?;
        }
        let pos = self.vertex_index[&v];
        let mirrors = &mut self.vertices[pos].mirrors;
        if !mirrors.contains(&m) {
            mirrors.push(m);
        }
        Ok(())
    }

    pub fn vertex_mirrors(&self, v: VertexId) -> DbResult<&[ShardId]> {
        let pos = *self
            .vertex_index
            .get(&v)
            .ok_or_else(|| DbError::InvalidId(format!("vertex {v} not found")))?;
        Ok(&self.vertices[pos].mirrors)
    }

    pub fn add_edge(&mut self, src: VertexId, dst: VertexId, row: Row) -> DbResult<usize> {
        if row.len() != self.edge_schema.len() {
            return Err(DbError::InvalidType(
                "edge row shape does not match schema".into(),
            ));
        }
        let pos = self.edges.len();
        self.edges.push(EdgeRecord { src, dst, row });
        self.forward.entry(src).or_default().push(pos);
        self.reverse.entry(dst).or_default().push(pos);
        Ok(pos)
    }

    pub fn get_edge(&self, local_pos: usize) -> DbResult<(VertexId, VertexId, &Row)> {
        let e = self
            .edges
            .get(local_pos)
            .ok_or_else(|| DbError::InvalidId(format!("edge position {local_pos} not found")))?;
        Ok((e.src, e.dst, &e.row))
    }

    pub fn set_edge_field(
        &mut self,
        local_pos: usize,
        field: FieldId,
        value: FieldValue,
        delta: bool,
    ) -> DbResult<()> {
        let e = self
            .edges
            .get_mut(local_pos)
            .ok_or_else(|| DbError::InvalidId(format!("edge position {local_pos} not found")))?;
        let f = e
            .row
            .field_mut(field)
            .ok_or_else(|| DbError::InvalidId(format!("field {field} not found")))?;
        f.apply(value, delta)
    }

    /// Returns `(peer_vertex_id, local_edge_position)` pairs in insertion
    /// order, for incoming or outgoing adjacency of `v`.
    pub fn adjacency(&self, v: VertexId, dir: Direction) -> Vec<(VertexId, usize)> {
        let (index, peer_of): (&HashMap<VertexId, Vec<usize>>, fn(&EdgeRecord) -> VertexId) =
            match dir {
                Direction::Outgoing => (&self.forward, |e| e.dst),
                Direction::Incoming => (&self.reverse, |e| e.src),
            };
        index
            .get(&v)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&pos| (peer_of(&self.edges[pos]), pos))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn add_vertex_field(&mut self, name: String, ty: FieldType, indexed: bool) -> DbResult<FieldId> {
        let id = self.vertex_schema.add_field(name, ty, indexed)?;
        let target_len = self.vertex_schema.len();
        let schema = self.vertex_schema.clone();
        for v in &mut self.vertices {
            v.row.grow_to(target_len, &schema);
        }
        Ok(id)
    }

    pub fn add_edge_field(&mut self, name: String, ty: FieldType, indexed: bool) -> DbResult<FieldId> {
        let id = self.edge_schema.add_field(name, ty, indexed)?;
        let target_len = self.edge_schema.len();
        let schema = self.edge_schema.clone();
        for e in &mut self.edges {
            e.row.grow_to(target_len, &schema);
        }
        Ok(id)
    }

    /// Admin `RESET`: wipes vertices, edges, and indexes. Schemas are kept
    /// so the shard can resume accepting rows of the same shape.
    pub fn reset(&mut self) {
        self.vertices.clear();
        self.vertex_index.clear();
        self.edges.clear();
        self.forward.clear();
        self.reverse.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard_with_string_field() -> Shard {
        let mut s = Shard::new(0);
        s.add_vertex_field("title".into(), FieldType::String, false).unwrap();
        s
    }

    #[test]
    fn duplicate_vertex_with_data_is_rejected() {
        let mut s = shard_with_string_field();
        let row = Row::empty(s.vertex_schema(), true);
        s.add_vertex(1, row.clone()).unwrap();
        let mut row2 = Row::empty(s.vertex_schema(), true);
        row2.field_mut(0)
            .unwrap()
            .set(FieldValue::String(b"x".to_vec()), false)
            .unwrap();
        s.set_vertex_field(1, 0, FieldValue::String(b"x".to_vec()), false).unwrap();
        assert!(matches!(
            s.add_vertex(1, row2),
            Err(DbError::Duplicate(_))
        ));
    }

    #[test]
    fn re_adding_all_null_vertex_overwrites() {
        let mut s = shard_with_string_field();
        let row = Row::empty(s.vertex_schema(), true);
        s.add_vertex(1, row.clone()).unwrap();
        assert!(s.add_vertex(1, row).is_ok());
        assert_eq!(s.num_vertices(), 1);
    }

    #[test]
    fn adjacency_tracks_both_directions() {
        let mut s = Shard::new(0);
        let row = Row::empty(s.edge_schema(), false);
        s.add_edge(1, 2, row.clone()).unwrap();
        s.add_edge(2, 1, row).unwrap();
        assert_eq!(s.adjacency(1, Direction::Outgoing).len(), 1);
        assert_eq!(s.adjacency(1, Direction::Incoming).len(), 1);
        assert_eq!(s.adjacency(2, Direction::Outgoing).len(), 1);
    }

    #[test]
    fn mirror_never_includes_master() {
        let mut s = Shard::new(3);
        s.add_vertex_mirror(10, 3).unwrap();
        assert!(s.vertex_index.get(&10).is_none());
        s.add_vertex_mirror(10, 5).unwrap();
        assert_eq!(s.vertex_mirrors(10).unwrap(), &[5]);
    }

    #[test]
    fn add_field_grows_all_existing_rows() {
        let mut s = Shard::new(0);
        s.add_vertex(1, Row::empty(s.vertex_schema(), true)).unwrap();
        s.add_vertex_field("title".into(), FieldType::String, false).unwrap();
        let row = s.get_vertex(1).unwrap();
        assert_eq!(row.len(), 1);
        assert!(row.field(0).unwrap().is_null());
    }

    #[test]
    fn reset_keeps_schema_clears_data() {
        let mut s = shard_with_string_field();
        s.add_vertex(1, Row::empty(s.vertex_schema(), true)).unwrap();
        s.reset();
        assert_eq!(s.num_vertices(), 0);
        assert_eq!(s.vertex_schema().len(), 1);
    }
}
