//! Shard server (§4.7): the `[cmd:u8][obj:u8]` request/reply state machine
//! running over the RPC dispatcher. Mirrors the teacher's
//! `driver::handler` read-loop/dispatch/response shape, keyed on this
//! header instead of a JSON command enum.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;

use crate::codec::{decode_seq, encode_seq, to_bytes, Decode, Encode};
use crate::error::{DbError, DbResult};
use crate::ids::{make_eid, split_eid, EdgeId, FieldId, ShardId, VertexId};
use crate::rpc::{Dispatcher, MessageId};
use crate::row::Row;
use crate::shard::data::{Direction, Shard};
use crate::value::{FieldType, FieldValue};

pub const MSG_SHARD_REQUEST: MessageId = 1;
pub const MSG_SHARD_REPLY: MessageId = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    Get,
    Set,
    Add,
    BGet,
    BSet,
    BAdd,
    Admin,
}

impl Cmd {
    fn tag(self) -> u8 {
        match self {
            Cmd::Get => 0,
            Cmd::Set => 1,
            Cmd::Add => 2,
            Cmd::BGet => 3,
            Cmd::BSet => 4,
            Cmd::BAdd => 5,
            Cmd::Admin => 6,
        }
    }

    fn from_tag(tag: u8) -> DbResult<Self> {
        Ok(match tag {
            0 => Cmd::Get,
            1 => Cmd::Set,
            2 => Cmd::Add,
            3 => Cmd::BGet,
            4 => Cmd::BSet,
            5 => Cmd::BAdd,
            6 => Cmd::Admin,
            other => return Err(DbError::InvalidHeader(format!("unknown cmd byte {other}"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Obj {
    Vertex,
    Edge,
    VertexAdj,
    VertexMirror,
    Shard,
    NumVertices,
    NumEdges,
    VertexField,
    EdgeField,
    Reset,
}

impl Obj {
    fn tag(self) -> u8 {
        match self {
            Obj::Vertex => 0,
            Obj::Edge => 1,
            Obj::VertexAdj => 2,
            Obj::VertexMirror => 3,
            Obj::Shard => 4,
            Obj::NumVertices => 5,
            Obj::NumEdges => 6,
            Obj::VertexField => 7,
            Obj::EdgeField => 8,
            Obj::Reset => 9,
        }
    }

    fn from_tag(tag: u8) -> DbResult<Self> {
        Ok(match tag {
            0 => Obj::Vertex,
            1 => Obj::Edge,
            2 => Obj::VertexAdj,
            3 => Obj::VertexMirror,
            4 => Obj::Shard,
            5 => Obj::NumVertices,
            6 => Obj::NumEdges,
            7 => Obj::VertexField,
            8 => Obj::EdgeField,
            9 => Obj::Reset,
            other => return Err(DbError::InvalidHeader(format!("unknown obj byte {other}"))),
        })
    }
}

/// Every request carries a client-assigned correlation id so the reply can
/// be matched back to a pending future — the header itself (§4.7) says
/// nothing about this, it is this implementation's RPC-layer glue (the
/// original ties requests to replies through the query-object's own futures
/// instead).
pub fn encode_request(correlation_id: u64, cmd: Cmd, obj: Obj, body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(8 + 2 + body.len());
    correlation_id.encode(&mut buf);
    buf.put_u8(cmd.tag());
    buf.put_u8(obj.tag());
    buf.extend_from_slice(body);
    buf.to_vec()
}

/// A single-item reply: `[correlation_id:u64][error_code:i32][payload?]`.
pub fn encode_reply_ok(correlation_id: u64, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(8 + 4 + payload.len());
    correlation_id.encode(&mut buf);
    crate::error::OK.encode(&mut buf);
    buf.extend_from_slice(payload);
    buf.to_vec()
}

pub fn encode_reply_err(correlation_id: u64, err: &DbError) -> Vec<u8> {
    let mut buf = BytesMut::new();
    correlation_id.encode(&mut buf);
    err.code().encode(&mut buf);
    buf.to_vec()
}

/// Batch reply: `[correlation_id][success:bool][count:u64][T...]` when
/// every item succeeded, or `[correlation_id][success:bool][count:u64]
/// [error_code:i32]*count` when at least one failed (§4.7).
pub fn encode_batch_reply<T: Encode>(
    correlation_id: u64,
    results: &[DbResult<T>],
) -> Vec<u8> {
    let mut buf = BytesMut::new();
    correlation_id.encode(&mut buf);
    let all_ok = results.iter().all(|r| r.is_ok());
    all_ok.encode(&mut buf);
    (results.len() as u64).encode(&mut buf);
    if all_ok {
        for r in results {
            r.as_ref().unwrap().encode(&mut buf);
        }
    } else {
        for r in results {
            let code = match r {
                Ok(_) => crate::error::OK,
                Err(e) => e.code(),
            };
            code.encode(&mut buf);
        }
    }
    buf.to_vec()
}

/// Decoded reply, either single or batch; the client maps this back onto
/// its own request bookkeeping (see `crate::client`).
pub enum Reply {
    Single {
        correlation_id: u64,
        result: DbResult<Bytes>,
    },
    Batch {
        correlation_id: u64,
        success: bool,
        count: u64,
        body: Bytes,
    },
}

pub fn decode_single_reply(mut bytes: Bytes) -> DbResult<(u64, DbResult<Bytes>)> {
    let correlation_id = u64::decode(&mut bytes)?;
    let code = i32::decode(&mut bytes)?;
    if code == crate::error::OK {
        Ok((correlation_id, Ok(bytes)))
    } else {
        Ok((correlation_id, Err(DbError::from_code(code, "shard server error"))))
    }
}

pub fn decode_batch_reply(mut bytes: Bytes) -> DbResult<Reply> {
    let correlation_id = u64::decode(&mut bytes)?;
    let success = bool::decode(&mut bytes)?;
    let count = u64::decode(&mut bytes)?;
    Ok(Reply::Batch {
        correlation_id,
        success,
        count,
        body: bytes,
    })
}

/// Decodes a batch reply body into one `DbResult<T>` per input position
/// (§4.7 "[error_code:i32]*count if !success"), rather than collapsing the
/// whole batch into a single success/failure flag.
pub fn decode_batch_items<T: Decode>(reply: Reply) -> DbResult<Vec<DbResult<T>>> {
    match reply {
        Reply::Batch { success, count, mut body, .. } => {
            let mut out = Vec::with_capacity(count as usize);
            if success {
                for _ in 0..count {
                    out.push(Ok(T::decode(&mut body)?));
                }
            } else {
                for _ in 0..count {
                    let code = i32::decode(&mut body)?;
                    out.push(Err(DbError::from_code(code, "batch item failed")));
                }
            }
            Ok(out)
        }
        Reply::Single { result, .. } => Err(result
            .err()
            .unwrap_or_else(|| DbError::InvalidCommand("expected a batch reply, got single".into()))),
    }
}

/// `(Cmd::Get, Obj::Shard)`'s payload: shard-level stats and schema, the
/// Rust analogue of the original's `get_shard` (which serializes the whole
/// shard) sized down to what's bounded and actually useful to a caller —
/// the vertex/edge sets themselves are already reachable per-item.
pub struct ShardSummary {
    pub shard_id: ShardId,
    pub num_vertices: u64,
    pub num_edges: u64,
    pub vertex_schema: Vec<(String, FieldType, bool)>,
    pub edge_schema: Vec<(String, FieldType, bool)>,
}

impl Encode for ShardSummary {
    fn encode(&self, buf: &mut BytesMut) {
        self.shard_id.encode(buf);
        self.num_vertices.encode(buf);
        self.num_edges.encode(buf);
        let vs: Vec<(String, u8, bool)> = self
            .vertex_schema
            .iter()
            .map(|(n, t, i)| (n.clone(), t.tag(), *i))
            .collect();
        let es: Vec<(String, u8, bool)> = self
            .edge_schema
            .iter()
            .map(|(n, t, i)| (n.clone(), t.tag(), *i))
            .collect();
        encode_seq(&vs, buf);
        encode_seq(&es, buf);
    }
}

impl Decode for ShardSummary {
    fn decode(buf: &mut Bytes) -> DbResult<Self> {
        let shard_id = ShardId::decode(buf)?;
        let num_vertices = u64::decode(buf)?;
        let num_edges = u64::decode(buf)?;
        let vs: Vec<(String, u8, bool)> = decode_seq(buf)?;
        let es: Vec<(String, u8, bool)> = decode_seq(buf)?;
        let vertex_schema = vs
            .into_iter()
            .map(|(n, t, i)| Ok((n, FieldType::from_tag(t)?, i)))
            .collect::<DbResult<Vec<_>>>()?;
        let edge_schema = es
            .into_iter()
            .map(|(n, t, i)| Ok((n, FieldType::from_tag(t)?, i)))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(ShardSummary {
            shard_id,
            num_vertices,
            num_edges,
            vertex_schema,
            edge_schema,
        })
    }
}

/// The server's request/reply engine: `ReceiveHeader -> Parse ->
/// Apply(shard) -> Reply`. A single coarse mutex serializes writes with
/// reads on the same shard (§5 "Shared-resource policies"); batch writes
/// take it once per batch rather than once per item.
pub struct ShardServer {
    shard_id: ShardId,
    shard: Mutex<Shard>,
}

impl ShardServer {
    pub fn new(shard_id: ShardId) -> Arc<Self> {
        Arc::new(ShardServer {
            shard_id,
            shard: Mutex::new(Shard::new(shard_id)),
        })
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    /// Installs this server's handler at [`MSG_SHARD_REQUEST`] and spawns
    /// the async reply for each request.
    pub fn install(self: &Arc<Self>, dispatcher: Arc<Dispatcher>) {
        let server = Arc::clone(self);
        dispatcher.register_handler(
            MSG_SHARD_REQUEST,
            Arc::new(move |peer, payload| {
                let server = Arc::clone(&server);
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    let reply = server.handle(payload);
                    let _ = dispatcher
                        .send_message(peer, MSG_SHARD_REPLY, &reply)
                        .await;
                });
            }),
        );
    }

    /// Pure function from request bytes to reply bytes — exercised
    /// directly by tests without a transport in the loop.
    pub fn handle(&self, mut payload: Bytes) -> Vec<u8> {
        let correlation_id = match u64::decode(&mut payload) {
            Ok(v) => v,
            Err(_) => return encode_reply_err(0, &DbError::InvalidHeader("short request".into())),
        };
        let (cmd, obj) = match self.parse_header(&mut payload) {
            Ok(v) => v,
            Err(e) => return encode_reply_err(correlation_id, &e),
        };
        self.apply(correlation_id, cmd, obj, payload)
    }

    fn parse_header(&self, payload: &mut Bytes) -> DbResult<(Cmd, Obj)> {
        if payload.remaining() < 2 {
            return Err(DbError::InvalidHeader("missing cmd/obj bytes".into()));
        }
        let cmd = Cmd::from_tag(payload.get_u8())?;
        let obj = Obj::from_tag(payload.get_u8())?;
        Ok((cmd, obj))
    }

    fn apply(&self, correlation_id: u64, cmd: Cmd, obj: Obj, mut body: Bytes) -> Vec<u8> {
        match (cmd, obj) {
            (Cmd::Admin, Obj::Reset) => {
                self.shard.lock().reset();
                encode_reply_ok(correlation_id, &[])
            }
            (Cmd::Get, Obj::NumVertices) => {
                let n = self.shard.lock().num_vertices() as u64;
                encode_reply_ok(correlation_id, &to_bytes(&n))
            }
            (Cmd::Get, Obj::NumEdges) => {
                let n = self.shard.lock().num_edges() as u64;
                encode_reply_ok(correlation_id, &to_bytes(&n))
            }
            (Cmd::Get, Obj::Vertex) => self.reply_result(correlation_id, || {
                let id = VertexId::decode(&mut body)?;
                let row = self.shard.lock().get_vertex(id)?.clone();
                Ok(to_bytes(&row))
            }),
            (Cmd::Get, Obj::Edge) => self.reply_result(correlation_id, || {
                let eid = EdgeId::decode(&mut body)?;
                let (_shard, local) = split_eid(eid);
                let shard = self.shard.lock();
                let (src, dst, row) = shard.get_edge(local as usize)?;
                let mut buf = BytesMut::new();
                src.encode(&mut buf);
                dst.encode(&mut buf);
                row.encode(&mut buf);
                Ok(buf.to_vec())
            }),
            (Cmd::Get, Obj::VertexAdj) => self.reply_result(correlation_id, || {
                let v = VertexId::decode(&mut body)?;
                let dir_byte = u8::decode(&mut body)?;
                let dir = if dir_byte == 0 { Direction::Outgoing } else { Direction::Incoming };
                let shard = self.shard.lock();
                let pairs: Vec<(VertexId, EdgeId)> = shard
                    .adjacency(v, dir)
                    .into_iter()
                    .map(|(peer, pos)| (peer, make_eid(self.shard_id, pos as u32)))
                    .collect();
                let mut buf = BytesMut::new();
                encode_seq(&pairs, &mut buf);
                Ok(buf.to_vec())
            }),
            (Cmd::Get, Obj::VertexMirror) => self.reply_result(correlation_id, || {
                let v = VertexId::decode(&mut body)?;
                let shard = self.shard.lock();
                let mirrors = shard.vertex_mirrors(v)?.to_vec();
                let mut buf = BytesMut::new();
                encode_seq(&mirrors, &mut buf);
                Ok(buf.to_vec())
            }),
            (Cmd::Get, Obj::Shard) => self.reply_result(correlation_id, || {
                let shard = self.shard.lock();
                let summary = ShardSummary {
                    shard_id: self.shard_id,
                    num_vertices: shard.num_vertices() as u64,
                    num_edges: shard.num_edges() as u64,
                    vertex_schema: shard
                        .vertex_schema()
                        .iter()
                        .map(|f| (f.name.clone(), f.ty, f.indexed))
                        .collect(),
                    edge_schema: shard
                        .edge_schema()
                        .iter()
                        .map(|f| (f.name.clone(), f.ty, f.indexed))
                        .collect(),
                };
                Ok(to_bytes(&summary))
            }),
            (Cmd::Get, Obj::VertexField) => self.reply_result(correlation_id, || {
                Ok(self.encode_schema(self.shard.lock().vertex_schema()))
            }),
            (Cmd::Get, Obj::EdgeField) => self.reply_result(correlation_id, || {
                Ok(self.encode_schema(self.shard.lock().edge_schema()))
            }),
            (Cmd::Set, Obj::Vertex) => self.reply_result(correlation_id, || {
                let id = VertexId::decode(&mut body)?;
                let field = FieldId::decode(&mut body)?;
                let value = FieldValue::decode(&mut body)?;
                let delta = bool::decode(&mut body)?;
                self.shard.lock().set_vertex_field(id, field, value, delta)?;
                Ok(Vec::new())
            }),
            (Cmd::Set, Obj::Edge) => self.reply_result(correlation_id, || {
                let eid = EdgeId::decode(&mut body)?;
                let (_shard, local) = split_eid(eid);
                let field = FieldId::decode(&mut body)?;
                let value = FieldValue::decode(&mut body)?;
                let delta = bool::decode(&mut body)?;
                self.shard
                    .lock()
                    .set_edge_field(local as usize, field, value, delta)?;
                Ok(Vec::new())
            }),
            (Cmd::Add, Obj::Vertex) => self.reply_result(correlation_id, || {
                let id = VertexId::decode(&mut body)?;
                let row = Row::decode(&mut body)?;
                self.shard.lock().add_vertex(id, row)?;
                Ok(Vec::new())
            }),
            (Cmd::Add, Obj::Edge) => self.reply_result(correlation_id, || {
                let src = VertexId::decode(&mut body)?;
                let dst = VertexId::decode(&mut body)?;
                let row = Row::decode(&mut body)?;
                let pos = self.shard.lock().add_edge(src, dst, row)?;
                Ok(to_bytes(&make_eid(self.shard_id, pos as u32)))
            }),
            (Cmd::Add, Obj::VertexMirror) => self.reply_result(correlation_id, || {
                let v = VertexId::decode(&mut body)?;
                let m = ShardId::decode(&mut body)?;
                self.shard.lock().add_vertex_mirror(v, m)?;
                Ok(Vec::new())
            }),
            (Cmd::Add, Obj::VertexField) => self.reply_result(correlation_id, || {
                let (name, ty, indexed) = self.decode_field_def(&mut body)?;
                let id = self.shard.lock().add_vertex_field(name, ty, indexed)?;
                Ok(to_bytes(&id))
            }),
            (Cmd::Add, Obj::EdgeField) => self.reply_result(correlation_id, || {
                let (name, ty, indexed) = self.decode_field_def(&mut body)?;
                let id = self.shard.lock().add_edge_field(name, ty, indexed)?;
                Ok(to_bytes(&id))
            }),
            (Cmd::BAdd, Obj::Vertex) => {
                let items: DbResult<Vec<(VertexId, Row)>> = (|| {
                    Ok(decode_seq::<(VertexId, Row)>(&mut body)?)
                })();
                let items = match items {
                    Ok(v) => v,
                    Err(e) => return encode_reply_err(correlation_id, &e),
                };
                let mut shard = self.shard.lock();
                let results: Vec<DbResult<()>> = items
                    .into_iter()
                    .map(|(id, row)| shard.add_vertex(id, row))
                    .collect();
                encode_batch_reply(correlation_id, &results)
            }
            (Cmd::BAdd, Obj::Edge) => {
                let items = match decode_seq::<(VertexId, VertexId, Row)>(&mut body) {
                    Ok(v) => v,
                    Err(e) => return encode_reply_err(correlation_id, &e),
                };
                let mut shard = self.shard.lock();
                let shard_id = self.shard_id;
                let results: Vec<DbResult<EdgeId>> = items
                    .into_iter()
                    .map(|(src, dst, row)| {
                        shard.add_edge(src, dst, row).map(|pos| make_eid(shard_id, pos as u32))
                    })
                    .collect();
                encode_batch_reply(correlation_id, &results)
            }
            (Cmd::BGet, Obj::Vertex) => {
                let ids = match decode_seq::<VertexId>(&mut body) {
                    Ok(v) => v,
                    Err(e) => return encode_reply_err(correlation_id, &e),
                };
                let shard = self.shard.lock();
                let results: Vec<DbResult<Row>> =
                    ids.into_iter().map(|id| shard.get_vertex(id).cloned()).collect();
                encode_batch_reply(correlation_id, &results)
            }
            (Cmd::BSet, Obj::Vertex) => {
                let items = match decode_seq::<(VertexId, FieldId, FieldValue, bool)>(&mut body) {
                    Ok(v) => v,
                    Err(e) => return encode_reply_err(correlation_id, &e),
                };
                let mut shard = self.shard.lock();
                let results: Vec<DbResult<()>> = items
                    .into_iter()
                    .map(|(id, field, value, delta)| shard.set_vertex_field(id, field, value, delta))
                    .collect();
                encode_batch_reply(correlation_id, &results)
            }
            _ => encode_reply_err(
                correlation_id,
                &DbError::InvalidCommand(format!("unsupported cmd/obj combination {cmd:?}/{obj:?}")),
            ),
        }
    }

    fn reply_result(&self, correlation_id: u64, f: impl FnOnce() -> DbResult<Vec<u8>>) -> Vec<u8> {
        match f() {
            Ok(payload) => encode_reply_ok(correlation_id, &payload),
            Err(e) => encode_reply_err(correlation_id, &e),
        }
    }

    fn decode_field_def(&self, body: &mut Bytes) -> DbResult<(String, FieldType, bool)> {
        let name = String::decode(body)?;
        let tag = u8::decode(body)?;
        let ty = FieldType::from_tag(tag)?;
        let indexed = bool::decode(body)?;
        Ok((name, ty, indexed))
    }

    fn encode_schema(&self, schema: &crate::row::Schema) -> Vec<u8> {
        let entries: Vec<(String, u8, bool)> = schema
            .iter()
            .map(|f| (f.name.clone(), f.ty.tag(), f.indexed))
            .collect();
        let mut buf = BytesMut::new();
        encode_seq(&entries, &mut buf);
        buf.to_vec()
    }
}

// Tuple Encode/Decode impls needed by request/reply bodies above. Kept
// local to this module since the rest of the codebase builds payloads
// field-by-field instead of through generic tuples.
impl<A: Encode, B: Encode> Encode for (A, B) {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
        self.1.encode(buf);
    }
}
impl<A: Decode, B: Decode> Decode for (A, B) {
    fn decode(buf: &mut Bytes) -> DbResult<Self> {
        Ok((A::decode(buf)?, B::decode(buf)?))
    }
}
impl<A: Encode, B: Encode, C: Encode> Encode for (A, B, C) {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
        self.1.encode(buf);
        self.2.encode(buf);
    }
}
impl<A: Decode, B: Decode, C: Decode> Decode for (A, B, C) {
    fn decode(buf: &mut Bytes) -> DbResult<Self> {
        Ok((A::decode(buf)?, B::decode(buf)?, C::decode(buf)?))
    }
}
impl<A: Encode, B: Encode, C: Encode, D: Encode> Encode for (A, B, C, D) {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
        self.1.encode(buf);
        self.2.encode(buf);
        self.3.encode(buf);
    }
}
impl<A: Decode, B: Decode, C: Decode, D: Decode> Decode for (A, B, C, D) {
    fn decode(buf: &mut Bytes) -> DbResult<Self> {
        Ok((A::decode(buf)?, B::decode(buf)?, C::decode(buf)?, D::decode(buf)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Schema;

    fn vertex_schema() -> Schema {
        let mut s = Schema::new();
        s.add_field("rank".into(), FieldType::DoubleF64, false).unwrap();
        s
    }

    #[test]
    fn add_then_get_vertex_round_trips() {
        let server = ShardServer::new(0);
        let schema = vertex_schema();
        server.shard.lock().add_vertex_field("rank".into(), FieldType::DoubleF64, false).unwrap();
        let row = Row::empty(&schema, true);

        let mut body = BytesMut::new();
        7u64.encode(&mut body);
        row.encode(&mut body);
        let req = encode_request(1, Cmd::Add, Obj::Vertex, &body);
        let reply = server.handle(Bytes::from(req));
        let (cid, result) = decode_single_reply(Bytes::from(reply)).unwrap();
        assert_eq!(cid, 1);
        assert!(result.is_ok());

        let mut get_body = BytesMut::new();
        7u64.encode(&mut get_body);
        let get_req = encode_request(2, Cmd::Get, Obj::Vertex, &get_body);
        let get_reply = server.handle(Bytes::from(get_req));
        let (cid2, result2) = decode_single_reply(Bytes::from(get_reply)).unwrap();
        assert_eq!(cid2, 2);
        let bytes = result2.unwrap();
        let got_row: Row = crate::codec::from_bytes(&bytes).unwrap();
        assert_eq!(got_row.len(), 1);
    }

    #[test]
    fn get_missing_vertex_is_invalid_id() {
        let server = ShardServer::new(0);
        let mut body = BytesMut::new();
        999u64.encode(&mut body);
        let req = encode_request(5, Cmd::Get, Obj::Vertex, &body);
        let reply = server.handle(Bytes::from(req));
        let (_, result) = decode_single_reply(Bytes::from(reply)).unwrap();
        assert!(matches!(result, Err(DbError::InvalidId(_))));
    }

    #[test]
    fn admin_reset_clears_vertices() {
        let server = ShardServer::new(0);
        server.shard.lock().add_vertex_field("rank".into(), FieldType::DoubleF64, false).unwrap();
        let schema = server.shard.lock().vertex_schema().clone();
        server.shard.lock().add_vertex(1, Row::empty(&schema, true)).unwrap();
        assert_eq!(server.shard.lock().num_vertices(), 1);

        let req = encode_request(9, Cmd::Admin, Obj::Reset, &[]);
        let reply = server.handle(Bytes::from(req));
        let (_, result) = decode_single_reply(Bytes::from(reply)).unwrap();
        assert!(result.is_ok());
        assert_eq!(server.shard.lock().num_vertices(), 0);
    }

    #[test]
    fn batch_add_vertex_reports_per_item_success() {
        let server = ShardServer::new(0);
        server.shard.lock().add_vertex_field("rank".into(), FieldType::DoubleF64, false).unwrap();
        let schema = server.shard.lock().vertex_schema().clone();
        let items = vec![(1u64, Row::empty(&schema, true)), (2u64, Row::empty(&schema, true))];
        let mut body = BytesMut::new();
        encode_seq(&items, &mut body);
        let req = encode_request(3, Cmd::BAdd, Obj::Vertex, &body);
        let reply = server.handle(Bytes::from(req));
        match decode_batch_reply(Bytes::from(reply)).unwrap() {
            Reply::Batch { success, count, .. } => {
                assert!(success);
                assert_eq!(count, 2);
            }
            _ => panic!("expected batch reply"),
        }
    }
}
