//! Identifier types (§3).

use crate::codec::{Decode, Encode};
use crate::error::DbResult;
use bytes::{Bytes, BytesMut};

pub type VertexId = u64;
pub type ShardId = u16;
pub type FieldId = u16;
pub type LocalEdgeId = u32;

/// `EdgeId` packs `(ShardId:16, LocalEdgeId:32, reserved:16)` into a 64-bit
/// little-endian integer. `split`/`make` are pure bit operations and must
/// stay stable across processes (§8 property 7: `make(split(e)) == e`).
pub type EdgeId = u64;

pub fn make_eid(shard_id: ShardId, local_eid: LocalEdgeId) -> EdgeId {
    (shard_id as u64) | ((local_eid as u64) << 16)
}

pub fn split_eid(eid: EdgeId) -> (ShardId, LocalEdgeId) {
    let shard_id = (eid & 0xFFFF) as ShardId;
    let local_eid = ((eid >> 16) & 0xFFFF_FFFF) as LocalEdgeId;
    (shard_id, local_eid)
}

impl Encode for EdgeId {
    fn encode(&self, buf: &mut BytesMut) {
        u64::encode(self, buf)
    }
}

impl Decode for EdgeId {
    fn decode(buf: &mut Bytes) -> DbResult<Self> {
        u64::decode(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eid_round_trips_for_arbitrary_values() {
        for (shard, local) in [(0u16, 0u32), (1, 1), (u16::MAX, u32::MAX), (42, 123456)] {
            let eid = make_eid(shard, local);
            assert_eq!(split_eid(eid), (shard, local));
        }
    }

    #[test]
    fn distinct_inputs_do_not_collide() {
        assert_ne!(make_eid(1, 0), make_eid(2, 0));
        assert_ne!(make_eid(1, 0), make_eid(1, 1));
    }
}
