//! A sharded, in-memory distributed graph database: a fixed grid of shard
//! servers exchanging vertex/edge mutations over a pluggable transport
//! (`tcp` or `mpi`), fronted by a routing/batching client.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod ids;
pub mod ingress;
pub mod membership;
pub mod row;
pub mod rpc;
pub mod shard;
pub mod transport;
pub mod value;

pub use client::GraphClient;
pub use error::{DbError, DbResult};
pub use ids::{EdgeId, FieldId, ShardId, VertexId};
pub use row::{Row, Schema, SchemaField};
pub use shard::{Direction, Shard, ShardManager, ShardServer};
pub use value::{Field, FieldType, FieldValue};
