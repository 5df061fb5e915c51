//! Transport abstraction (§4.1): the capability every higher layer (RPC
//! dispatcher, shard server, client) programs against. `TcpTransport`
//! (point-to-point, §4.3) and `MpiTransport` (collective, §4.2) are the two
//! implementors; callers pick one at startup via [`create`].

pub mod mpi;
pub mod tcp;
pub mod window;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DbError, DbResult};

pub type PeerId = usize;

/// Borrowed-bytes callback installed with `register_receiver`. The handler
/// must not retain `msg` past the call — if it needs the data later it must
/// copy it (Design Notes §9, "Boost-style callbacks").
pub type ReceiverFn = Arc<dyn Fn(PeerId, &[u8]) + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Buffered, thread-safe send. The transport copies `bytes` into its
    /// internal window; the caller keeps ownership. Rejects 0-length
    /// messages.
    async fn send(&self, target: PeerId, bytes: &[u8]) -> DbResult<()>;

    /// Same contract as `send`, but the caller gives up ownership of
    /// `bytes` — the transport frees it when done. If `has_efficient_send`
    /// is false this is the preferred call.
    async fn send_relinquish(&self, target: PeerId, bytes: Vec<u8>) -> DbResult<()> {
        self.send(target, &bytes).await
    }

    /// Returns once every send issued by any thread prior to the call has
    /// been handed to the peer's receive buffer. Thread-safe; concurrent
    /// flushes collapse to one round.
    async fn flush(&self) -> DbResult<()>;

    /// Next delivered message in round-robin order across peers, or `None`
    /// if none is immediately available. Must not be called once
    /// `register_receiver` has installed a callback.
    async fn receive(&self) -> Option<(PeerId, Vec<u8>)>;

    /// Install a push-style callback. `parallel = false` serializes
    /// callback invocations with an internal mutex.
    fn register_receiver(&self, handler: ReceiverFn, parallel: bool) -> DbResult<()>;

    /// Synchronous, collective: all peers return only after all peers have
    /// called it.
    async fn barrier(&self) -> DbResult<()>;

    fn size(&self) -> usize;
    fn rank(&self) -> usize;

    /// `true` ⇒ `send` copies into an internal window (caller retains
    /// ownership); `false` ⇒ `send_relinquish` is preferred.
    fn has_efficient_send(&self) -> bool;
}

pub fn reject_empty(bytes: &[u8]) -> DbResult<()> {
    if bytes.is_empty() {
        return Err(DbError::InvalidCommand("0-length message rejected".into()));
    }
    Ok(())
}

/// Transport descriptor strings are case-insensitive; unknown strings
/// return `None` (§6 "External interfaces") — the caller must check.
pub fn descriptor_kind(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "mpi" => Some("mpi"),
        "tcp" => Some("tcp"),
        _ => None,
    }
}
