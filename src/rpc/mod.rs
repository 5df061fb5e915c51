//! RPC dispatcher (§4.4): a 2-byte message-id prefix demultiplexed through a
//! fixed table of handlers, plus a pool of reusable serialization buffers so
//! a busy shard server isn't allocating on every reply.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crossbeam_queue::ArrayQueue;
use dashmap::DashMap;

use crate::error::DbResult;
use crate::transport::{PeerId, Transport};

pub type MessageId = u16;

/// Installed once per id via `register_handler`; receives the peer that
/// sent the message and the payload with the id already stripped.
pub type HandlerFn = Arc<dyn Fn(PeerId, Bytes) + Send + Sync>;

const POOL_CAPACITY: usize = 64;
const DEFAULT_BUILDER_CAPACITY: usize = 256;

/// A borrowed, pre-tagged buffer returned by `prepare_message`. Field data
/// is appended with the wire codec (`crate::codec`) before handing it to
/// `complete_message`.
pub struct MessageBuilder {
    buf: BytesMut,
}

impl MessageBuilder {
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    handlers: DashMap<MessageId, HandlerFn>,
    pool: ArrayQueue<BytesMut>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Dispatcher {
            transport,
            handlers: DashMap::new(),
            pool: ArrayQueue::new(POOL_CAPACITY),
        })
    }

    /// Registering the same id twice is a contract violation, not a
    /// recoverable error (§4.4) — it means two components raced to claim
    /// the same message id at startup.
    pub fn register_handler(&self, id: MessageId, handler: HandlerFn) {
        if self.handlers.insert(id, handler).is_some() {
            panic!("rpc: handler for message id {id} already registered");
        }
    }

    /// Wires the transport's push-style `register_receiver` to this
    /// dispatcher's handler table. Must be called exactly once, after every
    /// handler this process will ever receive has been registered.
    pub fn start(self: &Arc<Self>, parallel: bool) -> DbResult<()> {
        let this = Arc::clone(self);
        self.transport.register_receiver(
            Arc::new(move |peer, bytes| this.dispatch(peer, bytes)),
            parallel,
        )
    }

    fn dispatch(&self, peer: PeerId, bytes: &[u8]) {
        if bytes.len() < 2 {
            tracing::warn!(peer, len = bytes.len(), "rpc: short message, dropping");
            return;
        }
        let id = u16::from_le_bytes([bytes[0], bytes[1]]);
        let payload = Bytes::copy_from_slice(&bytes[2..]);
        match self.handlers.get(&id) {
            Some(handler) => handler(peer, payload),
            None => tracing::warn!(peer, id, "rpc: no handler registered for message id"),
        }
    }

    /// Convenience one-shot send: allocates a temporary buffer, prepends
    /// the 2-byte id, hands it straight to the transport.
    pub async fn send_message(&self, peer: PeerId, id: MessageId, payload: &[u8]) -> DbResult<()> {
        let mut buf = Vec::with_capacity(2 + payload.len());
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(payload);
        self.transport.send_relinquish(peer, buf).await
    }

    /// Borrows a builder from the pool (or allocates a transient one when
    /// the pool is empty) and pre-writes the message id.
    pub fn prepare_message(&self, id: MessageId) -> MessageBuilder {
        let mut buf = self
            .pool
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(DEFAULT_BUILDER_CAPACITY));
        buf.clear();
        buf.put_u16_le(id);
        MessageBuilder { buf }
    }

    /// Sends the builder's contents. When the transport copies on `send`
    /// (`has_efficient_send() == true`) the buffer is cleared and returned
    /// to the pool for reuse; otherwise it is hand off via
    /// `send_relinquish` and not recycled.
    pub async fn complete_message(&self, peer: PeerId, mut builder: MessageBuilder) -> DbResult<()> {
        if self.transport.has_efficient_send() {
            self.transport.send(peer, &builder.buf).await?;
            builder.buf.clear();
            let _ = self.pool.push(builder.buf);
        } else {
            let bytes = std::mem::take(&mut builder.buf).to_vec();
            self.transport.send_relinquish(peer, bytes).await?;
        }
        Ok(())
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

/// Strips the leading `[message_id:u16]` and returns `(id, remaining)` — a
/// convenience for call sites that already hold a `Bytes` (e.g. replies
/// read straight off a oneshot channel) instead of going through
/// `Dispatcher::dispatch`.
pub fn split_message_id(mut bytes: Bytes) -> Option<(MessageId, Bytes)> {
    if bytes.len() < 2 {
        return None;
    }
    let id = bytes.get_u16_le();
    Some((id, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tcp::TcpTransport;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::TcpListener;

    async fn pair() -> (Arc<TcpTransport>, Arc<TcpTransport>) {
        let l1 = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let a1 = l1.local_addr().unwrap();
        drop(l1);
        let l2 = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let a2 = l2.local_addr().unwrap();
        drop(l2);
        let peers: Vec<SocketAddr> = vec![a1, a2];
        let a = TcpTransport::connect(0, peers.clone(), a1).await.unwrap();
        let b = TcpTransport::connect(1, peers, a2).await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn registering_same_id_twice_panics() {
        let (a, _b) = pair().await;
        let dispatcher = Dispatcher::new(a);
        dispatcher.register_handler(7, Arc::new(|_, _| {}));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            dispatcher.register_handler(7, Arc::new(|_, _| {}));
        }));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn send_message_reaches_registered_handler() {
        let (a, b) = pair().await;
        let dispatcher_b = Dispatcher::new(b);
        let counter = Arc::new(AtomicU32::new(0));
        let counter2 = Arc::clone(&counter);
        dispatcher_b.register_handler(
            42,
            Arc::new(move |_peer, payload| {
                assert_eq!(&payload[..], b"abc");
                counter2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        dispatcher_b.start(false).unwrap();

        let dispatcher_a = Dispatcher::new(a);
        dispatcher_a.send_message(1, 42, b"abc").await.unwrap();
        dispatcher_a.transport().flush().await.unwrap();

        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("handler never invoked");
    }

    #[tokio::test]
    async fn prepare_and_complete_message_round_trip_id() {
        let (a, b) = pair().await;
        let dispatcher_b = Dispatcher::new(b);
        let received = Arc::new(AtomicU32::new(0));
        let received2 = Arc::clone(&received);
        dispatcher_b.register_handler(
            9,
            Arc::new(move |_peer, payload| {
                assert_eq!(&payload[..], &[1, 2, 3]);
                received2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        dispatcher_b.start(false).unwrap();

        let dispatcher_a = Dispatcher::new(a);
        let mut builder = dispatcher_a.prepare_message(9);
        builder.buf_mut().extend_from_slice(&[1, 2, 3]);
        dispatcher_a.complete_message(1, builder).await.unwrap();
        dispatcher_a.transport().flush().await.unwrap();

        for _ in 0..200 {
            if received.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("handler never invoked");
    }
}
