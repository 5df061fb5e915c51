//! Point-to-point transport over `tokio` TCP connections (§4.3).
//!
//! Wire framing per block: `[block_length:u32 LE][src_rank:i32 LE][kind:u8]
//! [payload...]`, where `block_length` covers everything after itself.
//! `kind` distinguishes application `Data` from the transport's own
//! `Barrier`/`Terminate` control frames — the RPC dispatcher never sees
//! anything but `Data` payloads.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Notify};

use crate::error::{DbError, DbResult};
use crate::transport::{reject_empty, PeerId, ReceiverFn, Transport};

const KIND_DATA: u8 = 0;
const KIND_BARRIER: u8 = 1;
const KIND_TERMINATE: u8 = 2;

enum SendCmd {
    Data(Vec<u8>),
    Control(u8, Vec<u8>),
    Flush(oneshot::Sender<()>),
}

struct Inbox {
    queues: Vec<Mutex<VecDeque<Vec<u8>>>>,
    cursor: AtomicU64,
    notify: Notify,
}

impl Inbox {
    fn new(num_peers: usize) -> Self {
        Inbox {
            queues: (0..num_peers).map(|_| Mutex::new(VecDeque::new())).collect(),
            cursor: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    fn push(&self, peer: PeerId, msg: Vec<u8>) {
        self.queues[peer].lock().push_back(msg);
        self.notify.notify_waiters();
    }

    /// Round-robin pop starting from the last-served peer.
    fn try_pop(&self) -> Option<(PeerId, Vec<u8>)> {
        let n = self.queues.len();
        if n == 0 {
            return None;
        }
        let start = (self.cursor.load(Ordering::Relaxed) as usize) % n;
        for i in 0..n {
            let idx = (start + i) % n;
            if let Some(msg) = self.queues[idx].lock().pop_front() {
                self.cursor.store((idx + 1) as u64, Ordering::Relaxed);
                return Some((idx, msg));
            }
        }
        None
    }
}

struct BarrierState {
    epoch: AtomicU64,
    arrived: Mutex<std::collections::HashSet<PeerId>>,
    notify: Notify,
}

/// Point-to-point transport: one outbound task per peer, one inbound
/// reader task per accepted/connected socket.
pub struct TcpTransport {
    rank: PeerId,
    size: usize,
    senders: Vec<mpsc::UnboundedSender<SendCmd>>,
    inbox: Arc<Inbox>,
    receiver: Mutex<Option<(ReceiverFn, bool)>>,
    dispatch_lock: Arc<tokio::sync::Mutex<()>>,
    barrier: Arc<BarrierState>,
}

impl TcpTransport {
    /// `peers[i]` is the listen address of rank `i`; `peers[rank]` is this
    /// process's own listen address, which `bind_addr` is bound to
    /// separately (it need not be reachable from itself).
    pub async fn connect(
        rank: PeerId,
        peers: Vec<SocketAddr>,
        bind_addr: SocketAddr,
    ) -> DbResult<Arc<Self>> {
        let size = peers.len();
        let inbox = Arc::new(Inbox::new(size));
        let barrier = Arc::new(BarrierState {
            epoch: AtomicU64::new(0),
            arrived: Mutex::new(std::collections::HashSet::new()),
            notify: Notify::new(),
        });
        let receiver: Mutex<Option<(ReceiverFn, bool)>> = Mutex::new(None);
        let dispatch_lock = Arc::new(tokio::sync::Mutex::new(()));

        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| DbError::Io(e.to_string()))?;

        // One connect-and-send task per peer (rank's own slot is unused).
        let mut senders = Vec::with_capacity(size);
        for (peer_rank, addr) in peers.iter().enumerate() {
            let (tx, rx) = mpsc::unbounded_channel::<SendCmd>();
            if peer_rank != rank {
                let addr = *addr;
                tokio::spawn(Self::send_loop(rank, addr, rx));
            } else {
                drop(rx);
            }
            senders.push(tx);
        }

        let transport = Arc::new(TcpTransport {
            rank,
            size,
            senders,
            inbox,
            receiver,
            dispatch_lock,
            barrier,
        });

        // Accept loop: every inbound connection is read by its own task.
        {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((socket, _addr)) => {
                            let transport = Arc::clone(&transport);
                            tokio::spawn(async move {
                                transport.read_loop(socket).await;
                            });
                        }
                        Err(_) => break,
                    }
                }
            });
        }

        Ok(transport)
    }

    async fn send_loop(
        rank: PeerId,
        addr: SocketAddr,
        mut rx: mpsc::UnboundedReceiver<SendCmd>,
    ) {
        let mut stream = loop {
            match TcpStream::connect(addr).await {
                Ok(s) => break s,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(100)).await,
            }
        };
        while let Some(cmd) = rx.recv().await {
            match cmd {
                SendCmd::Data(payload) => {
                    if Self::write_block(&mut stream, rank, KIND_DATA, &payload)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                SendCmd::Control(kind, payload) => {
                    if Self::write_block(&mut stream, rank, kind, &payload)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                SendCmd::Flush(ack) => {
                    let _ = stream.flush().await;
                    let _ = ack.send(());
                }
            }
        }
    }

    async fn write_block(
        stream: &mut TcpStream,
        src_rank: PeerId,
        kind: u8,
        payload: &[u8],
    ) -> DbResult<()> {
        let body_len = 4 + 1 + payload.len(); // src_rank + kind + payload
        let mut block = Vec::with_capacity(4 + body_len);
        block.extend_from_slice(&(body_len as u32).to_le_bytes());
        block.extend_from_slice(&(src_rank as i32).to_le_bytes());
        block.push(kind);
        block.extend_from_slice(payload);
        stream
            .write_all(&block)
            .await
            .map_err(|e| DbError::Io(e.to_string()))
    }

    async fn read_loop(self: Arc<Self>, mut stream: TcpStream) {
        loop {
            let mut len_buf = [0u8; 4];
            if stream.read_exact(&mut len_buf).await.is_err() {
                return;
            }
            let body_len = u32::from_le_bytes(len_buf) as usize;
            if body_len < 5 {
                return;
            }
            let mut rank_buf = [0u8; 4];
            if stream.read_exact(&mut rank_buf).await.is_err() {
                return;
            }
            let src_rank = i32::from_le_bytes(rank_buf) as usize;
            let mut kind_buf = [0u8; 1];
            if stream.read_exact(&mut kind_buf).await.is_err() {
                return;
            }
            let payload_len = body_len - 5;
            let mut payload = vec![0u8; payload_len];
            if payload_len > 0 && stream.read_exact(&mut payload).await.is_err() {
                return;
            }
            match kind_buf[0] {
                KIND_DATA => self.dispatch(src_rank, payload).await,
                KIND_BARRIER => {
                    let epoch = u64::from_le_bytes(payload[..8].try_into().unwrap());
                    self.on_barrier_arrival(epoch);
                }
                KIND_TERMINATE => return,
                _ => {}
            }
        }
    }

    async fn dispatch(&self, src: PeerId, payload: Vec<u8>) {
        let handler = self.receiver.lock().clone();
        match handler {
            Some((f, parallel)) => {
                if parallel {
                    f(src, &payload);
                } else {
                    let _guard = self.dispatch_lock.lock().await;
                    f(src, &payload);
                }
            }
            None => self.inbox.push(src, payload),
        }
    }

    fn on_barrier_arrival(&self, epoch: u64) {
        if epoch == self.barrier.epoch.load(Ordering::Acquire) {
            self.barrier.arrived.lock().insert(self.rank);
            self.barrier.notify.notify_waiters();
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, target: PeerId, bytes: &[u8]) -> DbResult<()> {
        reject_empty(bytes)?;
        self.senders[target]
            .send(SendCmd::Data(bytes.to_vec()))
            .map_err(|_| DbError::ServerUnreachable(format!("peer {target} send channel closed")))
    }

    async fn send_relinquish(&self, target: PeerId, bytes: Vec<u8>) -> DbResult<()> {
        reject_empty(&bytes)?;
        self.senders[target]
            .send(SendCmd::Data(bytes))
            .map_err(|_| DbError::ServerUnreachable(format!("peer {target} send channel closed")))
    }

    async fn flush(&self) -> DbResult<()> {
        let mut acks = Vec::new();
        for (peer, tx) in self.senders.iter().enumerate() {
            if peer == self.rank {
                continue;
            }
            let (ack_tx, ack_rx) = oneshot::channel();
            if tx.send(SendCmd::Flush(ack_tx)).is_ok() {
                acks.push(ack_rx);
            }
        }
        for ack in acks {
            let _ = ack.await;
        }
        Ok(())
    }

    async fn receive(&self) -> Option<(PeerId, Vec<u8>)> {
        self.inbox.try_pop()
    }

    fn register_receiver(&self, handler: ReceiverFn, parallel: bool) -> DbResult<()> {
        *self.receiver.lock() = Some((handler, parallel));
        Ok(())
    }

    async fn barrier(&self) -> DbResult<()> {
        let epoch = self.barrier.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        {
            let mut arrived = self.barrier.arrived.lock();
            arrived.clear();
            arrived.insert(self.rank);
        }
        let payload = epoch.to_le_bytes().to_vec();
        for (peer, tx) in self.senders.iter().enumerate() {
            if peer != self.rank {
                let _ = tx.send(SendCmd::Control(KIND_BARRIER, payload.clone()));
            }
        }
        loop {
            if self.barrier.arrived.lock().len() == self.size {
                return Ok(());
            }
            self.barrier.notify.notified().await;
        }
    }

    fn size(&self) -> usize {
        self.size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn has_efficient_send(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    async fn pair() -> (Arc<TcpTransport>, Arc<TcpTransport>) {
        let addr_a: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let addr_b: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener_a = TcpListener::bind(addr_a).await.unwrap();
        let a_addr = listener_a.local_addr().unwrap();
        drop(listener_a);
        let listener_b = TcpListener::bind(addr_b).await.unwrap();
        let b_addr = listener_b.local_addr().unwrap();
        drop(listener_b);

        let peers = vec![a_addr, b_addr];
        let a = TcpTransport::connect(0, peers.clone(), a_addr).await.unwrap();
        let b = TcpTransport::connect(1, peers, b_addr).await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn send_is_received_by_peer() {
        let (a, b) = pair().await;
        a.send(1, b"hello").await.unwrap();
        a.flush().await.unwrap();
        for _ in 0..200 {
            if let Some((src, msg)) = b.receive().await {
                assert_eq!(src, 0);
                assert_eq!(msg, b"hello");
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("message never arrived");
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (a, _b) = pair().await;
        assert!(a.send(1, b"").await.is_err());
    }

    #[tokio::test]
    async fn registered_receiver_gets_called_instead_of_queueing() {
        let (a, b) = pair().await;
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = Arc::clone(&counter);
        b.register_receiver(
            Arc::new(move |_src, _msg| {
                counter2.fetch_add(1, Ordering::SeqCst);
            }),
            false,
        )
        .unwrap();
        a.send(1, b"ping").await.unwrap();
        a.flush().await.unwrap();
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("receiver callback never fired");
    }

    #[tokio::test]
    async fn barrier_returns_after_both_peers_call_it() {
        let (a, b) = pair().await;
        let ba = tokio::spawn(async move { a.barrier().await });
        let bb = tokio::spawn(async move { b.barrier().await });
        ba.await.unwrap().unwrap();
        bb.await.unwrap().unwrap();
    }
}
