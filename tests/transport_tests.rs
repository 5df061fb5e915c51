//! Transport-layer property tests (§8 properties 3, 4, and scenario S6)
//! exercised over real loopback TCP sockets between two ranks.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use graphdb::transport::tcp::TcpTransport;
use graphdb::transport::Transport;

async fn pair() -> (Arc<TcpTransport>, Arc<TcpTransport>) {
    let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let a_addr = listener_a.local_addr().unwrap();
    drop(listener_a);
    let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let b_addr = listener_b.local_addr().unwrap();
    drop(listener_b);

    let peers: Vec<SocketAddr> = vec![a_addr, b_addr];
    let a = TcpTransport::connect(0, peers.clone(), a_addr).await.unwrap();
    let b = TcpTransport::connect(1, peers, b_addr).await.unwrap();
    (a, b)
}

async fn drain(t: &TcpTransport, expect: usize) -> Vec<Vec<u8>> {
    let mut out = Vec::with_capacity(expect);
    for _ in 0..500 {
        while let Some((_, msg)) = t.receive().await {
            out.push(msg);
        }
        if out.len() >= expect {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    out
}

/// Property 3: within one (sender, receiver) pair, messages arrive in the
/// order the sender issued them.
#[tokio::test]
async fn per_pair_order_is_preserved() {
    let (a, b) = pair().await;
    for i in 0..50u32 {
        a.send(1, &i.to_le_bytes()).await.unwrap();
    }
    a.flush().await.unwrap();
    let received = drain(&b, 50).await;
    assert_eq!(received.len(), 50);
    for (i, msg) in received.iter().enumerate() {
        assert_eq!(u32::from_le_bytes(msg.as_slice().try_into().unwrap()), i as u32);
    }
}

/// Property 4: `flush` with no new sends in between is a no-op you can call
/// repeatedly without it blocking or duplicating anything already sent.
#[tokio::test]
async fn flush_is_idempotent_with_no_new_sends() {
    let (a, b) = pair().await;
    a.send(1, b"once").await.unwrap();
    a.flush().await.unwrap();
    a.flush().await.unwrap();
    a.flush().await.unwrap();
    let received = drain(&b, 1).await;
    assert_eq!(received, vec![b"once".to_vec()]);
}

/// S6: repeated barriers return in bounded time and don't let one peer
/// race ahead of the other across rounds.
#[tokio::test]
async fn repeated_barriers_stay_in_lockstep() {
    let (a, b) = pair().await;
    for _ in 0..25 {
        let ba = tokio::spawn({
            let a = Arc::clone(&a);
            async move { a.barrier().await }
        });
        let bb = tokio::spawn({
            let b = Arc::clone(&b);
            async move { b.barrier().await }
        });
        ba.await.unwrap().unwrap();
        bb.await.unwrap().unwrap();
    }
}

/// S5 (smoke): a range of buffer sizes round-trip with identical bytes.
#[tokio::test]
async fn varied_message_sizes_round_trip_exactly() {
    let (a, b) = pair().await;
    let sizes: Vec<usize> = (0..10).map(|k| 1usize << k).collect();
    for &size in &sizes {
        let payload = vec![0xABu8; size];
        a.send(1, &payload).await.unwrap();
    }
    a.flush().await.unwrap();
    let received = drain(&b, sizes.len()).await;
    assert_eq!(received.len(), sizes.len());
    for (payload, size) in received.iter().zip(sizes.iter()) {
        assert_eq!(payload.len(), *size);
        assert!(payload.iter().all(|&b| b == 0xAB));
    }
}
