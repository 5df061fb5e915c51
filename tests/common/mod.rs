//! Shared test helpers: spins up a small real cluster (one `TcpTransport`
//! per shard plus one for the client) over loopback TCP so integration
//! tests exercise the actual wire path instead of calling `Shard` directly.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use graphdb::rpc::Dispatcher;
use graphdb::shard::ShardServer;
use graphdb::transport::tcp::TcpTransport;
use graphdb::{GraphClient, ShardManager};

static NEXT_PORT: AtomicU16 = AtomicU16::new(19200);

fn reserve_ports(count: u16) -> u16 {
    NEXT_PORT.fetch_add(count, Ordering::Relaxed)
}

/// Starts `num_shards` shard servers and one `GraphClient`, each its own
/// rank in a shared loopback peer list (client rank = `num_shards`).
pub async fn spawn_cluster(num_shards: u16) -> Arc<GraphClient> {
    let base = reserve_ports(num_shards + 1);
    let peers: Vec<SocketAddr> = (0..=num_shards)
        .map(|i| format!("127.0.0.1:{}", base + i).parse().unwrap())
        .collect();

    for shard_id in 0..num_shards {
        let bind = peers[shard_id as usize];
        let transport = TcpTransport::connect(shard_id as usize, peers.clone(), bind)
            .await
            .expect("shard transport binds");
        let dispatcher = Dispatcher::new(transport);
        let server = ShardServer::new(shard_id);
        server.install(Arc::clone(&dispatcher));
        dispatcher.start(true).expect("dispatcher starts");
    }

    let client_rank = num_shards as usize;
    let bind = peers[client_rank];
    let transport = TcpTransport::connect(client_rank, peers, bind)
        .await
        .expect("client transport binds");
    let dispatcher = Dispatcher::new(transport);
    dispatcher.start(true).expect("dispatcher starts");
    let manager = Arc::new(ShardManager::new(num_shards).expect("num_shards is a perfect square"));
    GraphClient::new(dispatcher, manager)
}
