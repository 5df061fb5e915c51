use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use graphdb::config::{read_peer_list, ServerConfig};
use graphdb::rpc::Dispatcher;
use graphdb::shard::ShardServer;
use graphdb::transport::mpi::MpiTransport;
use graphdb::transport::tcp::TcpTransport;
use graphdb::transport::{descriptor_kind, Transport};

#[derive(Parser, Debug)]
#[command(name = "graphdb")]
#[command(about = "A sharded, in-memory distributed graph database shard server", long_about = None)]
struct Args {
    /// Server configuration file (§6): zookeeper hosts/prefix line, NumShards line.
    #[arg(long, default_value = "./graphdb.conf")]
    config: PathBuf,

    /// This process's shard id. Shard id and transport rank are the same
    /// number: `peers` line `shard_id` is this process's own bind address.
    #[arg(long)]
    shard_id: u16,

    /// Fixed peer list for the whole process group (shards and client
    /// tools alike): one `host:port` per line, line `i` is rank `i`.
    #[arg(long)]
    peers: PathBuf,

    /// Address this process listens on (must match its own line in `peers`).
    #[arg(long)]
    bind: SocketAddr,

    /// Transport descriptor: "tcp" or "mpi" (§6).
    #[arg(long, default_value = "tcp")]
    transport: String,
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graphdb=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let kind = descriptor_kind(&args.transport)
        .ok_or_else(|| anyhow::anyhow!("unknown transport descriptor '{}'", args.transport))?;

    let config = ServerConfig::from_file(&args.config)?;
    graphdb::ShardManager::new(config.num_shards)?; // validates the grid invariant early
    if args.shard_id >= config.num_shards {
        anyhow::bail!(
            "shard-id {} out of range for NumShards {}",
            args.shard_id,
            config.num_shards
        );
    }

    let peers = read_peer_list(&args.peers)?;
    register_in_membership_directory(&config, args.shard_id, args.bind)?;

    tracing::info!(shard_id = args.shard_id, bind = %args.bind, transport = kind, "starting shard server");

    let tcp = TcpTransport::connect(args.shard_id as usize, peers, args.bind).await?;
    let transport: Arc<dyn Transport> = match kind {
        "mpi" => MpiTransport::new(tcp),
        _ => tcp,
    };

    let dispatcher = Dispatcher::new(transport);
    let server = ShardServer::new(args.shard_id);
    server.install(Arc::clone(&dispatcher));
    dispatcher.start(true)?;

    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    Ok(())
}

/// Registers this shard under its `ShardId` (§6 "Shard naming convention
/// in Zookeeper") so `graphdb_admin` and other operator tooling can look
/// shards up by name. Orthogonal to the fixed `--peers` transport mesh
/// above — a registration failure here is logged, not fatal, since the
/// shard server is fully functional without it.
fn register_in_membership_directory(config: &ServerConfig, shard_id: u16, bind: SocketAddr) -> anyhow::Result<()> {
    #[cfg(feature = "zookeeper-membership")]
    {
        if !config.zk_hosts.is_empty() {
            use graphdb::membership::{zk::ZkMembershipStore, MembershipStore};
            match ZkMembershipStore::connect(&config.zk_connect_string(), config.zk_prefix.clone()) {
                Ok(store) => {
                    if let Err(e) = store.register(shard_id, bind.to_string()) {
                        tracing::warn!(error = %e, "failed to register shard in zookeeper");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to connect to zookeeper for shard registration"),
            }
            return Ok(());
        }
    }
    let _ = (config, shard_id, bind);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
