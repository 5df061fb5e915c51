//! Ingress loader CLI: streams an edge-list file into a running cluster
//! through `graphdb::ingress::Loader` (§4.10, §16).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use graphdb::config::read_peer_list;
use graphdb::ingress::{Format, Loader};
use graphdb::rpc::Dispatcher;
use graphdb::transport::mpi::MpiTransport;
use graphdb::transport::tcp::TcpTransport;
use graphdb::transport::{descriptor_kind, Transport};
use graphdb::{GraphClient, ShardManager};

#[derive(Parser, Debug)]
#[command(name = "graphdb_load")]
#[command(about = "Streams an edge-list file into a graphdb cluster", long_about = None)]
struct Args {
    /// Edge-list file to load.
    file: PathBuf,

    /// Line format: snap, tsv, or adj (§4.10).
    #[arg(long, default_value = "snap")]
    format: String,

    /// Input is gzip-compressed.
    #[arg(long)]
    gzip: bool,

    /// Parallel parse/flush worker count.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Total number of shards (must match the running cluster's NumShards).
    #[arg(long)]
    num_shards: u16,

    /// This process's rank in the fixed peer list (any rank `>= num_shards`).
    #[arg(long)]
    rank: usize,

    /// Fixed peer list: one `host:port` per line, line `i` is rank `i`.
    #[arg(long)]
    peers: PathBuf,

    /// Address this process listens on.
    #[arg(long)]
    bind: SocketAddr,

    /// Transport descriptor: "tcp" or "mpi".
    #[arg(long, default_value = "tcp")]
    transport: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graphdb=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let format = Format::parse_name(&args.format)?;
    let kind = descriptor_kind(&args.transport)
        .ok_or_else(|| anyhow::anyhow!("unknown transport descriptor '{}'", args.transport))?;

    let peers = read_peer_list(&args.peers)?;
    let tcp = TcpTransport::connect(args.rank, peers, args.bind).await?;
    let transport: Arc<dyn Transport> = match kind {
        "mpi" => MpiTransport::new(tcp),
        _ => tcp,
    };

    let dispatcher = Dispatcher::new(transport);
    dispatcher.start(true)?;
    let manager = Arc::new(ShardManager::new(args.num_shards)?);
    let client = GraphClient::new(dispatcher, manager);

    let loader = Loader::new(args.workers)?;
    let (loaded, errors) = loader.load_file(&args.file, format, args.gzip, client).await?;
    tracing::info!(loaded, errors, file = %args.file.display(), "load complete");
    println!("loaded {loaded} edges, {errors} lines/edges rejected");
    Ok(())
}
