//! Minimal synchronous pagerank loop (§15): one gather/apply iteration per
//! pass over an explicit vertex universe, built entirely on `GraphClient`'s
//! public primitives. Grounded on `pagerank_server.hpp`'s
//! initialize/run_iter shape (uniform initial rank, gather weighted
//! neighbor contributions, apply, repeat) — this is a demo consumer of the
//! client API, not a general-purpose computation engine.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use graphdb::config::read_peer_list;
use graphdb::rpc::Dispatcher;
use graphdb::transport::mpi::MpiTransport;
use graphdb::transport::tcp::TcpTransport;
use graphdb::transport::{descriptor_kind, Transport};
use graphdb::value::{FieldType, FieldValue};
use graphdb::{DbError, Direction, GraphClient, ShardManager, VertexId};

const RANK_FIELD: graphdb::FieldId = 0;
const DAMPING: f64 = 0.85;

#[derive(Parser, Debug)]
#[command(name = "graphdb_pagerank")]
#[command(about = "Runs a few synchronous pagerank iterations over an explicit vertex set", long_about = None)]
struct Args {
    /// One vertex id per line; the universe this demo iterates over (there
    /// is no cluster-wide vertex enumeration primitive in the client API).
    vertices_file: PathBuf,

    #[arg(long, default_value_t = 10)]
    iterations: u32,

    #[arg(long)]
    num_shards: u16,

    #[arg(long)]
    rank: usize,

    #[arg(long)]
    peers: PathBuf,

    #[arg(long)]
    bind: SocketAddr,

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

    let vertices = read_vertex_list(&args.vertices_file)?;
    ensure_rank_field(&client).await?;
    initialize(&client, &vertices).await?;

    for iter in 0..args.iterations {
        let changed = run_iteration(&client, &vertices).await?;
        tracing::info!(iter, total_rank_delta = changed, "pagerank iteration complete");
    }

    for v in &vertices {
        let row = client.get_vertex(*v).await?;
        if let Some(field) = row.field(RANK_FIELD) {
            if let Some(FieldValue::DoubleF64(rank)) = field.value() {
                println!("{v}\t{rank:.6}");
            }
        }
    }
    Ok(())
}

fn read_vertex_list(path: &PathBuf) -> anyhow::Result<Vec<VertexId>> {
    let text = std::fs::read_to_string(path)?;
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.parse::<VertexId>().map_err(|e| anyhow::anyhow!("bad vertex id '{l}': {e}")))
        .collect()
}

/// Adds the rank field if it doesn't already exist; a `Duplicate` from a
/// prior run (or a sibling process racing the same broadcast) is fine.
async fn ensure_rank_field(client: &GraphClient) -> anyhow::Result<()> {
    match client.add_vertex_field("pagerank".into(), FieldType::DoubleF64, false).await {
        Ok(_) => Ok(()),
        Err(DbError::Duplicate(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn initialize(client: &GraphClient, vertices: &[VertexId]) -> anyhow::Result<()> {
    let initial = 1.0 / vertices.len().max(1) as f64;
    for v in vertices {
        client
            .set_vertex_field(*v, RANK_FIELD, FieldValue::DoubleF64(initial), false)
            .await?;
    }
    Ok(())
}

/// One gather/apply pass: snapshots every vertex's current rank and every
/// vertex's out-degree first, so the gather step never reads a rank that
/// this same iteration already overwrote; returns the total absolute
/// change applied, for a crude convergence signal.
async fn run_iteration(client: &GraphClient, vertices: &[VertexId]) -> anyhow::Result<f64> {
    let mut rank = HashMap::with_capacity(vertices.len());
    let mut out_degree = HashMap::with_capacity(vertices.len());
    for v in vertices {
        let row = client.get_vertex(*v).await?;
        let pr = match row.field(RANK_FIELD).and_then(|f| f.value()) {
            Some(FieldValue::DoubleF64(pr)) => pr,
            _ => 0.0,
        };
        rank.insert(*v, pr);
        let out = client.get_vertex_adj(*v, Direction::Outgoing).await?;
        out_degree.insert(*v, out.len());
    }

    let n = vertices.len().max(1) as f64;
    let mut total_delta = 0.0;
    for v in vertices {
        let incoming = client.get_vertex_adj(*v, Direction::Incoming).await?;
        let mut acc = 0.0;
        for (src, _edge_id) in incoming {
            let src_rank = rank.get(&src).copied().unwrap_or(0.0);
            let src_out = *out_degree.get(&src).unwrap_or(&0);
            if src_out > 0 {
                acc += src_rank / src_out as f64;
            }
        }
        let new_rank = (1.0 - DAMPING) / n + DAMPING * acc;
        total_delta += (new_rank - rank[v]).abs();
        client
            .set_vertex_field(*v, RANK_FIELD, FieldValue::DoubleF64(new_rank), false)
            .await?;
    }
    Ok(total_delta)
}
