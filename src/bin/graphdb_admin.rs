//! Cluster admin CLI (§6 "CLI surface"): `start` launches one shard-server
//! child process per shard and drops into an interactive `l`/`s <name>`/`q`
//! loop managing them; `reset` broadcasts `ADMIN/RESET`. Grounded on the
//! teacher's `cli::tui`/`solidb-repl` `rustyline`/`colored` REPL shape.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use graphdb::config::{read_peer_list, ServerConfig};
use graphdb::rpc::Dispatcher;
use graphdb::transport::mpi::MpiTransport;
use graphdb::transport::tcp::TcpTransport;
use graphdb::transport::{descriptor_kind, Transport};
use graphdb::{GraphClient, ShardManager};

#[derive(Parser, Debug)]
#[command(name = "graphdb_admin")]
#[command(about = "Launches and manages a graphdb shard cluster", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: AdminCommand,
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    /// Launches one shard-server process per shard, then manages them
    /// interactively (`l` list, `s <name>` stop, `q` quit).
    Start {
        server_binary: PathBuf,
        #[arg(long, default_value = "./graphdb.conf")]
        config: PathBuf,
        #[arg(long)]
        peers: PathBuf,
        #[arg(long, default_value = "tcp")]
        transport: String,
    },
    /// Broadcasts `ADMIN/RESET` to every shard.
    Reset {
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
    },
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
    match args.command {
        AdminCommand::Start {
            server_binary,
            config,
            peers,
            transport,
        } => run_start(server_binary, config, peers, transport).await,
        AdminCommand::Reset {
            num_shards,
            rank,
            peers,
            bind,
            transport,
        } => run_reset(num_shards, rank, peers, bind, transport).await,
    }
}

async fn run_reset(
    num_shards: u16,
    rank: usize,
    peers: PathBuf,
    bind: SocketAddr,
    transport: String,
) -> anyhow::Result<()> {
    let kind = descriptor_kind(&transport)
        .ok_or_else(|| anyhow::anyhow!("unknown transport descriptor '{transport}'"))?;
    let peer_list = read_peer_list(&peers)?;
    let tcp = TcpTransport::connect(rank, peer_list, bind).await?;
    let transport: Arc<dyn Transport> = match kind {
        "mpi" => MpiTransport::new(tcp),
        _ => tcp,
    };
    let dispatcher = Dispatcher::new(transport);
    dispatcher.start(true)?;
    let manager = Arc::new(ShardManager::new(num_shards)?);
    let client = GraphClient::new(dispatcher, manager);
    client.reset().await?;
    println!("{}", "reset broadcast to every shard".green());
    Ok(())
}

async fn run_start(
    server_binary: PathBuf,
    config_path: PathBuf,
    peers_path: PathBuf,
    transport: String,
) -> anyhow::Result<()> {
    let config = ServerConfig::from_file(&config_path)?;
    let peers = read_peer_list(&peers_path)?;
    if (peers.len() as u16) < config.num_shards {
        anyhow::bail!(
            "peers file has {} addresses, need at least NumShards={}",
            peers.len(),
            config.num_shards
        );
    }

    // Shard naming convention (§6): each managed process is named the
    // decimal string of its ShardId.
    let mut managed: HashMap<String, Child> = HashMap::new();
    for shard_id in 0..config.num_shards {
        let bind = peers[shard_id as usize];
        let child = Command::new(&server_binary)
            .arg("--config")
            .arg(&config_path)
            .arg("--shard-id")
            .arg(shard_id.to_string())
            .arg("--peers")
            .arg(&peers_path)
            .arg("--bind")
            .arg(bind.to_string())
            .arg("--transport")
            .arg(&transport)
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to launch shard {shard_id}: {e}"))?;
        println!(
            "{} shard {} (pid {}) on {}",
            "started".green(),
            shard_id,
            child.id(),
            bind
        );
        managed.insert(shard_id.to_string(), child);
    }

    run_repl(managed)
}

fn run_repl(mut managed: HashMap<String, Child>) -> anyhow::Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history_file = std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".graphdb_admin_history"))
        .unwrap_or_else(|_| PathBuf::from(".graphdb_admin_history"));
    let _ = rl.load_history(&history_file);

    loop {
        match rl.readline("graphdb> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);
                let mut parts = line.splitn(2, ' ');
                match parts.next().unwrap_or("") {
                    "l" => {
                        if managed.is_empty() {
                            println!("{}", "no managed shards".dimmed());
                        }
                        let mut names: Vec<&String> = managed.keys().collect();
                        names.sort();
                        for name in names {
                            println!("  shard {} (pid {})", name, managed[name].id());
                        }
                    }
                    "s" => match parts.next().map(str::trim) {
                        Some(name) if !name.is_empty() => match managed.remove(name) {
                            Some(mut child) => {
                                let _ = child.kill();
                                let _ = child.wait();
                                println!("{} shard {}", "stopped managing".yellow(), name);
                            }
                            None => println!("{} no such shard: {}", "error:".red(), name),
                        },
                        _ => println!("{}", "usage: s <name>".yellow()),
                    },
                    "q" => break,
                    other => println!("{} unknown command: {}", "error:".red(), other),
                }
            }
            Err(ReadlineError::Interrupted) => println!("{}", "type q to quit".dimmed()),
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("{} {err:?}", "error:".red());
                break;
            }
        }
    }

    for (name, mut child) in managed {
        let _ = child.kill();
        let _ = child.wait();
        println!("{} shard {}", "stopped".dimmed(), name);
    }
    let _ = rl.save_history(&history_file);
    Ok(())
}
