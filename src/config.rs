//! Server configuration (§6 "External interfaces").
//!
//! The config file is line-oriented UTF-8: the first non-blank line is a
//! whitespace-separated list whose final token is the Zookeeper path
//! prefix and whose preceding tokens are `host:port` Zookeeper hosts; the
//! second non-blank line is `NumShards`, which must be a perfect square.

use std::net::SocketAddr;
use std::path::Path;

use crate::error::{DbError, DbResult};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub zk_hosts: Vec<String>,
    pub zk_prefix: String,
    pub num_shards: u16,
}

impl ServerConfig {
    pub fn from_str(text: &str) -> DbResult<Self> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

        let first = lines
            .next()
            .ok_or_else(|| DbError::InvalidCommand("config file: missing zookeeper line".into()))?;
        let mut tokens: Vec<&str> = first.split_whitespace().collect();
        let zk_prefix = tokens
            .pop()
            .ok_or_else(|| DbError::InvalidCommand("config file: empty zookeeper line".into()))?
            .to_string();
        let zk_hosts = tokens
            .into_iter()
            .map(|t| strip_scheme(t).to_string())
            .collect();

        let second = lines
            .next()
            .ok_or_else(|| DbError::InvalidCommand("config file: missing NumShards line".into()))?;
        let num_shards: u16 = second
            .parse()
            .map_err(|_| DbError::InvalidCommand(format!("config file: '{second}' is not an integer")))?;
        let q = (num_shards as f64).sqrt().round() as u16;
        if q == 0 || q * q != num_shards {
            return Err(DbError::InvalidCommand(format!(
                "config file: NumShards {num_shards} is not a perfect square"
            )));
        }

        Ok(ServerConfig {
            zk_hosts,
            zk_prefix,
            num_shards,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> DbResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    pub fn zk_connect_string(&self) -> String {
        self.zk_hosts.join(",")
    }
}

/// Reads a fixed peer list for the transport mesh: one `host:port` per
/// line, line `i` is rank `i`'s bind address. The topology is fixed for
/// the process group's lifetime (§1 Non-goals), so every process in the
/// group — shard servers and client tools alike — loads the same file.
pub fn read_peer_list(path: impl AsRef<Path>) -> DbResult<Vec<SocketAddr>> {
    let text = std::fs::read_to_string(path)?;
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| {
            l.parse()
                .map_err(|e| DbError::InvalidCommand(format!("bad peer address '{l}': {e}")))
        })
        .collect()
}

/// Tolerates copy-pasted URLs in the hosts list even though the config
/// format only documents bare `host:port` pairs.
fn strip_scheme(s: &str) -> &str {
    s.strip_prefix("http://")
        .or_else(|| s.strip_prefix("https://"))
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_config() {
        let text = "zk1:2181 zk2:2181 /graphdb\n9\n";
        let cfg = ServerConfig::from_str(text).unwrap();
        assert_eq!(cfg.zk_hosts, vec!["zk1:2181", "zk2:2181"]);
        assert_eq!(cfg.zk_prefix, "/graphdb");
        assert_eq!(cfg.num_shards, 9);
    }

    #[test]
    fn ignores_blank_lines() {
        let text = "\n\n  zk1:2181 /graphdb  \n\n4\n";
        let cfg = ServerConfig::from_str(text).unwrap();
        assert_eq!(cfg.num_shards, 4);
    }

    #[test]
    fn rejects_non_perfect_square_shard_count() {
        let text = "zk1:2181 /graphdb\n5\n";
        assert!(ServerConfig::from_str(text).is_err());
    }

    #[test]
    fn strips_url_schemes_from_hosts() {
        let text = "http://zk1:2181 https://zk2:2181 /graphdb\n16\n";
        let cfg = ServerConfig::from_str(text).unwrap();
        assert_eq!(cfg.zk_hosts, vec!["zk1:2181", "zk2:2181"]);
    }

    #[test]
    fn missing_num_shards_line_errors() {
        assert!(ServerConfig::from_str("zk1:2181 /graphdb\n").is_err());
    }

    #[test]
    fn reads_peer_list_in_line_order() {
        let dir = std::env::temp_dir().join(format!("graphdb-peers-test-{}", std::process::id()));
        std::fs::write(&dir, "127.0.0.1:9000\n127.0.0.1:9001\n\n127.0.0.1:9002\n").unwrap();
        let peers = read_peer_list(&dir).unwrap();
        std::fs::remove_file(&dir).ok();
        assert_eq!(peers.len(), 3);
        assert_eq!(peers[1].port(), 9001);
    }
}
