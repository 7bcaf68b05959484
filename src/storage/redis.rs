//! Redis-backed persistence for the graph.
//!
//! Layout:
//! - `astrolabe:node:<uid>` — JSON node without adjacency maps
//! - `astrolabe:edge:<fromUID>:<toUID>` — JSON edge
//! - `astrolabe:index:ns-kind:<ns>:<kind>`, `astrolabe:index:helm-release:<release>`,
//!   `astrolabe:index:label:<key>:<value>` — sets of UIDs
//!
//! Cluster-scoped namespaces are encoded as the `_cluster` sentinel, the
//! same key the in-memory indexes use.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{info, warn};

use crate::graph::{namespace_key, Edge, Node, PersistenceBackend, Uid};

const NODE_KEY_PREFIX: &str = "astrolabe:node:";
const EDGE_KEY_PREFIX: &str = "astrolabe:edge:";
const NS_KIND_INDEX_PREFIX: &str = "astrolabe:index:ns-kind:";
const RELEASE_INDEX_PREFIX: &str = "astrolabe:index:helm-release:";
const LABEL_INDEX_PREFIX: &str = "astrolabe:index:label:";

const SCAN_PAGE_SIZE: usize = 100;

/// Redis mirror of the graph.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect and verify the backend with a PING.
    pub async fn connect(addr: &str, password: &str, db: i64) -> Result<Self> {
        let url = if password.is_empty() {
            format!("redis://{addr}/{db}")
        } else {
            format!("redis://:{password}@{addr}/{db}")
        };
        let client = redis::Client::open(url).context("invalid redis address")?;
        let mut conn = ConnectionManager::new(client)
            .await
            .context("connecting to redis")?;

        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .context("redis ping failed")?;
        info!(addr, db, "connected to redis");

        Ok(Self { conn })
    }

    fn node_key(uid: &Uid) -> String {
        format!("{NODE_KEY_PREFIX}{uid}")
    }

    fn edge_key(from: &Uid, to: &Uid) -> String {
        format!("{EDGE_KEY_PREFIX}{from}:{to}")
    }

    fn index_keys(node: &Node) -> Vec<String> {
        let mut keys = Vec::with_capacity(2 + node.labels.len());
        keys.push(format!(
            "{NS_KIND_INDEX_PREFIX}{}:{}",
            namespace_key(&node.namespace),
            node.kind
        ));
        if !node.release.is_empty() {
            keys.push(format!("{RELEASE_INDEX_PREFIX}{}", node.release));
        }
        for (key, value) in &node.labels {
            keys.push(format!("{LABEL_INDEX_PREFIX}{key}:{value}"));
        }
        keys
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_PAGE_SIZE)
                .query_async(&mut conn)
                .await
                .with_context(|| format!("scanning keys matching {pattern}"))?;
            keys.extend(page);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn delete_keys_by_pattern(&self, pattern: &str) -> Result<()> {
        let keys = self.scan_keys(pattern).await?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = conn.del(keys).await.context("deleting keys")?;
        Ok(())
    }

    async fn get_node(&self, uid: &Uid) -> Result<Option<Node>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn
            .get(Self::node_key(uid))
            .await
            .context("reading node")?;
        match data {
            Some(data) => Ok(Some(
                serde_json::from_str(&data).context("unmarshalling node")?,
            )),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PersistenceBackend for RedisStore {
    async fn save_node(&self, node: &Node) -> Result<()> {
        let data = serde_json::to_string(node).context("marshalling node")?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(Self::node_key(&node.uid), data)
            .await
            .context("saving node")?;

        for key in Self::index_keys(node) {
            let _: () = conn
                .sadd(key, node.uid.as_str())
                .await
                .context("updating index")?;
        }
        Ok(())
    }

    async fn delete_node(&self, uid: &Uid) -> Result<()> {
        // Fetch the stored node first so its index entries can be revoked.
        let Some(node) = self.get_node(uid).await? else {
            return Ok(());
        };

        let mut conn = self.conn.clone();
        let _: () = conn
            .del(Self::node_key(uid))
            .await
            .context("deleting node")?;
        for key in Self::index_keys(&node) {
            let _: () = conn
                .srem(key, uid.as_str())
                .await
                .context("updating index")?;
        }

        self.delete_keys_by_pattern(&format!("{EDGE_KEY_PREFIX}{uid}:*"))
            .await?;
        self.delete_keys_by_pattern(&format!("{EDGE_KEY_PREFIX}*:{uid}"))
            .await?;
        Ok(())
    }

    async fn save_edge(&self, edge: &Edge) -> Result<()> {
        let data = serde_json::to_string(edge).context("marshalling edge")?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(Self::edge_key(&edge.from, &edge.to), data)
            .await
            .context("saving edge")?;
        Ok(())
    }

    async fn delete_edge(&self, from: &Uid, to: &Uid) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(Self::edge_key(from, to))
            .await
            .context("deleting edge")?;
        Ok(())
    }

    async fn load_graph(&self) -> Result<(Vec<Node>, Vec<Edge>)> {
        let mut conn = self.conn.clone();

        let mut nodes = Vec::new();
        for key in self.scan_keys(&format!("{NODE_KEY_PREFIX}*")).await? {
            let data: Option<String> = conn.get(&key).await.context("reading node")?;
            let Some(data) = data else { continue };
            match serde_json::from_str::<Node>(&data) {
                Ok(node) => nodes.push(node),
                Err(err) => warn!(key, %err, "skipping unreadable node"),
            }
        }

        let mut edges = Vec::new();
        for key in self.scan_keys(&format!("{EDGE_KEY_PREFIX}*")).await? {
            let data: Option<String> = conn.get(&key).await.context("reading edge")?;
            let Some(data) = data else { continue };
            match serde_json::from_str::<Edge>(&data) {
                Ok(edge) => edges.push(edge),
                Err(err) => warn!(key, %err, "skipping unreadable edge"),
            }
        }

        info!(nodes = nodes.len(), edges = edges.len(), "loaded graph from redis");
        Ok((nodes, edges))
    }

    async fn save_graph(&self, nodes: &[Node]) -> Result<()> {
        let mut edge_count = 0usize;
        for node in nodes {
            if let Err(err) = self.save_node(node).await {
                warn!(uid = %node.uid, %err, "failed to snapshot node");
            }
            for edge in node.outgoing.values() {
                match self.save_edge(edge).await {
                    Ok(()) => edge_count += 1,
                    Err(err) => warn!(%err, "failed to snapshot edge"),
                }
            }
        }
        info!(nodes = nodes.len(), edges = edge_count, "saved graph to redis");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // The connection manager has no explicit shutdown; dropping it
        // closes the multiplexed connection.
        Ok(())
    }
}
