//! Persistence sidecar for the graph.
//!
//! `PersistentGraph` wraps the in-memory store so that every node and edge
//! mutation also queues a write-op towards a durable backend. Writes are
//! asynchronous and batched: a bounded channel feeds a single writer task
//! that flushes when the batch fills or a periodic ticker fires. When the
//! channel is full the op is dropped with a warning; the next full snapshot
//! repairs the gap. The in-memory graph stays the source of truth for the
//! process's lifetime; the backend only bootstraps the next one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::Graph;
use super::types::{Edge, EdgeType, Node, RefKey, Uid};
use super::GraphOps;

const WRITE_QUEUE_CAPACITY: usize = 1000;
const WRITE_BATCH_SIZE: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Durable key/value mirror of the graph. Nodes are persisted without their
/// adjacency maps; edges are stored independently and adjacency is rebuilt
/// on load.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    async fn save_node(&self, node: &Node) -> Result<()>;
    async fn delete_node(&self, uid: &Uid) -> Result<()>;
    async fn save_edge(&self, edge: &Edge) -> Result<()>;
    async fn delete_edge(&self, from: &Uid, to: &Uid) -> Result<()>;
    /// Read everything back for replay.
    async fn load_graph(&self) -> Result<(Vec<Node>, Vec<Edge>)>;
    /// Full snapshot: nodes plus the edges found in their outgoing maps.
    async fn save_graph(&self, nodes: &[Node]) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

#[derive(Debug)]
enum WriteOp {
    SaveNode(Box<Node>),
    DeleteNode(Uid),
    SaveEdge(Edge),
    DeleteEdge(Uid, Uid),
}

/// Graph store with a best-effort durable mirror.
pub struct PersistentGraph {
    graph: Graph,
    backend: Arc<dyn PersistenceBackend>,
    tx: Mutex<Option<mpsc::Sender<WriteOp>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl PersistentGraph {
    pub fn new(backend: Arc<dyn PersistenceBackend>) -> Self {
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let writer = tokio::spawn(write_loop(backend.clone(), rx));
        Self {
            graph: Graph::new(),
            backend,
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Replay the persisted graph: upsert every node (which rebuilds the
    /// secondary indexes), then re-create adjacency from the persisted
    /// edges.
    pub async fn load_from_backend(&self) -> Result<()> {
        let (nodes, edges) = self.backend.load_graph().await?;
        let (node_count, edge_count) = (nodes.len(), edges.len());
        for node in nodes {
            self.graph.upsert_node(node);
        }
        for edge in edges {
            self.graph.insert_edge(edge);
        }
        info!(nodes = node_count, edges = edge_count, "graph loaded from backend");
        Ok(())
    }

    /// Write a full snapshot of the in-memory graph to the backend.
    pub async fn snapshot(&self) -> Result<()> {
        let nodes = self.graph.all_nodes();
        let count = nodes.len();
        self.backend.save_graph(&nodes).await?;
        debug!(nodes = count, "snapshot written");
        Ok(())
    }

    /// Stop the writer, draining every queued op, then close the backend.
    pub async fn close(&self) -> Result<()> {
        // Dropping the sender lets the writer drain the channel and exit.
        self.tx.lock().take();
        let handle = self.writer.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.backend.close().await
    }

    fn enqueue(&self, op: WriteOp) {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return;
        };
        match tx.try_send(op) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("persistence queue full, dropping write (next snapshot will repair)");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

impl GraphOps for PersistentGraph {
    fn upsert_node(&self, node: Node) {
        let materialized = self.graph.upsert_node(node.clone());
        self.enqueue(WriteOp::SaveNode(Box::new(node)));
        for edge in materialized {
            self.enqueue(WriteOp::SaveEdge(edge));
        }
    }

    fn remove_node(&self, uid: &Uid) {
        self.graph.remove_node(uid);
        self.enqueue(WriteOp::DeleteNode(uid.clone()));
    }

    fn get_node(&self, uid: &Uid) -> Option<Node> {
        self.graph.get_node(uid)
    }

    fn add_edge(&self, edge_type: EdgeType, from: &Uid, to: &Uid) -> bool {
        let created = self.graph.add_edge(edge_type, from, to);
        if created {
            self.enqueue(WriteOp::SaveEdge(Edge::new(
                edge_type,
                from.clone(),
                to.clone(),
            )));
        }
        created
    }

    fn remove_edge(&self, from: &Uid, to: &Uid) {
        self.graph.remove_edge(from, to);
        self.enqueue(WriteOp::DeleteEdge(from.clone(), to.clone()));
    }

    fn add_pending_edge(&self, from: &Uid, target: RefKey, edge_type: EdgeType) {
        self.graph.add_pending_edge(from, target, edge_type);
    }

    fn add_reverse_pending_edge(&self, to: &Uid, source: RefKey, edge_type: EdgeType) {
        self.graph.add_reverse_pending_edge(to, source, edge_type);
    }

    fn nodes_by_namespace_kind(&self, namespace: &str, kind: &str) -> Vec<Node> {
        self.graph.nodes_by_namespace_kind(namespace, kind)
    }

    fn nodes_by_release(&self, release: &str) -> Vec<Node> {
        self.graph.nodes_by_release(release)
    }

    fn nodes_by_label_selector(&self, selector: &BTreeMap<String, String>) -> Vec<Node> {
        self.graph.nodes_by_label_selector(selector)
    }

    fn all_nodes(&self) -> Vec<Node> {
        self.graph.all_nodes()
    }

    fn all_releases(&self) -> Vec<String> {
        self.graph.all_releases()
    }

    fn all_charts(&self) -> Vec<String> {
        self.graph.all_charts()
    }

    fn node_count(&self) -> usize {
        self.graph.node_count()
    }
}

/// Single consumer of the write queue. Flushes when the batch reaches
/// `WRITE_BATCH_SIZE` or the periodic ticker fires; drains the rest when the
/// channel closes on shutdown.
async fn write_loop(backend: Arc<dyn PersistenceBackend>, mut rx: mpsc::Receiver<WriteOp>) {
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut batch: Vec<WriteOp> = Vec::with_capacity(WRITE_BATCH_SIZE);

    loop {
        tokio::select! {
            op = rx.recv() => match op {
                Some(op) => {
                    batch.push(op);
                    if batch.len() >= WRITE_BATCH_SIZE {
                        flush(backend.as_ref(), &mut batch).await;
                    }
                }
                None => {
                    flush(backend.as_ref(), &mut batch).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    flush(backend.as_ref(), &mut batch).await;
                }
            }
        }
    }
    debug!("persistence writer stopped");
}

async fn flush(backend: &dyn PersistenceBackend, batch: &mut Vec<WriteOp>) {
    let count = batch.len();
    for op in batch.drain(..) {
        let result = match op {
            WriteOp::SaveNode(node) => backend.save_node(&node).await,
            WriteOp::DeleteNode(uid) => backend.delete_node(&uid).await,
            WriteOp::SaveEdge(edge) => backend.save_edge(&edge).await,
            WriteOp::DeleteEdge(from, to) => backend.delete_edge(&from, &to).await,
        };
        if let Err(err) = result {
            warn!(%err, "persistence write failed");
        }
    }
    debug!(count, "flushed write batch");
}
