//! Persistence sidecar: async write mirroring, snapshot round-trips, and
//! replay, exercised against an in-memory backend.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use astrolabe::graph::{
    Edge, EdgeType, GraphOps, Node, PersistenceBackend, PersistentGraph, Uid,
};
use astrolabe::processors::{EventType, ProcessorRegistry};
use async_trait::async_trait;
use common::*;
use parking_lot::Mutex;

/// In-memory stand-in for the Redis backend.
#[derive(Default)]
struct MockBackend {
    nodes: Mutex<HashMap<Uid, Node>>,
    edges: Mutex<HashMap<(Uid, Uid), Edge>>,
}

#[async_trait]
impl PersistenceBackend for MockBackend {
    async fn save_node(&self, node: &Node) -> Result<()> {
        // Serialize through JSON like the real backend, which strips the
        // adjacency maps.
        let stored: Node = serde_json::from_str(&serde_json::to_string(node)?)?;
        self.nodes.lock().insert(node.uid.clone(), stored);
        Ok(())
    }

    async fn delete_node(&self, uid: &Uid) -> Result<()> {
        self.nodes.lock().remove(uid);
        self.edges
            .lock()
            .retain(|(from, to), _| from != uid && to != uid);
        Ok(())
    }

    async fn save_edge(&self, edge: &Edge) -> Result<()> {
        self.edges
            .lock()
            .insert((edge.from.clone(), edge.to.clone()), edge.clone());
        Ok(())
    }

    async fn delete_edge(&self, from: &Uid, to: &Uid) -> Result<()> {
        self.edges.lock().remove(&(from.clone(), to.clone()));
        Ok(())
    }

    async fn load_graph(&self) -> Result<(Vec<Node>, Vec<Edge>)> {
        Ok((
            self.nodes.lock().values().cloned().collect(),
            self.edges.lock().values().cloned().collect(),
        ))
    }

    async fn save_graph(&self, nodes: &[Node]) -> Result<()> {
        for node in nodes {
            self.save_node(node).await?;
            for edge in node.outgoing.values() {
                self.save_edge(edge).await?;
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn sample_node(uid: &str, name: &str, release: &str) -> Node {
    let meta = k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
        uid: Some(uid.to_string()),
        name: Some(name.to_string()),
        namespace: Some("demo".to_string()),
        resource_version: Some("7".to_string()),
        annotations: Some(std::collections::BTreeMap::from([(
            "meta.helm.sh/release-name".to_string(),
            release.to_string(),
        )])),
        ..Default::default()
    };
    astrolabe::graph::node_from_meta(&meta, "Deployment", "apps/v1").unwrap()
}

#[tokio::test]
async fn mutations_are_mirrored_on_close() {
    let backend = Arc::new(MockBackend::default());
    let graph = PersistentGraph::new(backend.clone());

    graph.upsert_node(sample_node("a", "web", "demo"));
    graph.upsert_node(sample_node("b", "api", "demo"));
    graph.add_edge(EdgeType::Owns, &Uid::from("a"), &Uid::from("b"));
    graph.remove_node(&Uid::from("b"));

    graph.close().await.unwrap();

    let nodes = backend.nodes.lock();
    assert!(nodes.contains_key(&Uid::from("a")));
    assert!(!nodes.contains_key(&Uid::from("b")));
    assert!(backend.edges.lock().is_empty());
}

#[tokio::test]
async fn node_round_trip_is_lossless_without_adjacency() {
    let backend = Arc::new(MockBackend::default());

    let mut node = sample_node("a", "web", "demo");
    node.status = astrolabe::graph::ResourceStatus::Error;
    node.status_message = "No replicas ready (0/3)".to_string();
    node.metadata = Some(astrolabe::graph::ResourceMetadata {
        image: Some("app:1.0".to_string()),
        replicas: Some(astrolabe::graph::ReplicaInfo {
            desired: 3,
            current: 0,
            ready: 0,
            available: 0,
        }),
        ..Default::default()
    });
    // Adjacency must not survive the round trip.
    node.outgoing.insert(
        Uid::from("x"),
        Edge::new(EdgeType::Owns, Uid::from("a"), Uid::from("x")),
    );

    backend.save_node(&node).await.unwrap();
    let (nodes, _) = backend.load_graph().await.unwrap();
    assert_eq!(nodes.len(), 1);

    let loaded = &nodes[0];
    assert!(loaded.outgoing.is_empty());
    let mut expected = node.clone();
    expected.outgoing.clear();
    assert_eq!(*loaded, expected);
}

#[tokio::test]
async fn replay_rebuilds_adjacency_and_indexes() {
    let backend = Arc::new(MockBackend::default());

    // Pre-populate the backend as a previous process would have left it.
    backend.save_node(&sample_node("a", "web", "demo")).await.unwrap();
    backend.save_node(&sample_node("b", "web-abc", "demo")).await.unwrap();
    backend
        .save_edge(&Edge::new(EdgeType::Owns, Uid::from("a"), Uid::from("b")))
        .await
        .unwrap();

    let graph = PersistentGraph::new(backend.clone());
    graph.load_from_backend().await.unwrap();

    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.nodes_by_release("demo").len(), 2);
    let a = graph.get_node(&Uid::from("a")).unwrap();
    assert_eq!(a.outgoing.get(&Uid::from("b")).unwrap().edge_type, EdgeType::Owns);
    let b = graph.get_node(&Uid::from("b")).unwrap();
    assert!(b.incoming.contains_key(&Uid::from("a")));

    graph.close().await.unwrap();
}

#[tokio::test]
async fn pending_edges_materialized_during_upsert_are_persisted() {
    let backend = Arc::new(MockBackend::default());
    let graph = Arc::new(PersistentGraph::new(backend.clone()));
    let registry = ProcessorRegistry::new(graph.clone());

    // Pod arrives before its owner; the ownership edge is created while
    // upserting the ReplicaSet and must reach the backend.
    registry.process(
        "Pod",
        &pod(
            with_owner(meta("p", "demo", "web-1"), "r", "ReplicaSet", "web-abc"),
            "Running",
        ),
        EventType::Applied,
    );
    registry.process(
        "ReplicaSet",
        &replica_set(meta("r", "demo", "web-abc"), 1, 1, 1),
        EventType::Applied,
    );

    graph.close().await.unwrap();

    let edges = backend.edges.lock();
    let edge = edges
        .get(&(Uid::from("r"), Uid::from("p")))
        .expect("materialized ownership edge is mirrored");
    assert_eq!(edge.edge_type, EdgeType::Owns);
}

#[tokio::test]
async fn snapshot_writes_the_whole_graph() {
    let backend = Arc::new(MockBackend::default());
    let graph = PersistentGraph::new(backend.clone());

    graph.upsert_node(sample_node("a", "web", "demo"));
    graph.upsert_node(sample_node("b", "web-abc", "demo"));
    graph.add_edge(EdgeType::Owns, &Uid::from("a"), &Uid::from("b"));

    graph.snapshot().await.unwrap();

    assert_eq!(backend.nodes.lock().len(), 2);
    assert_eq!(backend.edges.lock().len(), 1);
    graph.close().await.unwrap();
}
