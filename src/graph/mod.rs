//! The in-memory resource graph: data model, store, and the optional
//! persistence wrapper.

mod persistent;
mod store;
mod types;

pub use persistent::{PersistenceBackend, PersistentGraph};
pub use store::{namespace_key, Graph, CLUSTER_SCOPE_KEY};
pub use types::{
    node_from_meta, Edge, EdgeType, Node, ObjectReference, RefKey, ReplicaInfo, ResourceMetadata,
    ResourceStatus, Uid, HELM_CHART_ANNOTATION, HELM_RELEASE_ANNOTATION,
};

use std::collections::BTreeMap;

/// The graph operation set, shared by the plain in-memory store and its
/// persistence-mirroring wrapper so processors and the query layer do not
/// care which one they talk to.
pub trait GraphOps: Send + Sync {
    fn upsert_node(&self, node: Node);
    fn remove_node(&self, uid: &Uid);
    fn get_node(&self, uid: &Uid) -> Option<Node>;

    fn add_edge(&self, edge_type: EdgeType, from: &Uid, to: &Uid) -> bool;
    fn remove_edge(&self, from: &Uid, to: &Uid);
    fn add_pending_edge(&self, from: &Uid, target: RefKey, edge_type: EdgeType);
    fn add_reverse_pending_edge(&self, to: &Uid, source: RefKey, edge_type: EdgeType);

    fn nodes_by_namespace_kind(&self, namespace: &str, kind: &str) -> Vec<Node>;
    fn nodes_by_release(&self, release: &str) -> Vec<Node>;
    fn nodes_by_label_selector(&self, selector: &BTreeMap<String, String>) -> Vec<Node>;
    fn all_nodes(&self) -> Vec<Node>;
    fn all_releases(&self) -> Vec<String>;
    fn all_charts(&self) -> Vec<String>;
    fn node_count(&self) -> usize;
}

impl GraphOps for Graph {
    fn upsert_node(&self, node: Node) {
        Graph::upsert_node(self, node);
    }

    fn remove_node(&self, uid: &Uid) {
        Graph::remove_node(self, uid);
    }

    fn get_node(&self, uid: &Uid) -> Option<Node> {
        Graph::get_node(self, uid)
    }

    fn add_edge(&self, edge_type: EdgeType, from: &Uid, to: &Uid) -> bool {
        Graph::add_edge(self, edge_type, from, to)
    }

    fn remove_edge(&self, from: &Uid, to: &Uid) {
        Graph::remove_edge(self, from, to);
    }

    fn add_pending_edge(&self, from: &Uid, target: RefKey, edge_type: EdgeType) {
        Graph::add_pending_edge(self, from, target, edge_type);
    }

    fn add_reverse_pending_edge(&self, to: &Uid, source: RefKey, edge_type: EdgeType) {
        Graph::add_reverse_pending_edge(self, to, source, edge_type);
    }

    fn nodes_by_namespace_kind(&self, namespace: &str, kind: &str) -> Vec<Node> {
        Graph::nodes_by_namespace_kind(self, namespace, kind)
    }

    fn nodes_by_release(&self, release: &str) -> Vec<Node> {
        Graph::nodes_by_release(self, release)
    }

    fn nodes_by_label_selector(&self, selector: &BTreeMap<String, String>) -> Vec<Node> {
        Graph::nodes_by_label_selector(self, selector)
    }

    fn all_nodes(&self) -> Vec<Node> {
        Graph::all_nodes(self)
    }

    fn all_releases(&self) -> Vec<String> {
        Graph::all_releases(self)
    }

    fn all_charts(&self) -> Vec<String> {
        Graph::all_charts(self)
    }

    fn node_count(&self) -> usize {
        Graph::node_count(self)
    }
}
