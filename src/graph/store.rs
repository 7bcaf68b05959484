//! The in-memory graph store.
//!
//! A single reader-writer lock guards all state: the node map, the secondary
//! indexes, and the pending-edge tables. Every mutation takes the write
//! lock; every query takes the read lock and returns defensive copies, so
//! callers never iterate a structure a writer could mutate.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use tracing::debug;

use super::types::{Edge, EdgeType, Node, PendingEdge, RefKey, ReversePendingEdge, Uid};

/// Index key used for cluster-scoped objects (empty namespace).
pub const CLUSTER_SCOPE_KEY: &str = "_cluster";

/// Map an object namespace to its index key.
pub fn namespace_key(namespace: &str) -> &str {
    if namespace.is_empty() {
        CLUSTER_SCOPE_KEY
    } else {
        namespace
    }
}

type MatchKey = (String, String, String);

#[derive(Default)]
struct GraphInner {
    nodes: HashMap<Uid, Node>,

    // namespace key -> kind -> nodes
    by_namespace_kind: HashMap<String, HashMap<String, HashSet<Uid>>>,
    // release name -> nodes
    by_release: HashMap<String, HashSet<Uid>>,
    // label key -> label value -> nodes
    by_label: HashMap<String, HashMap<String, HashSet<Uid>>>,

    // (kind, namespace, name) of the awaited target -> edges to create
    pending: HashMap<MatchKey, Vec<PendingEdge>>,
    // (kind, namespace, name) of the awaited source -> edges to create
    reverse_pending: HashMap<MatchKey, Vec<ReversePendingEdge>>,
}

/// The in-memory resource graph. Cheap to share behind an `Arc`.
#[derive(Default)]
pub struct Graph {
    inner: RwLock<GraphInner>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a node.
    ///
    /// On update, the old and new attributes are diffed against each index
    /// and only the changed keys are adjusted; existing adjacency maps are
    /// preserved. Afterwards both pending tables are drained for the node's
    /// (kind, namespace, name), materializing any edges that were waiting
    /// for it. Returns the edges created from pending entries so a
    /// persistence wrapper can mirror them.
    pub fn upsert_node(&self, mut node: Node) -> Vec<Edge> {
        let mut inner = self.inner.write();

        let previous = inner.nodes.remove(&node.uid);
        if let Some(prev) = &previous {
            node.outgoing = prev.outgoing.clone();
            node.incoming = prev.incoming.clone();
        }
        inner.reindex(previous.as_ref(), &node);

        let uid = node.uid.clone();
        let kind = node.kind.clone();
        let namespace = node.namespace.clone();
        let name = node.name.clone();
        let is_update = previous.is_some();
        inner.nodes.insert(uid.clone(), node);

        let created = inner.drain_pending(&uid, &kind, &namespace, &name);

        if is_update {
            debug!(%kind, %namespace, %name, "graph: updated node");
        } else {
            debug!(%kind, %namespace, %name, "graph: added node");
        }
        created
    }

    /// Remove a node, cascading over its incident edges, index entries, and
    /// any pending entries it registered.
    pub fn remove_node(&self, uid: &Uid) {
        let mut inner = self.inner.write();

        let Some(node) = inner.nodes.remove(uid) else {
            return;
        };

        let outgoing: Vec<Uid> = node.outgoing.keys().cloned().collect();
        for peer in outgoing {
            if let Some(peer_node) = inner.nodes.get_mut(&peer) {
                peer_node.incoming.remove(uid);
            }
        }
        let incoming: Vec<Uid> = node.incoming.keys().cloned().collect();
        for peer in incoming {
            if let Some(peer_node) = inner.nodes.get_mut(&peer) {
                peer_node.outgoing.remove(uid);
            }
        }

        inner.remove_from_indexes(&node);

        inner.pending.retain(|_, list| {
            list.retain(|p| p.from != *uid);
            !list.is_empty()
        });
        inner.reverse_pending.retain(|_, list| {
            list.retain(|p| p.to != *uid);
            !list.is_empty()
        });

        debug!(kind = %node.kind, namespace = %node.namespace, name = %node.name, "graph: removed node");
    }

    /// O(1) lookup by UID, returning a defensive copy.
    pub fn get_node(&self, uid: &Uid) -> Option<Node> {
        self.inner.read().nodes.get(uid).cloned()
    }

    /// Add a typed edge between two existing nodes. Returns whether a new
    /// edge was created; false when either endpoint is absent or an
    /// identical edge already exists. Callers with an absent peer must
    /// register a pending edge instead.
    pub fn add_edge(&self, edge_type: EdgeType, from: &Uid, to: &Uid) -> bool {
        self.insert_edge(Edge::new(edge_type, from.clone(), to.clone()))
    }

    /// Add a fully-formed edge (used on replay, where edge metadata must
    /// survive the round trip).
    pub fn insert_edge(&self, edge: Edge) -> bool {
        self.inner.write().insert_edge(edge)
    }

    /// Remove the edge between two nodes. No-op if absent.
    pub fn remove_edge(&self, from: &Uid, to: &Uid) {
        let mut inner = self.inner.write();
        if let Some(node) = inner.nodes.get_mut(from) {
            node.outgoing.remove(to);
        }
        if let Some(node) = inner.nodes.get_mut(to) {
            node.incoming.remove(from);
        }
    }

    /// Record "create edge `from` -> X when a node matching `target`
    /// appears".
    pub fn add_pending_edge(&self, from: &Uid, target: RefKey, edge_type: EdgeType) {
        let mut inner = self.inner.write();
        let entry = PendingEdge {
            from: from.clone(),
            target: target.clone(),
            edge_type,
        };
        let list = inner.pending.entry(target.match_key()).or_default();
        if !list.contains(&entry) {
            debug!(%target, %edge_type, from = %entry.from, "graph: pending edge (waiting for target)");
            list.push(entry);
        }
    }

    /// Record "create edge X -> `to` when a node matching `source`
    /// appears".
    pub fn add_reverse_pending_edge(&self, to: &Uid, source: RefKey, edge_type: EdgeType) {
        let mut inner = self.inner.write();
        let entry = ReversePendingEdge {
            to: to.clone(),
            source: source.clone(),
            edge_type,
        };
        let list = inner.reverse_pending.entry(source.match_key()).or_default();
        if !list.contains(&entry) {
            debug!(%source, %edge_type, to = %entry.to, "graph: pending edge (waiting for source)");
            list.push(entry);
        }
    }

    /// All nodes of a kind in a namespace (empty namespace selects
    /// cluster-scoped objects).
    pub fn nodes_by_namespace_kind(&self, namespace: &str, kind: &str) -> Vec<Node> {
        let inner = self.inner.read();
        inner
            .by_namespace_kind
            .get(namespace_key(namespace))
            .and_then(|kinds| kinds.get(kind))
            .map(|uids| inner.resolve(uids))
            .unwrap_or_default()
    }

    /// All nodes belonging to a Helm release.
    pub fn nodes_by_release(&self, release: &str) -> Vec<Node> {
        let inner = self.inner.read();
        inner
            .by_release
            .get(release)
            .map(|uids| inner.resolve(uids))
            .unwrap_or_default()
    }

    /// Nodes whose labels match every (key, value) pair of the selector.
    /// The per-pair index sets are intersected shortest-first; an empty
    /// selector matches nothing.
    pub fn nodes_by_label_selector(&self, selector: &BTreeMap<String, String>) -> Vec<Node> {
        if selector.is_empty() {
            return Vec::new();
        }
        let inner = self.inner.read();

        let mut sets: Vec<&HashSet<Uid>> = Vec::with_capacity(selector.len());
        for (key, value) in selector {
            match inner.by_label.get(key).and_then(|values| values.get(value)) {
                Some(set) => sets.push(set),
                None => return Vec::new(),
            }
        }
        sets.sort_by_key(|set| set.len());

        let Some((first, rest)) = sets.split_first() else {
            return Vec::new();
        };
        let matched: HashSet<&Uid> = first
            .iter()
            .filter(|uid| rest.iter().all(|set| set.contains(*uid)))
            .collect();

        matched
            .into_iter()
            .filter_map(|uid| inner.nodes.get(uid).cloned())
            .collect()
    }

    /// Full scan of all nodes, as copies.
    pub fn all_nodes(&self) -> Vec<Node> {
        self.inner.read().nodes.values().cloned().collect()
    }

    /// All distinct Helm release names.
    pub fn all_releases(&self) -> Vec<String> {
        self.inner
            .read()
            .by_release
            .keys()
            .filter(|r| !r.is_empty())
            .cloned()
            .collect()
    }

    /// All distinct Helm chart names.
    pub fn all_charts(&self) -> Vec<String> {
        let inner = self.inner.read();
        let charts: HashSet<&str> = inner
            .nodes
            .values()
            .filter(|n| !n.chart.is_empty())
            .map(|n| n.chart.as_str())
            .collect();
        charts.into_iter().map(str::to_string).collect()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }
}

impl GraphInner {
    fn resolve(&self, uids: &HashSet<Uid>) -> Vec<Node> {
        uids.iter()
            .filter_map(|uid| self.nodes.get(uid).cloned())
            .collect()
    }

    /// Adjust index membership for a node, touching only the keys whose
    /// value actually changed between the old and new attributes.
    fn reindex(&mut self, old: Option<&Node>, new: &Node) {
        let uid = &new.uid;

        let new_ns = namespace_key(&new.namespace).to_string();
        let old_ns_kind = old.map(|o| (namespace_key(&o.namespace).to_string(), o.kind.clone()));
        if old_ns_kind.as_ref() != Some(&(new_ns.clone(), new.kind.clone())) {
            if let Some((ns, kind)) = old_ns_kind {
                remove_nested(&mut self.by_namespace_kind, &ns, &kind, uid);
            }
            self.by_namespace_kind
                .entry(new_ns)
                .or_default()
                .entry(new.kind.clone())
                .or_default()
                .insert(uid.clone());
        }

        let old_release = old.map(|o| o.release.as_str()).unwrap_or("");
        if old_release != new.release {
            if !old_release.is_empty() {
                if let Some(set) = self.by_release.get_mut(old_release) {
                    set.remove(uid);
                    if set.is_empty() {
                        self.by_release.remove(old_release);
                    }
                }
            }
            if !new.release.is_empty() {
                self.by_release
                    .entry(new.release.clone())
                    .or_default()
                    .insert(uid.clone());
            }
        }

        static EMPTY: BTreeMap<String, String> = BTreeMap::new();
        let old_labels = old.map(|o| &o.labels).unwrap_or(&EMPTY);
        for (key, value) in old_labels {
            if new.labels.get(key) != Some(value) {
                remove_nested(&mut self.by_label, key, value, uid);
            }
        }
        for (key, value) in &new.labels {
            if old_labels.get(key) != Some(value) {
                self.by_label
                    .entry(key.clone())
                    .or_default()
                    .entry(value.clone())
                    .or_default()
                    .insert(uid.clone());
            }
        }
    }

    fn remove_from_indexes(&mut self, node: &Node) {
        let ns = namespace_key(&node.namespace).to_string();
        remove_nested(&mut self.by_namespace_kind, &ns, &node.kind, &node.uid);

        if !node.release.is_empty() {
            if let Some(set) = self.by_release.get_mut(&node.release) {
                set.remove(&node.uid);
                if set.is_empty() {
                    self.by_release.remove(&node.release);
                }
            }
        }

        for (key, value) in &node.labels {
            remove_nested(&mut self.by_label, key, value, &node.uid);
        }
    }

    /// Upsert an edge into both adjacency maps. Returns false when either
    /// endpoint is missing or the identical edge is already present.
    fn insert_edge(&mut self, edge: Edge) -> bool {
        if !self.nodes.contains_key(&edge.from) || !self.nodes.contains_key(&edge.to) {
            return false;
        }
        if let Some(existing) = self
            .nodes
            .get(&edge.from)
            .and_then(|n| n.outgoing.get(&edge.to))
        {
            if existing.edge_type == edge.edge_type {
                return false;
            }
        }

        if let Some(from_node) = self.nodes.get_mut(&edge.from) {
            from_node.outgoing.insert(edge.to.clone(), edge.clone());
        }
        if let Some(to_node) = self.nodes.get_mut(&edge.to) {
            to_node.incoming.insert(edge.from.clone(), edge);
        }
        true
    }

    /// Materialize every pending edge waiting for the freshly upserted
    /// node, in both directions, and drop the drained entries.
    fn drain_pending(&mut self, uid: &Uid, kind: &str, namespace: &str, name: &str) -> Vec<Edge> {
        let key = (kind.to_string(), namespace.to_string(), name.to_string());
        let mut created = Vec::new();

        if let Some(list) = self.pending.remove(&key) {
            for pending in list {
                let edge = Edge::new(pending.edge_type, pending.from.clone(), uid.clone());
                if self.insert_edge(edge.clone()) {
                    debug!(%kind, %name, from = %pending.from, edge_type = %pending.edge_type, "graph: materialized pending edge");
                    created.push(edge);
                }
            }
        }

        if let Some(list) = self.reverse_pending.remove(&key) {
            for pending in list {
                let edge = Edge::new(pending.edge_type, uid.clone(), pending.to.clone());
                if self.insert_edge(edge.clone()) {
                    debug!(%kind, %name, to = %pending.to, edge_type = %pending.edge_type, "graph: materialized pending edge");
                    created.push(edge);
                }
            }
        }

        created
    }
}

fn remove_nested(
    index: &mut HashMap<String, HashMap<String, HashSet<Uid>>>,
    outer: &str,
    inner_key: &str,
    uid: &Uid,
) {
    if let Some(values) = index.get_mut(outer) {
        if let Some(set) = values.get_mut(inner_key) {
            set.remove(uid);
            if set.is_empty() {
                values.remove(inner_key);
            }
        }
        if values.is_empty() {
            index.remove(outer);
        }
    }
}
