//! Query-side selection: graph expansion with release isolation, and
//! inclusion of the cluster-scoped PersistentVolumes bound to a selection's
//! claims.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::graph::{EdgeType, GraphOps, Node, Uid};

/// Kinds a graph expansion may pull in as neighbours.
const EXPANDABLE_KINDS: [&str; 10] = [
    "pod",
    "replicaset",
    "endpointslice",
    "configmap",
    "secret",
    "serviceaccount",
    "service",
    "persistentvolume",
    "persistentvolumeclaim",
    "storageclass",
];

/// Breadth-first expansion of `base` over both edge directions.
///
/// Neighbours are filtered by namespace (cluster-scoped objects pass any
/// filter) and restricted to the expandable kinds. When a release is
/// requested, neighbours carrying a different release are excluded, and
/// neighbours carrying *no* release are only included when the current
/// frontier node itself belongs to the release — this keeps shared
/// cluster-scoped resources from dragging in other tenants' objects over
/// multiple hops.
pub fn expand_related(
    graph: &dyn GraphOps,
    base: Vec<Node>,
    namespace: &str,
    release: &str,
) -> Vec<Node> {
    if base.is_empty() {
        return base;
    }

    let within_namespace = |node: &Node| {
        namespace.is_empty() || node.namespace.is_empty() || node.namespace == namespace
    };

    let release_nodes: HashSet<Uid> = base
        .iter()
        .filter(|n| !release.is_empty() && n.release == release)
        .map(|n| n.uid.clone())
        .collect();

    let mut seen: HashSet<Uid> = HashSet::with_capacity(base.len());
    let mut queue: VecDeque<Node> = VecDeque::with_capacity(base.len());
    let mut ordered: Vec<Node> = Vec::with_capacity(base.len());

    for node in base {
        if seen.insert(node.uid.clone()) {
            queue.push_back(node.clone());
            ordered.push(node);
        }
    }

    while let Some(current) = queue.pop_front() {
        let mut neighbours = Vec::with_capacity(current.outgoing.len() + current.incoming.len());
        for edge in current.outgoing.values() {
            if let Some(node) = graph.get_node(&edge.to) {
                neighbours.push(node);
            }
        }
        for edge in current.incoming.values() {
            if let Some(node) = graph.get_node(&edge.from) {
                neighbours.push(node);
            }
        }

        for neighbour in neighbours {
            if seen.contains(&neighbour.uid) {
                continue;
            }
            if !within_namespace(&neighbour) {
                continue;
            }

            // Unmanaged resources only ride along when directly connected
            // to a node of the requested release.
            if !release.is_empty()
                && neighbour.release.is_empty()
                && !release_nodes.contains(&current.uid)
            {
                continue;
            }
            if !release.is_empty()
                && !neighbour.release.is_empty()
                && neighbour.release != release
            {
                continue;
            }

            if !EXPANDABLE_KINDS.contains(&neighbour.kind.to_lowercase().as_str()) {
                continue;
            }

            seen.insert(neighbour.uid.clone());
            ordered.push(neighbour.clone());
            queue.push_back(neighbour);
        }
    }

    ordered
}

/// Add the PersistentVolumes bound to the selection's claims.
///
/// PVCs that do not belong to the requested release are skipped to prevent
/// cluster-scoped leakage. Resolution goes through the `binds` edge first
/// and falls back to a one-time PV-by-name index built from
/// `spec.volumeName`.
pub fn include_persistent_volumes(
    graph: &dyn GraphOps,
    mut nodes: Vec<Node>,
    release: &str,
) -> Vec<Node> {
    if nodes.is_empty() {
        return nodes;
    }

    let mut seen: HashSet<Uid> = nodes.iter().map(|n| n.uid.clone()).collect();
    let mut pv_by_name: Option<HashMap<String, Node>> = None;
    let mut added: Vec<Node> = Vec::new();

    for node in &nodes {
        if !node.kind.eq_ignore_ascii_case("persistentvolumeclaim") {
            continue;
        }
        if !release.is_empty() && node.release != release {
            continue;
        }

        for edge in node.outgoing.values() {
            if edge.edge_type != EdgeType::Binds {
                continue;
            }
            if let Some(pv) = graph.get_node(&edge.to) {
                if seen.insert(pv.uid.clone()) {
                    added.push(pv);
                }
            }
        }

        let Some(volume_name) = node
            .metadata
            .as_ref()
            .and_then(|m| m.volume_name.as_deref())
            .filter(|v| !v.is_empty())
        else {
            continue;
        };

        let index = pv_by_name.get_or_insert_with(|| {
            graph
                .all_nodes()
                .into_iter()
                .filter(|n| n.kind.eq_ignore_ascii_case("persistentvolume"))
                .map(|n| (n.name.clone(), n))
                .collect()
        });
        if let Some(pv) = index.get(volume_name) {
            if seen.insert(pv.uid.clone()) {
                added.push(pv.clone());
            }
        }
    }

    nodes.extend(added);
    nodes
}
