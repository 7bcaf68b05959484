//! Helpers shared by the per-kind processors.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use tracing::debug;

use crate::graph::{EdgeType, GraphOps, Node, RefKey, Uid};

/// Remove the node for a deleted object, keyed by its UID.
pub(crate) fn handle_delete(graph: &dyn GraphOps, meta: &ObjectMeta, kind: &str) -> Result<()> {
    let uid = meta
        .uid
        .as_deref()
        .with_context(|| format!("{kind} delete event has no metadata.uid"))?;
    debug!(
        kind,
        namespace = meta.namespace.as_deref().unwrap_or(""),
        name = meta.name.as_deref().unwrap_or(""),
        "deleting node"
    );
    graph.remove_node(&Uid::from(uid));
    Ok(())
}

/// Emit ownership edges for every owner reference. The reference already
/// carries the owner's UID, so presence is checked by direct lookup; when
/// the owner has not been observed yet, a pending entry keyed by its
/// (kind, namespace, name) is registered instead.
pub(crate) fn create_ownership_edges(
    graph: &dyn GraphOps,
    node: &Node,
    owner_refs: Option<&Vec<OwnerReference>>,
) {
    for owner in owner_refs.into_iter().flatten() {
        let owner_uid = Uid::new(owner.uid.clone());
        if graph.get_node(&owner_uid).is_some() {
            graph.add_edge(EdgeType::Owns, &owner_uid, &node.uid);
        } else {
            // Owners live in the owned object's namespace.
            let source = RefKey::new(&owner.api_version, &owner.kind, &node.namespace, &owner.name);
            graph.add_reverse_pending_edge(&node.uid, source, EdgeType::Owns);
        }
    }
}

/// Find a node by namespace, kind, and name through the namespace/kind
/// index.
pub(crate) fn find_by_name(
    graph: &dyn GraphOps,
    namespace: &str,
    kind: &str,
    name: &str,
) -> Option<Node> {
    graph
        .nodes_by_namespace_kind(namespace, kind)
        .into_iter()
        .find(|node| node.name == name)
}

/// Emit an edge to the named peer, or register a pending edge when the peer
/// has not been observed yet.
pub(crate) fn link_or_pend(
    graph: &dyn GraphOps,
    from: &Uid,
    api_version: &str,
    kind: &str,
    namespace: &str,
    name: &str,
    edge_type: EdgeType,
) {
    match find_by_name(graph, namespace, kind, name) {
        Some(target) => {
            graph.add_edge(edge_type, from, &target.uid);
        }
        None => {
            graph.add_pending_edge(from, RefKey::new(api_version, kind, namespace, name), edge_type);
        }
    }
}

/// True when every (key, value) pair of the selector is present in the
/// labels.
pub(crate) fn matches_selector(
    labels: &BTreeMap<String, String>,
    selector: &BTreeMap<String, String>,
) -> bool {
    selector.iter().all(|(key, value)| labels.get(key) == Some(value))
}

/// Pods in the namespace matching a label selector.
pub(crate) fn find_pods_by_selector(
    graph: &dyn GraphOps,
    namespace: &str,
    selector: &BTreeMap<String, String>,
) -> Vec<Node> {
    graph
        .nodes_by_namespace_kind(namespace, "Pod")
        .into_iter()
        .filter(|pod| matches_selector(&pod.labels, selector))
        .collect()
}

/// Connect a pod to every Service and PodDisruptionBudget in its namespace
/// whose stored selector matches the pod's labels. This is the reverse of
/// the selector matching the Service processor does, so that a pod labeled
/// (or re-labeled) after its selector-carrying peers still gains the edge on
/// its own event.
pub(crate) fn connect_selectors_to_pod(graph: &dyn GraphOps, pod: &Node) {
    for kind in ["Service", "PodDisruptionBudget"] {
        for peer in graph.nodes_by_namespace_kind(&pod.namespace, kind) {
            let Some(selector) = peer.metadata.as_ref().and_then(|m| m.selector.as_ref()) else {
                continue;
            };
            if !selector.is_empty() && matches_selector(&pod.labels, selector) {
                graph.add_edge(EdgeType::Selects, &peer.uid, &pod.uid);
            }
        }
    }
}

/// Emit `uses-configmap` / `uses-secret` edges for every reference in a pod
/// spec: volumes, container `envFrom`, and container `env.valueFrom`.
pub(crate) fn create_config_edges(graph: &dyn GraphOps, node: &Node, spec: &PodSpec) {
    let ns = node.namespace.as_str();

    for volume in spec.volumes.iter().flatten() {
        if let Some(name) = volume.config_map.as_ref().map(|cm| cm.name.as_str()) {
            link_or_pend(graph, &node.uid, "v1", "ConfigMap", ns, name, EdgeType::UsesConfigMap);
        }
        if let Some(name) = volume.secret.as_ref().and_then(|s| s.secret_name.as_deref()) {
            link_or_pend(graph, &node.uid, "v1", "Secret", ns, name, EdgeType::UsesSecret);
        }
    }

    for container in &spec.containers {
        for env_from in container.env_from.iter().flatten() {
            if let Some(name) = env_from.config_map_ref.as_ref().map(|r| r.name.as_str()) {
                link_or_pend(graph, &node.uid, "v1", "ConfigMap", ns, name, EdgeType::UsesConfigMap);
            }
            if let Some(name) = env_from.secret_ref.as_ref().map(|r| r.name.as_str()) {
                link_or_pend(graph, &node.uid, "v1", "Secret", ns, name, EdgeType::UsesSecret);
            }
        }

        for env in container.env.iter().flatten() {
            let Some(value_from) = env.value_from.as_ref() else {
                continue;
            };
            if let Some(name) = value_from
                .config_map_key_ref
                .as_ref()
                .map(|r| r.name.as_str())
            {
                link_or_pend(graph, &node.uid, "v1", "ConfigMap", ns, name, EdgeType::UsesConfigMap);
            }
            if let Some(name) = value_from
                .secret_key_ref
                .as_ref()
                .map(|r| r.name.as_str())
            {
                link_or_pend(graph, &node.uid, "v1", "Secret", ns, name, EdgeType::UsesSecret);
            }
        }
    }
}

/// Emit the `uses-sa` edge when the pod spec names a service account.
pub(crate) fn create_service_account_edge(graph: &dyn GraphOps, node: &Node, spec: &PodSpec) {
    if let Some(name) = spec.service_account_name.as_deref() {
        if !name.is_empty() {
            link_or_pend(
                graph,
                &node.uid,
                "v1",
                "ServiceAccount",
                &node.namespace,
                name,
                EdgeType::UsesServiceAccount,
            );
        }
    }
}

/// First container image of a pod spec, used as the workload's display
/// image.
pub(crate) fn first_container_image(spec: &PodSpec) -> Option<String> {
    spec.containers.first().and_then(|c| c.image.clone())
}
