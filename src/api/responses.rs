//! Response shaping: project graph nodes into the wire format the
//! dashboard datasource consumes.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::graph::{EdgeType, GraphOps, Node, ObjectReference, ReplicaInfo, ResourceMetadata, Uid};

/// Flat resource view of a node.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: String,
    pub namespace: String,
    pub kind: String,
    pub api_version: String,
    pub status: String,
    pub message: String,
    pub chart: String,
    pub release: String,
    pub age: String,
    pub creation_timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<ReplicaInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_ref: Option<ObjectReference>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_pods: Vec<String>,
    #[serde(rename = "mountedPVCs", skip_serializing_if = "Vec::is_empty")]
    pub mounted_pvcs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub used_config_maps: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub used_secrets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
}

/// Graph view: the selected nodes plus the edges whose endpoints are both
/// inside the selection.
#[derive(Debug, Clone, Serialize)]
pub struct GraphResponse {
    pub nodes: Vec<NodeResponse>,
    pub edges: Vec<EdgeResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeResponse {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub kind: String,
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub chart: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub release: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResourceMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeResponse {
    #[serde(rename = "type")]
    pub edge_type: String,
    pub from: String,
    pub to: String,
}

/// Project nodes into resources, following adjacency for owner names,
/// related-name lists, and the service-account name.
///
/// Peer lookups are amortized by pre-populating a UID -> node cache from the
/// adjacency maps of the whole selection before shaping anything.
pub fn nodes_to_resources(graph: &dyn GraphOps, nodes: &[Node]) -> Vec<Resource> {
    let mut cache: HashMap<Uid, Node> = HashMap::new();
    for node in nodes {
        for uid in node.incoming.keys().chain(node.outgoing.keys()) {
            if !cache.contains_key(uid) {
                if let Some(peer) = graph.get_node(uid) {
                    cache.insert(uid.clone(), peer);
                }
            }
        }
    }

    nodes
        .iter()
        .map(|node| {
            let mut resource = Resource {
                name: node.name.clone(),
                namespace: node.namespace.clone(),
                kind: node.kind.clone(),
                api_version: node.api_version.clone(),
                status: node.status.to_string(),
                message: node.status_message.clone(),
                chart: node.chart.clone(),
                release: node.release.clone(),
                age: format_age(node.creation_timestamp),
                creation_timestamp: node
                    .creation_timestamp
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_default(),
                ..Resource::default()
            };

            if let Some(meta) = &node.metadata {
                resource.image = meta.image.clone();
                resource.node_name = meta.node_name.clone();
                resource.restart_count = meta.restart_count;
                resource.replicas = meta.replicas;
                resource.volume_name = meta.volume_name.clone();
                resource.claim_ref = meta.claim_ref.clone();
            }

            for edge in node.incoming.values() {
                if edge.edge_type == EdgeType::Owns {
                    if let Some(owner) = cache.get(&edge.from) {
                        resource.owner_references.push(OwnerReference {
                            kind: owner.kind.clone(),
                            name: owner.name.clone(),
                        });
                    }
                }
            }

            resource.target_pods = related_names(node, EdgeType::Selects, &cache);
            resource.mounted_pvcs = related_names(node, EdgeType::Mounts, &cache);
            resource.used_config_maps = related_names(node, EdgeType::UsesConfigMap, &cache);
            resource.used_secrets = related_names(node, EdgeType::UsesSecret, &cache);

            resource.service_account_name = node
                .outgoing
                .values()
                .find(|e| e.edge_type == EdgeType::UsesServiceAccount)
                .and_then(|e| cache.get(&e.to))
                .map(|sa| sa.name.clone());

            resource
        })
        .collect()
}

fn related_names(node: &Node, edge_type: EdgeType, cache: &HashMap<Uid, Node>) -> Vec<String> {
    node.outgoing
        .values()
        .filter(|e| e.edge_type == edge_type)
        .filter_map(|e| cache.get(&e.to))
        .map(|peer| peer.name.clone())
        .collect()
}

/// Build the graph response, dropping edges that cross the selection
/// boundary.
pub fn build_graph_response(nodes: &[Node]) -> GraphResponse {
    let selected: HashSet<&Uid> = nodes.iter().map(|n| &n.uid).collect();

    let mut response = GraphResponse {
        nodes: Vec::with_capacity(nodes.len()),
        edges: Vec::new(),
    };

    for node in nodes {
        response.nodes.push(NodeResponse {
            uid: node.uid.to_string(),
            name: node.name.clone(),
            namespace: node.namespace.clone(),
            kind: node.kind.clone(),
            status: node.status.to_string(),
            message: node.status_message.clone(),
            chart: node.chart.clone(),
            release: node.release.clone(),
            metadata: node.metadata.clone(),
        });

        for edge in node.outgoing.values() {
            if selected.contains(&edge.to) {
                response.edges.push(EdgeResponse {
                    edge_type: edge.edge_type.to_string(),
                    from: edge.from.to_string(),
                    to: edge.to.to_string(),
                });
            }
        }
    }

    response
}

/// Age string with unit selection: seconds under a minute, then minutes,
/// hours, days.
pub fn format_age(created: Option<DateTime<Utc>>) -> String {
    let Some(created) = created else {
        return String::new();
    };
    let elapsed = Utc::now().signed_duration_since(created);
    let seconds = elapsed.num_seconds().max(0);

    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else if seconds < 86400 {
        format!("{}h", seconds / 3600)
    } else {
        format!("{}d", seconds / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn age_unit_selection() {
        let now = Utc::now();
        assert_eq!(format_age(Some(now - Duration::seconds(30))), "30s");
        assert_eq!(format_age(Some(now - Duration::minutes(5))), "5m");
        assert_eq!(format_age(Some(now - Duration::hours(7))), "7h");
        assert_eq!(format_age(Some(now - Duration::days(3))), "3d");
        assert_eq!(format_age(None), "");
    }
}
