//! Core graph data model: nodes, edges, and the keys used to resolve
//! relationships whose counterpart has not been observed yet.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Annotation carrying the Helm chart name.
pub const HELM_CHART_ANNOTATION: &str = "helm.sh/chart";
/// Annotation carrying the Helm release name.
pub const HELM_RELEASE_ANNOTATION: &str = "meta.helm.sh/release-name";

/// Cluster-assigned unique identifier of an object. Stable across updates;
/// a node's identity never changes when its spec or labels change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(pub String);

impl Uid {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uid {
    fn from(uid: &str) -> Self {
        Self(uid.to_string())
    }
}

/// Derived status of a resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    Ready,
    Pending,
    Error,
    #[default]
    Unknown,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceStatus::Ready => "Ready",
            ResourceStatus::Pending => "Pending",
            ResourceStatus::Error => "Error",
            ResourceStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Typed relationship between two resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    /// OwnerReferences chain: owner -> owned.
    #[serde(rename = "owns")]
    Owns,
    /// Label selector match: service/PDB -> pod.
    #[serde(rename = "selects")]
    Selects,
    /// Service -> endpoint slice, via the slice's service-name label.
    #[serde(rename = "endpoints")]
    Endpoints,
    /// Ingress backend reference: ingress -> service.
    #[serde(rename = "routes-to")]
    RoutesTo,
    /// Pod volume -> claim.
    #[serde(rename = "mounts")]
    Mounts,
    /// Claim -> volume, via `spec.volumeName`.
    #[serde(rename = "binds")]
    Binds,
    #[serde(rename = "uses-configmap")]
    UsesConfigMap,
    #[serde(rename = "uses-secret")]
    UsesSecret,
    /// `spec.serviceAccountName` reference.
    #[serde(rename = "uses-sa")]
    UsesServiceAccount,
    /// HPA `scaleTargetRef`.
    #[serde(rename = "scales")]
    Scales,
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EdgeType::Owns => "owns",
            EdgeType::Selects => "selects",
            EdgeType::Endpoints => "endpoints",
            EdgeType::RoutesTo => "routes-to",
            EdgeType::Mounts => "mounts",
            EdgeType::Binds => "binds",
            EdgeType::UsesConfigMap => "uses-configmap",
            EdgeType::UsesSecret => "uses-secret",
            EdgeType::UsesServiceAccount => "uses-sa",
            EdgeType::Scales => "scales",
        };
        f.write_str(s)
    }
}

/// A directed typed edge between two nodes, stored in the adjacency maps of
/// both endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    #[serde(rename = "fromUID")]
    pub from: Uid,
    #[serde(rename = "toUID")]
    pub to: Uid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl Edge {
    pub fn new(edge_type: EdgeType, from: Uid, to: Uid) -> Self {
        Self {
            edge_type,
            from,
            to,
            metadata: None,
        }
    }
}

/// Simplified reference to another object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,
}

/// Replica counts for workload resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    pub desired: i32,
    pub current: i32,
    pub ready: i32,
    pub available: i32,
}

/// Sparse kind-specific metadata carried on a node. Only the fields that
/// apply to the node's kind are populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    // Pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_count: Option<i32>,

    // Workloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<ReplicaInfo>,

    // PVC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,

    // PV
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_ref: Option<ObjectReference>,

    // Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    /// Pod selector of a Service or PodDisruptionBudget. Kept on the node so
    /// a pod observed later can connect itself to already-known selectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<BTreeMap<String, String>>,

    // Ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class: Option<String>,

    // HPA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_target_ref: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_replicas: Option<i32>,
}

/// One observed cluster object, keyed by its UID.
///
/// Adjacency maps are keyed by the peer's UID and are never serialized;
/// persisted edges are stored independently and adjacency is rebuilt on
/// replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub uid: Uid,
    pub name: String,
    /// Empty string denotes a cluster-scoped object.
    pub namespace: String,
    pub kind: String,
    pub api_version: String,
    pub resource_version: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub status: ResourceStatus,
    pub status_message: String,
    #[serde(rename = "helmChart", default, skip_serializing_if = "String::is_empty")]
    pub chart: String,
    #[serde(rename = "helmRelease", default, skip_serializing_if = "String::is_empty")]
    pub release: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResourceMetadata>,
    #[serde(skip)]
    pub outgoing: HashMap<Uid, Edge>,
    #[serde(skip)]
    pub incoming: HashMap<Uid, Edge>,
}

/// Build a node skeleton from an object's standard meta-fields, extracting
/// the Helm chart and release from their well-known annotations.
pub fn node_from_meta(meta: &ObjectMeta, kind: &str, api_version: &str) -> Result<Node> {
    let uid = meta
        .uid
        .clone()
        .with_context(|| format!("{kind} object has no metadata.uid"))?;
    let labels = meta.labels.clone().unwrap_or_default();
    let annotations = meta.annotations.clone().unwrap_or_default();

    let chart = annotations
        .get(HELM_CHART_ANNOTATION)
        .cloned()
        .unwrap_or_default();
    let release = annotations
        .get(HELM_RELEASE_ANNOTATION)
        .cloned()
        .unwrap_or_default();

    Ok(Node {
        uid: Uid::new(uid),
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        resource_version: meta.resource_version.clone().unwrap_or_default(),
        labels,
        annotations,
        creation_timestamp: meta.creation_timestamp.as_ref().map(|t| t.0),
        status: ResourceStatus::Unknown,
        status_message: String::new(),
        chart,
        release,
        metadata: None,
        outgoing: HashMap::new(),
        incoming: HashMap::new(),
    })
}

/// Reference to a node that may not have been observed yet. Pending-edge
/// matching uses (kind, namespace, name); the API version is recorded for
/// diagnostics only, since processors may observe cross-API-group
/// references.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl RefKey {
    pub fn new(api_version: &str, kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// The triple pending-edge matching is keyed on.
    pub(crate) fn match_key(&self) -> (String, String, String) {
        (
            self.kind.clone(),
            self.namespace.clone(),
            self.name.clone(),
        )
    }
}

impl fmt::Display for RefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// Edge whose source is known and whose target has not been observed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEdge {
    pub from: Uid,
    pub target: RefKey,
    pub edge_type: EdgeType,
}

/// Edge whose target is known and whose source has not been observed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct ReversePendingEdge {
    pub to: Uid,
    pub source: RefKey,
    pub edge_type: EdgeType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    #[test]
    fn node_from_meta_extracts_helm_annotations() {
        let meta = ObjectMeta {
            uid: Some("abc-123".to_string()),
            name: Some("web".to_string()),
            namespace: Some("demo".to_string()),
            resource_version: Some("42".to_string()),
            annotations: Some(BTreeMap::from([
                (HELM_CHART_ANNOTATION.to_string(), "web-1.2.3".to_string()),
                (HELM_RELEASE_ANNOTATION.to_string(), "demo".to_string()),
            ])),
            creation_timestamp: Some(Time(Utc::now())),
            ..ObjectMeta::default()
        };

        let node = node_from_meta(&meta, "Deployment", "apps/v1").unwrap();
        assert_eq!(node.uid, Uid::from("abc-123"));
        assert_eq!(node.chart, "web-1.2.3");
        assert_eq!(node.release, "demo");
        assert_eq!(node.kind, "Deployment");
        assert_eq!(node.status, ResourceStatus::Unknown);
        assert!(node.creation_timestamp.is_some());
    }

    #[test]
    fn node_from_meta_requires_uid() {
        let meta = ObjectMeta {
            name: Some("no-uid".to_string()),
            ..ObjectMeta::default()
        };
        assert!(node_from_meta(&meta, "Pod", "v1").is_err());
    }

    #[test]
    fn node_serialization_skips_adjacency() {
        let mut node = Node {
            uid: Uid::from("u1"),
            name: "web".to_string(),
            namespace: "demo".to_string(),
            kind: "Pod".to_string(),
            api_version: "v1".to_string(),
            resource_version: "1".to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            creation_timestamp: None,
            status: ResourceStatus::Ready,
            status_message: "Pod is running".to_string(),
            chart: String::new(),
            release: String::new(),
            metadata: None,
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
        };
        node.outgoing.insert(
            Uid::from("u2"),
            Edge::new(EdgeType::Mounts, Uid::from("u1"), Uid::from("u2")),
        );

        let json = serde_json::to_value(&node).unwrap();
        assert!(json.get("outgoing").is_none());
        assert!(json.get("incoming").is_none());

        let back: Node = serde_json::from_value(json).unwrap();
        assert!(back.outgoing.is_empty());
        assert_eq!(back.uid, node.uid);
        assert_eq!(back.status, ResourceStatus::Ready);
    }

    #[test]
    fn edge_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&EdgeType::UsesConfigMap).unwrap(),
            "\"uses-configmap\""
        );
        assert_eq!(EdgeType::RoutesTo.to_string(), "routes-to");
        assert_eq!(EdgeType::UsesServiceAccount.to_string(), "uses-sa");
    }
}
