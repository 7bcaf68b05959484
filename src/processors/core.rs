//! Processors for core/v1 resources.

use std::sync::Arc;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolume, PersistentVolumeClaim, Pod, Secret, Service,
    ServiceAccount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::Metadata;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::graph::{
    node_from_meta, EdgeType, GraphOps, ObjectReference, ResourceMetadata, ResourceStatus, Uid,
};
use crate::processors::base;
use crate::processors::{EventType, Processor};

/// Shared path for kinds whose status is simply "exists": build the node,
/// mark it ready, and emit ownership edges.
fn process_exists<K>(
    graph: &dyn GraphOps,
    obj: &Value,
    event: EventType,
    kind: &'static str,
    api_version: &'static str,
    message: &'static str,
) -> Result<()>
where
    K: Metadata<Ty = ObjectMeta> + DeserializeOwned,
{
    let resource: K = serde_json::from_value(obj.clone()).with_context(|| format!("expected {kind}"))?;
    let meta = resource.metadata();
    if event == EventType::Deleted {
        return base::handle_delete(graph, meta, kind);
    }

    let mut node = node_from_meta(meta, kind, api_version)?;
    node.status = ResourceStatus::Ready;
    node.status_message = message.to_string();

    graph.upsert_node(node.clone());
    base::create_ownership_edges(graph, &node, meta.owner_references.as_ref());
    Ok(())
}

// === Pod ===

pub(crate) struct PodProcessor {
    graph: Arc<dyn GraphOps>,
}

impl PodProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for PodProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let pod: Pod = serde_json::from_value(obj.clone()).context("expected Pod")?;
        let graph = self.graph.as_ref();
        if event == EventType::Deleted {
            return base::handle_delete(graph, &pod.metadata, "Pod");
        }

        let mut node = node_from_meta(&pod.metadata, "Pod", "v1")?;
        let (status, message) = pod_status(&pod);
        node.status = status;
        node.status_message = message;

        let spec = pod.spec.as_ref();
        node.metadata = Some(ResourceMetadata {
            node_name: spec.and_then(|s| s.node_name.clone()),
            image: spec.and_then(base::first_container_image),
            restart_count: Some(total_restart_count(&pod)),
            ..ResourceMetadata::default()
        });

        graph.upsert_node(node.clone());
        base::create_ownership_edges(graph, &node, pod.metadata.owner_references.as_ref());

        if let Some(spec) = spec {
            for volume in spec.volumes.iter().flatten() {
                if let Some(claim) = volume.persistent_volume_claim.as_ref() {
                    base::link_or_pend(
                        graph,
                        &node.uid,
                        "v1",
                        "PersistentVolumeClaim",
                        &node.namespace,
                        &claim.claim_name,
                        EdgeType::Mounts,
                    );
                }
            }
            base::create_config_edges(graph, &node, spec);
            base::create_service_account_edge(graph, &node, spec);
        }

        base::connect_selectors_to_pod(graph, &node);
        Ok(())
    }
}

fn pod_status(pod: &Pod) -> (ResourceStatus, String) {
    let status = pod.status.as_ref();
    let phase = status.and_then(|s| s.phase.as_deref()).unwrap_or("");
    match phase {
        "Running" => {
            for cs in status.and_then(|s| s.container_statuses.as_ref()).into_iter().flatten() {
                if cs.ready {
                    continue;
                }
                if let Some(waiting) = cs.state.as_ref().and_then(|s| s.waiting.as_ref()) {
                    return (
                        ResourceStatus::Pending,
                        format!(
                            "Container not ready: {}",
                            waiting.reason.as_deref().unwrap_or("unknown")
                        ),
                    );
                }
                if let Some(terminated) = cs.state.as_ref().and_then(|s| s.terminated.as_ref()) {
                    return (
                        ResourceStatus::Error,
                        format!(
                            "Container terminated: {}",
                            terminated.reason.as_deref().unwrap_or("unknown")
                        ),
                    );
                }
            }
            (ResourceStatus::Ready, "Pod is running".to_string())
        }
        "Pending" => (ResourceStatus::Pending, "Pod is pending".to_string()),
        "Succeeded" => (ResourceStatus::Ready, "Pod succeeded".to_string()),
        "Failed" => (ResourceStatus::Error, "Pod failed".to_string()),
        "Unknown" => (ResourceStatus::Unknown, "Pod status unknown".to_string()),
        other => (ResourceStatus::Unknown, format!("Unknown phase: {other}")),
    }
}

fn total_restart_count(pod: &Pod) -> i32 {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .into_iter()
        .flatten()
        .map(|cs| cs.restart_count)
        .sum()
}

// === Service ===

pub(crate) struct ServiceProcessor {
    graph: Arc<dyn GraphOps>,
}

impl ServiceProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for ServiceProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let service: Service = serde_json::from_value(obj.clone()).context("expected Service")?;
        let graph = self.graph.as_ref();
        if event == EventType::Deleted {
            return base::handle_delete(graph, &service.metadata, "Service");
        }

        let mut node = node_from_meta(&service.metadata, "Service", "v1")?;
        node.status = ResourceStatus::Ready;
        node.status_message = "Service is active".to_string();

        let spec = service.spec.as_ref();
        let selector = spec.and_then(|s| s.selector.clone());
        node.metadata = Some(ResourceMetadata {
            cluster_ip: spec.and_then(|s| s.cluster_ip.clone()),
            service_type: spec.and_then(|s| s.type_.clone()),
            selector: selector.clone(),
            ..ResourceMetadata::default()
        });

        graph.upsert_node(node.clone());
        base::create_ownership_edges(graph, &node, service.metadata.owner_references.as_ref());

        if let Some(selector) = selector.filter(|s| !s.is_empty()) {
            for pod in base::find_pods_by_selector(graph, &node.namespace, &selector) {
                graph.add_edge(EdgeType::Selects, &node.uid, &pod.uid);
            }
        }
        Ok(())
    }
}

// === ServiceAccount / ConfigMap / Secret ===

pub(crate) struct ServiceAccountProcessor {
    graph: Arc<dyn GraphOps>,
}

impl ServiceAccountProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for ServiceAccountProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        process_exists::<ServiceAccount>(
            self.graph.as_ref(),
            obj,
            event,
            "ServiceAccount",
            "v1",
            "ServiceAccount exists",
        )
    }
}

pub(crate) struct ConfigMapProcessor {
    graph: Arc<dyn GraphOps>,
}

impl ConfigMapProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for ConfigMapProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        process_exists::<ConfigMap>(
            self.graph.as_ref(),
            obj,
            event,
            "ConfigMap",
            "v1",
            "ConfigMap exists",
        )
    }
}

pub(crate) struct SecretProcessor {
    graph: Arc<dyn GraphOps>,
}

impl SecretProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for SecretProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let secret: Secret = serde_json::from_value(obj.clone()).context("expected Secret")?;
        if secret.type_.as_deref() == Some("helm.sh/release.v1") {
            debug!(
                namespace = secret.metadata.namespace.as_deref().unwrap_or(""),
                name = secret.metadata.name.as_deref().unwrap_or(""),
                "processing Helm release secret"
            );
        }
        process_exists::<Secret>(self.graph.as_ref(), obj, event, "Secret", "v1", "Secret exists")
    }
}

// === PersistentVolumeClaim ===

pub(crate) struct PvcProcessor {
    graph: Arc<dyn GraphOps>,
}

impl PvcProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for PvcProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let pvc: PersistentVolumeClaim =
            serde_json::from_value(obj.clone()).context("expected PersistentVolumeClaim")?;
        let graph = self.graph.as_ref();
        if event == EventType::Deleted {
            return base::handle_delete(graph, &pvc.metadata, "PersistentVolumeClaim");
        }

        let mut node = node_from_meta(&pvc.metadata, "PersistentVolumeClaim", "v1")?;
        let phase = pvc.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or("");
        (node.status, node.status_message) = match phase {
            "Bound" => (ResourceStatus::Ready, "Bound".to_string()),
            "Pending" => (ResourceStatus::Pending, "Pending".to_string()),
            "Lost" => (ResourceStatus::Error, "Lost".to_string()),
            other => (ResourceStatus::Unknown, format!("Phase: {other}")),
        };

        let volume_name = pvc.spec.as_ref().and_then(|s| s.volume_name.clone());
        node.metadata = Some(ResourceMetadata {
            volume_name: volume_name.clone(),
            ..ResourceMetadata::default()
        });

        graph.upsert_node(node.clone());
        base::create_ownership_edges(graph, &node, pvc.metadata.owner_references.as_ref());

        if let Some(volume_name) = volume_name.filter(|v| !v.is_empty()) {
            // PVs are cluster-scoped.
            base::link_or_pend(
                graph,
                &node.uid,
                "v1",
                "PersistentVolume",
                "",
                &volume_name,
                EdgeType::Binds,
            );
        }
        Ok(())
    }
}

// === PersistentVolume ===

pub(crate) struct PvProcessor {
    graph: Arc<dyn GraphOps>,
}

impl PvProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for PvProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let pv: PersistentVolume =
            serde_json::from_value(obj.clone()).context("expected PersistentVolume")?;
        let graph = self.graph.as_ref();
        if event == EventType::Deleted {
            return base::handle_delete(graph, &pv.metadata, "PersistentVolume");
        }

        let mut node = node_from_meta(&pv.metadata, "PersistentVolume", "v1")?;
        let phase = pv.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or("");
        (node.status, node.status_message) = match phase {
            "Bound" => (ResourceStatus::Ready, "Bound".to_string()),
            "Available" => (ResourceStatus::Ready, "Available".to_string()),
            "Released" => (ResourceStatus::Pending, "Released".to_string()),
            "Failed" => (ResourceStatus::Error, "Failed".to_string()),
            other => (ResourceStatus::Unknown, format!("Phase: {other}")),
        };

        if let Some(claim) = pv.spec.as_ref().and_then(|s| s.claim_ref.as_ref()) {
            node.metadata = Some(ResourceMetadata {
                claim_ref: Some(ObjectReference {
                    kind: "PersistentVolumeClaim".to_string(),
                    namespace: claim.namespace.clone().unwrap_or_default(),
                    name: claim.name.clone().unwrap_or_default(),
                    uid: claim.uid.as_deref().map(Uid::from),
                }),
                ..ResourceMetadata::default()
            });
        }

        graph.upsert_node(node.clone());
        base::create_ownership_edges(graph, &node, pv.metadata.owner_references.as_ref());
        Ok(())
    }
}

// === Namespace ===

pub(crate) struct NamespaceProcessor {
    graph: Arc<dyn GraphOps>,
}

impl NamespaceProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for NamespaceProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let ns: Namespace = serde_json::from_value(obj.clone()).context("expected Namespace")?;
        let graph = self.graph.as_ref();
        if event == EventType::Deleted {
            return base::handle_delete(graph, &ns.metadata, "Namespace");
        }

        let mut node = node_from_meta(&ns.metadata, "Namespace", "v1")?;
        let phase = ns.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or("");
        (node.status, node.status_message) = match phase {
            "Active" => (ResourceStatus::Ready, "Active".to_string()),
            "Terminating" => (ResourceStatus::Pending, "Terminating".to_string()),
            other => (ResourceStatus::Unknown, format!("Phase: {other}")),
        };

        graph.upsert_node(node);
        Ok(())
    }
}
