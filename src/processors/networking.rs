//! Processors for networking, storage, autoscaling, and policy resources.

use std::sync::Arc;

use anyhow::{Context, Result};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::storage::v1::StorageClass;
use serde_json::Value;

use crate::graph::{
    node_from_meta, EdgeType, GraphOps, ObjectReference, RefKey, ResourceMetadata, ResourceStatus,
};
use crate::processors::base;
use crate::processors::{EventType, Processor};

/// Label on an EndpointSlice naming the Service it belongs to.
const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

// === Ingress ===

pub(crate) struct IngressProcessor {
    graph: Arc<dyn GraphOps>,
}

impl IngressProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for IngressProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let ingress: Ingress = serde_json::from_value(obj.clone()).context("expected Ingress")?;
        let graph = self.graph.as_ref();
        if event == EventType::Deleted {
            return base::handle_delete(graph, &ingress.metadata, "Ingress");
        }

        let mut node = node_from_meta(&ingress.metadata, "Ingress", "networking.k8s.io/v1")?;
        let has_load_balancer = ingress
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .is_some_and(|ingresses| !ingresses.is_empty());
        (node.status, node.status_message) = if has_load_balancer {
            (ResourceStatus::Ready, "Ingress has load balancer".to_string())
        } else {
            (ResourceStatus::Pending, "Waiting for load balancer".to_string())
        };

        if let Some(class) = ingress
            .spec
            .as_ref()
            .and_then(|s| s.ingress_class_name.clone())
        {
            node.metadata = Some(ResourceMetadata {
                ingress_class: Some(class),
                ..ResourceMetadata::default()
            });
        }

        graph.upsert_node(node.clone());
        base::create_ownership_edges(graph, &node, ingress.metadata.owner_references.as_ref());

        let Some(spec) = ingress.spec.as_ref() else {
            return Ok(());
        };
        for rule in spec.rules.iter().flatten() {
            for path in rule.http.iter().flat_map(|h| &h.paths) {
                if let Some(service) = path.backend.service.as_ref() {
                    base::link_or_pend(
                        graph,
                        &node.uid,
                        "v1",
                        "Service",
                        &node.namespace,
                        &service.name,
                        EdgeType::RoutesTo,
                    );
                }
            }
        }
        if let Some(service) = spec.default_backend.as_ref().and_then(|b| b.service.as_ref()) {
            base::link_or_pend(
                graph,
                &node.uid,
                "v1",
                "Service",
                &node.namespace,
                &service.name,
                EdgeType::RoutesTo,
            );
        }
        Ok(())
    }
}

// === EndpointSlice ===

pub(crate) struct EndpointSliceProcessor {
    graph: Arc<dyn GraphOps>,
}

impl EndpointSliceProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for EndpointSliceProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let slice: EndpointSlice =
            serde_json::from_value(obj.clone()).context("expected EndpointSlice")?;
        let graph = self.graph.as_ref();
        if event == EventType::Deleted {
            return base::handle_delete(graph, &slice.metadata, "EndpointSlice");
        }

        let mut node = node_from_meta(&slice.metadata, "EndpointSlice", "discovery.k8s.io/v1")?;
        let ready_count = slice
            .endpoints
            .iter()
            .filter(|e| e.conditions.as_ref().and_then(|c| c.ready) == Some(true))
            .count();
        (node.status, node.status_message) = if ready_count > 0 {
            (ResourceStatus::Ready, format!("{ready_count} ready endpoint(s)"))
        } else {
            (ResourceStatus::Pending, "No ready endpoints".to_string())
        };

        graph.upsert_node(node.clone());
        base::create_ownership_edges(graph, &node, slice.metadata.owner_references.as_ref());

        // The owning Service points at the slice. When the service has not
        // been observed yet the edge waits for it.
        if let Some(service_name) = node.labels.get(SERVICE_NAME_LABEL) {
            match base::find_by_name(graph, &node.namespace, "Service", service_name) {
                Some(service) => {
                    graph.add_edge(EdgeType::Endpoints, &service.uid, &node.uid);
                }
                None => graph.add_reverse_pending_edge(
                    &node.uid,
                    RefKey::new("v1", "Service", &node.namespace, service_name),
                    EdgeType::Endpoints,
                ),
            }
        }

        for endpoint in &slice.endpoints {
            let Some(target) = endpoint.target_ref.as_ref() else {
                continue;
            };
            if target.kind.as_deref() != Some("Pod") {
                continue;
            }
            if let Some(pod_name) = target.name.as_deref() {
                base::link_or_pend(
                    graph,
                    &node.uid,
                    "v1",
                    "Pod",
                    &node.namespace,
                    pod_name,
                    EdgeType::Selects,
                );
            }
        }
        Ok(())
    }
}

// === StorageClass ===

pub(crate) struct StorageClassProcessor {
    graph: Arc<dyn GraphOps>,
}

impl StorageClassProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for StorageClassProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let sc: StorageClass = serde_json::from_value(obj.clone()).context("expected StorageClass")?;
        let graph = self.graph.as_ref();
        if event == EventType::Deleted {
            return base::handle_delete(graph, &sc.metadata, "StorageClass");
        }

        let mut node = node_from_meta(&sc.metadata, "StorageClass", "storage.k8s.io/v1")?;
        node.status = ResourceStatus::Ready;
        node.status_message = "StorageClass exists".to_string();

        graph.upsert_node(node.clone());
        base::create_ownership_edges(graph, &node, sc.metadata.owner_references.as_ref());
        Ok(())
    }
}

// === HorizontalPodAutoscaler ===

pub(crate) struct HpaProcessor {
    graph: Arc<dyn GraphOps>,
}

impl HpaProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for HpaProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let hpa: HorizontalPodAutoscaler =
            serde_json::from_value(obj.clone()).context("expected HorizontalPodAutoscaler")?;
        let graph = self.graph.as_ref();
        if event == EventType::Deleted {
            return base::handle_delete(graph, &hpa.metadata, "HorizontalPodAutoscaler");
        }

        let mut node = node_from_meta(&hpa.metadata, "HorizontalPodAutoscaler", "autoscaling/v2")?;
        let status = hpa.status.as_ref();
        let current = status.and_then(|s| s.current_replicas).unwrap_or(0);
        let desired = status.map(|s| s.desired_replicas).unwrap_or(0);
        let able_to_scale = status
            .and_then(|s| s.conditions.as_ref())
            .into_iter()
            .flatten()
            .any(|c| c.type_ == "AbleToScale" && c.status == "True");
        (node.status, node.status_message) = if able_to_scale {
            (
                ResourceStatus::Ready,
                format!("Scaling: {current}/{desired} replicas"),
            )
        } else {
            (ResourceStatus::Pending, "Unable to scale".to_string())
        };

        let spec = hpa.spec.as_ref();
        let target = spec.map(|s| &s.scale_target_ref);
        node.metadata = Some(ResourceMetadata {
            scale_target_ref: target.map(|t| ObjectReference {
                kind: t.kind.clone(),
                namespace: String::new(),
                name: t.name.clone(),
                uid: None,
            }),
            min_replicas: spec.and_then(|s| s.min_replicas),
            max_replicas: spec.map(|s| s.max_replicas),
            current_replicas: Some(current),
            desired_replicas: Some(desired),
            ..ResourceMetadata::default()
        });

        graph.upsert_node(node.clone());
        base::create_ownership_edges(graph, &node, hpa.metadata.owner_references.as_ref());

        // Scale target lives in the HPA's namespace.
        if let Some(target) = target {
            base::link_or_pend(
                graph,
                &node.uid,
                target.api_version.as_deref().unwrap_or(""),
                &target.kind,
                &node.namespace,
                &target.name,
                EdgeType::Scales,
            );
        }
        Ok(())
    }
}

// === PodDisruptionBudget ===

pub(crate) struct PdbProcessor {
    graph: Arc<dyn GraphOps>,
}

impl PdbProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for PdbProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let pdb: PodDisruptionBudget =
            serde_json::from_value(obj.clone()).context("expected PodDisruptionBudget")?;
        let graph = self.graph.as_ref();
        if event == EventType::Deleted {
            return base::handle_delete(graph, &pdb.metadata, "PodDisruptionBudget");
        }

        let mut node = node_from_meta(&pdb.metadata, "PodDisruptionBudget", "policy/v1")?;
        let status = pdb.status.as_ref();
        let current_healthy = status.map(|s| s.current_healthy).unwrap_or(0);
        let desired_healthy = status.map(|s| s.desired_healthy).unwrap_or(0);
        (node.status, node.status_message) = if current_healthy >= desired_healthy {
            (
                ResourceStatus::Ready,
                format!("Healthy: {current_healthy}/{desired_healthy}"),
            )
        } else {
            (
                ResourceStatus::Pending,
                format!("Unhealthy: {current_healthy}/{desired_healthy}"),
            )
        };

        let selector = pdb
            .spec
            .as_ref()
            .and_then(|s| s.selector.as_ref())
            .and_then(|s| s.match_labels.clone());
        node.metadata = Some(ResourceMetadata {
            selector: selector.clone(),
            ..ResourceMetadata::default()
        });

        graph.upsert_node(node.clone());
        base::create_ownership_edges(graph, &node, pdb.metadata.owner_references.as_ref());

        if let Some(selector) = selector.filter(|s| !s.is_empty()) {
            for pod in base::find_pods_by_selector(graph, &node.namespace, &selector) {
                graph.add_edge(EdgeType::Selects, &node.uid, &pod.uid);
            }
        }
        Ok(())
    }
}
