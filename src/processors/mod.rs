//! Per-kind processors: turn raw watch objects into graph mutations.
//!
//! Each processor derives the node's status, fills its kind-specific
//! metadata, upserts it (which also drains pending edges targeting it), and
//! emits the edges implied by the object's spec. A relation whose peer has
//! not been observed yet is registered as a pending edge so it materializes
//! as soon as the peer appears.

mod base;
mod core;
mod networking;
mod workloads;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, warn};

use crate::graph::GraphOps;

/// What happened to the object. The watch source collapses ADD and UPDATE
/// into `Applied`; processors upsert by UID, so the distinction does not
/// matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Applied,
    Deleted,
}

/// A kind-specific event handler.
pub trait Processor: Send + Sync {
    fn process(&self, obj: &Value, event: EventType) -> Result<()>;
}

/// Dispatch table from kind name to processor.
pub struct ProcessorRegistry {
    processors: HashMap<&'static str, Box<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new(graph: Arc<dyn GraphOps>) -> Self {
        let mut processors: HashMap<&'static str, Box<dyn Processor>> = HashMap::new();

        // Core resources
        processors.insert("Pod", Box::new(core::PodProcessor::new(graph.clone())));
        processors.insert("Service", Box::new(core::ServiceProcessor::new(graph.clone())));
        processors.insert(
            "ServiceAccount",
            Box::new(core::ServiceAccountProcessor::new(graph.clone())),
        );
        processors.insert("ConfigMap", Box::new(core::ConfigMapProcessor::new(graph.clone())));
        processors.insert("Secret", Box::new(core::SecretProcessor::new(graph.clone())));
        processors.insert(
            "PersistentVolumeClaim",
            Box::new(core::PvcProcessor::new(graph.clone())),
        );
        processors.insert(
            "PersistentVolume",
            Box::new(core::PvProcessor::new(graph.clone())),
        );
        processors.insert("Namespace", Box::new(core::NamespaceProcessor::new(graph.clone())));

        // Apps resources
        processors.insert(
            "Deployment",
            Box::new(workloads::DeploymentProcessor::new(graph.clone())),
        );
        processors.insert(
            "StatefulSet",
            Box::new(workloads::StatefulSetProcessor::new(graph.clone())),
        );
        processors.insert(
            "DaemonSet",
            Box::new(workloads::DaemonSetProcessor::new(graph.clone())),
        );
        processors.insert(
            "ReplicaSet",
            Box::new(workloads::ReplicaSetProcessor::new(graph.clone())),
        );

        // Batch resources
        processors.insert("Job", Box::new(workloads::JobProcessor::new(graph.clone())));
        processors.insert("CronJob", Box::new(workloads::CronJobProcessor::new(graph.clone())));

        // Networking resources
        processors.insert(
            "Ingress",
            Box::new(networking::IngressProcessor::new(graph.clone())),
        );
        processors.insert(
            "EndpointSlice",
            Box::new(networking::EndpointSliceProcessor::new(graph.clone())),
        );

        // Storage resources
        processors.insert(
            "StorageClass",
            Box::new(networking::StorageClassProcessor::new(graph.clone())),
        );

        // Autoscaling resources
        processors.insert(
            "HorizontalPodAutoscaler",
            Box::new(networking::HpaProcessor::new(graph.clone())),
        );

        // Policy resources
        processors.insert(
            "PodDisruptionBudget",
            Box::new(networking::PdbProcessor::new(graph)),
        );

        Self { processors }
    }

    /// Route an event to the processor registered for its kind. Per-object
    /// failures are logged and swallowed; unknown kinds are dropped.
    pub fn process(&self, kind: &str, obj: &Value, event: EventType) {
        match self.processors.get(kind) {
            Some(processor) => {
                if let Err(err) = processor.process(obj, event) {
                    warn!(kind, ?event, %err, "failed to process event");
                }
            }
            None => debug!(kind, "no processor registered, dropping event"),
        }
    }
}
