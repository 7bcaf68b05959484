//! Processors for workload resources (apps/v1 and batch/v1).

use std::sync::Arc;

use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::PodSpec;
use serde_json::Value;
use tracing::debug;

use crate::graph::{node_from_meta, GraphOps, Node, ReplicaInfo, ResourceMetadata, ResourceStatus, Uid};
use crate::processors::base;
use crate::processors::{EventType, Processor};

/// Status for replica-driven workloads. 0/0 counts as ready (scaled to
/// zero); zero ready replicas with a non-zero goal is an error.
fn replica_status(desired: i32, ready: i32) -> (ResourceStatus, String) {
    if desired == 0 && ready == 0 {
        (ResourceStatus::Ready, "Scaled to zero (0/0)".to_string())
    } else if ready == desired {
        (
            ResourceStatus::Ready,
            format!("All replicas ready ({ready}/{desired})"),
        )
    } else if ready == 0 && desired > 0 {
        (
            ResourceStatus::Error,
            format!("No replicas ready (0/{desired})"),
        )
    } else {
        (
            ResourceStatus::Pending,
            format!("Partially ready ({ready}/{desired})"),
        )
    }
}

/// Upsert a workload node and emit the edges its pod template implies.
fn finish_workload(
    graph: &dyn GraphOps,
    node: &Node,
    owner_refs: Option<&Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference>>,
    template_spec: Option<&PodSpec>,
) {
    graph.upsert_node(node.clone());
    base::create_ownership_edges(graph, node, owner_refs);
    if let Some(spec) = template_spec {
        base::create_config_edges(graph, node, spec);
        base::create_service_account_edge(graph, node, spec);
    }
}

// === Deployment ===

pub(crate) struct DeploymentProcessor {
    graph: Arc<dyn GraphOps>,
}

impl DeploymentProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for DeploymentProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let deployment: Deployment =
            serde_json::from_value(obj.clone()).context("expected Deployment")?;
        let graph = self.graph.as_ref();
        if event == EventType::Deleted {
            return base::handle_delete(graph, &deployment.metadata, "Deployment");
        }

        let mut node = node_from_meta(&deployment.metadata, "Deployment", "apps/v1")?;
        let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let status = deployment.status.as_ref();
        let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
        (node.status, node.status_message) = replica_status(desired, ready);

        let template_spec = deployment
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref());
        node.metadata = Some(ResourceMetadata {
            replicas: Some(ReplicaInfo {
                desired,
                current: status.and_then(|s| s.replicas).unwrap_or(0),
                ready,
                available: status.and_then(|s| s.available_replicas).unwrap_or(0),
            }),
            image: template_spec.and_then(base::first_container_image),
            ..ResourceMetadata::default()
        });

        finish_workload(
            graph,
            &node,
            deployment.metadata.owner_references.as_ref(),
            template_spec,
        );
        Ok(())
    }
}

// === StatefulSet ===

pub(crate) struct StatefulSetProcessor {
    graph: Arc<dyn GraphOps>,
}

impl StatefulSetProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for StatefulSetProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let sts: StatefulSet = serde_json::from_value(obj.clone()).context("expected StatefulSet")?;
        let graph = self.graph.as_ref();
        if event == EventType::Deleted {
            return base::handle_delete(graph, &sts.metadata, "StatefulSet");
        }

        let mut node = node_from_meta(&sts.metadata, "StatefulSet", "apps/v1")?;
        let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let status = sts.status.as_ref();
        let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
        (node.status, node.status_message) = replica_status(desired, ready);

        let template_spec = sts.spec.as_ref().and_then(|s| s.template.spec.as_ref());
        node.metadata = Some(ResourceMetadata {
            replicas: Some(ReplicaInfo {
                desired,
                current: status.map(|s| s.replicas).unwrap_or(0),
                ready,
                available: status.and_then(|s| s.available_replicas).unwrap_or(0),
            }),
            image: template_spec.and_then(base::first_container_image),
            ..ResourceMetadata::default()
        });

        finish_workload(graph, &node, sts.metadata.owner_references.as_ref(), template_spec);
        Ok(())
    }
}

// === DaemonSet ===

pub(crate) struct DaemonSetProcessor {
    graph: Arc<dyn GraphOps>,
}

impl DaemonSetProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for DaemonSetProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let ds: DaemonSet = serde_json::from_value(obj.clone()).context("expected DaemonSet")?;
        let graph = self.graph.as_ref();
        if event == EventType::Deleted {
            return base::handle_delete(graph, &ds.metadata, "DaemonSet");
        }

        let mut node = node_from_meta(&ds.metadata, "DaemonSet", "apps/v1")?;
        let status = ds.status.as_ref();
        let desired = status.map(|s| s.desired_number_scheduled).unwrap_or(0);
        let ready = status.map(|s| s.number_ready).unwrap_or(0);
        (node.status, node.status_message) = daemonset_status(desired, ready);

        let template_spec = ds.spec.as_ref().and_then(|s| s.template.spec.as_ref());
        node.metadata = Some(ResourceMetadata {
            replicas: Some(ReplicaInfo {
                desired,
                current: status.map(|s| s.current_number_scheduled).unwrap_or(0),
                ready,
                available: status.and_then(|s| s.number_available).unwrap_or(0),
            }),
            image: template_spec.and_then(base::first_container_image),
            ..ResourceMetadata::default()
        });

        finish_workload(graph, &node, ds.metadata.owner_references.as_ref(), template_spec);
        Ok(())
    }
}

fn daemonset_status(desired: i32, ready: i32) -> (ResourceStatus, String) {
    if desired == 0 && ready == 0 {
        (ResourceStatus::Ready, "No nodes to schedule (0/0)".to_string())
    } else if ready == desired {
        (
            ResourceStatus::Ready,
            format!("All pods ready ({ready}/{desired})"),
        )
    } else if ready == 0 && desired > 0 {
        (ResourceStatus::Error, format!("No pods ready (0/{desired})"))
    } else {
        (
            ResourceStatus::Pending,
            format!("Partially ready ({ready}/{desired})"),
        )
    }
}

// === ReplicaSet ===

pub(crate) struct ReplicaSetProcessor {
    graph: Arc<dyn GraphOps>,
}

impl ReplicaSetProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for ReplicaSetProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let rs: ReplicaSet = serde_json::from_value(obj.clone()).context("expected ReplicaSet")?;
        let graph = self.graph.as_ref();
        if event == EventType::Deleted {
            return base::handle_delete(graph, &rs.metadata, "ReplicaSet");
        }

        // Inactive ReplicaSets (old rollout generations kept around at zero
        // replicas) are not admitted to the graph. One that scales down to
        // zero after being admitted is evicted.
        let status = rs.status.as_ref();
        let current = status.map(|s| s.replicas).unwrap_or(0);
        let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
        if current == 0 && ready == 0 {
            debug!(
                namespace = rs.metadata.namespace.as_deref().unwrap_or(""),
                name = rs.metadata.name.as_deref().unwrap_or(""),
                "skipping inactive ReplicaSet"
            );
            if let Some(uid) = rs.metadata.uid.as_deref() {
                graph.remove_node(&Uid::from(uid));
            }
            return Ok(());
        }

        let mut node = node_from_meta(&rs.metadata, "ReplicaSet", "apps/v1")?;
        let desired = rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        (node.status, node.status_message) = replica_status(desired, ready);

        let template_spec = rs
            .spec
            .as_ref()
            .and_then(|s| s.template.as_ref())
            .and_then(|t| t.spec.as_ref());
        node.metadata = Some(ResourceMetadata {
            replicas: Some(ReplicaInfo {
                desired,
                current,
                ready,
                available: status.and_then(|s| s.available_replicas).unwrap_or(0),
            }),
            image: template_spec.and_then(base::first_container_image),
            ..ResourceMetadata::default()
        });

        finish_workload(graph, &node, rs.metadata.owner_references.as_ref(), template_spec);
        Ok(())
    }
}

// === Job ===

pub(crate) struct JobProcessor {
    graph: Arc<dyn GraphOps>,
}

impl JobProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for JobProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let job: Job = serde_json::from_value(obj.clone()).context("expected Job")?;
        let graph = self.graph.as_ref();
        if event == EventType::Deleted {
            return base::handle_delete(graph, &job.metadata, "Job");
        }

        let mut node = node_from_meta(&job.metadata, "Job", "batch/v1")?;
        let status = job.status.as_ref();
        let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
        let failed = status.and_then(|s| s.failed).unwrap_or(0);
        let active = status.and_then(|s| s.active).unwrap_or(0);
        (node.status, node.status_message) = if succeeded > 0 {
            (ResourceStatus::Ready, "Job completed successfully".to_string())
        } else if failed > 0 {
            (ResourceStatus::Error, format!("Job failed ({failed} failures)"))
        } else if active > 0 {
            (ResourceStatus::Pending, "Job is running".to_string())
        } else {
            (ResourceStatus::Pending, "Job is pending".to_string())
        };

        let template_spec = job
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref());
        if let Some(image) = template_spec.and_then(base::first_container_image) {
            node.metadata = Some(ResourceMetadata {
                image: Some(image),
                ..ResourceMetadata::default()
            });
        }

        finish_workload(graph, &node, job.metadata.owner_references.as_ref(), template_spec);
        Ok(())
    }
}

// === CronJob ===

pub(crate) struct CronJobProcessor {
    graph: Arc<dyn GraphOps>,
}

impl CronJobProcessor {
    pub(crate) fn new(graph: Arc<dyn GraphOps>) -> Self {
        Self { graph }
    }
}

impl Processor for CronJobProcessor {
    fn process(&self, obj: &Value, event: EventType) -> Result<()> {
        let cron_job: CronJob = serde_json::from_value(obj.clone()).context("expected CronJob")?;
        let graph = self.graph.as_ref();
        if event == EventType::Deleted {
            return base::handle_delete(graph, &cron_job.metadata, "CronJob");
        }

        let mut node = node_from_meta(&cron_job.metadata, "CronJob", "batch/v1")?;
        let active = cron_job
            .status
            .as_ref()
            .and_then(|s| s.active.as_ref())
            .map(|a| a.len())
            .unwrap_or(0);
        (node.status, node.status_message) = if active > 0 {
            (ResourceStatus::Pending, format!("{active} active job(s)"))
        } else {
            (ResourceStatus::Ready, "CronJob scheduled".to_string())
        };

        let template_spec = cron_job
            .spec
            .as_ref()
            .and_then(|s| s.job_template.spec.as_ref())
            .and_then(|js| js.template.spec.as_ref());
        if let Some(image) = template_spec.and_then(base::first_container_image) {
            node.metadata = Some(ResourceMetadata {
                image: Some(image),
                ..ResourceMetadata::default()
            });
        }

        finish_workload(
            graph,
            &node,
            cron_job.metadata.owner_references.as_ref(),
            template_spec,
        );
        Ok(())
    }
}
