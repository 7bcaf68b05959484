//! Per-kind status derivation and edge emission.

mod common;

use std::sync::Arc;

use astrolabe::graph::{EdgeType, Graph, ResourceStatus, Uid};
use astrolabe::processors::{EventType, ProcessorRegistry};
use common::*;
use serde_json::json;

fn setup() -> (Arc<Graph>, ProcessorRegistry) {
    let graph = Arc::new(Graph::new());
    let registry = ProcessorRegistry::new(graph.clone());
    (graph, registry)
}

fn status_of(graph: &Graph, uid: &str) -> (ResourceStatus, String) {
    let node = graph.get_node(&Uid::from(uid)).unwrap();
    (node.status, node.status_message)
}

#[test]
fn pod_status_rules() {
    let (graph, registry) = setup();

    registry.process("Pod", &pod(meta("p1", "demo", "ok"), "Running"), EventType::Applied);
    assert_eq!(status_of(&graph, "p1").0, ResourceStatus::Ready);

    registry.process("Pod", &pod(meta("p2", "demo", "done"), "Succeeded"), EventType::Applied);
    assert_eq!(status_of(&graph, "p2").0, ResourceStatus::Ready);

    registry.process("Pod", &pod(meta("p3", "demo", "bad"), "Failed"), EventType::Applied);
    assert_eq!(status_of(&graph, "p3").0, ResourceStatus::Error);

    registry.process("Pod", &pod(meta("p4", "demo", "waiting"), "Pending"), EventType::Applied);
    assert_eq!(status_of(&graph, "p4").0, ResourceStatus::Pending);

    // Running but with a waiting container.
    let mut crashing = pod(meta("p5", "demo", "crash"), "Running");
    crashing["status"]["containerStatuses"] = json!([{
        "name": "app",
        "ready": false,
        "restartCount": 4,
        "image": "app:1.0",
        "imageID": "",
        "state": {"waiting": {"reason": "CrashLoopBackOff"}},
    }]);
    registry.process("Pod", &crashing, EventType::Applied);
    let (status, message) = status_of(&graph, "p5");
    assert_eq!(status, ResourceStatus::Pending);
    assert!(message.contains("CrashLoopBackOff"));
    let node = graph.get_node(&Uid::from("p5")).unwrap();
    assert_eq!(node.metadata.as_ref().unwrap().restart_count, Some(4));

    // Running with a terminated container.
    let mut oom = pod(meta("p6", "demo", "oom"), "Running");
    oom["status"]["containerStatuses"] = json!([{
        "name": "app",
        "ready": false,
        "restartCount": 1,
        "image": "app:1.0",
        "imageID": "",
        "state": {"terminated": {"reason": "OOMKilled", "exitCode": 137}},
    }]);
    registry.process("Pod", &oom, EventType::Applied);
    let (status, message) = status_of(&graph, "p6");
    assert_eq!(status, ResourceStatus::Error);
    assert!(message.contains("OOMKilled"));
}

#[test]
fn deployment_status_rules() {
    let (graph, registry) = setup();

    registry.process("Deployment", &deployment(meta("d1", "demo", "zero"), 0, 0), EventType::Applied);
    let (status, message) = status_of(&graph, "d1");
    assert_eq!(status, ResourceStatus::Ready);
    assert!(message.contains("0/0"));

    registry.process("Deployment", &deployment(meta("d2", "demo", "ok"), 3, 3), EventType::Applied);
    assert_eq!(status_of(&graph, "d2").0, ResourceStatus::Ready);

    registry.process("Deployment", &deployment(meta("d3", "demo", "down"), 3, 0), EventType::Applied);
    assert_eq!(status_of(&graph, "d3").0, ResourceStatus::Error);

    let mut partial = deployment(meta("d4", "demo", "rolling"), 3, 3);
    partial["status"]["readyReplicas"] = json!(2);
    registry.process("Deployment", &partial, EventType::Applied);
    assert_eq!(status_of(&graph, "d4").0, ResourceStatus::Pending);
}

#[test]
fn pvc_and_pv_status_rules() {
    let (graph, registry) = setup();

    registry.process(
        "PersistentVolumeClaim",
        &pvc(meta("c1", "demo", "data"), Some("vol-1"), "Bound"),
        EventType::Applied,
    );
    assert_eq!(status_of(&graph, "c1").0, ResourceStatus::Ready);

    registry.process(
        "PersistentVolumeClaim",
        &pvc(meta("c2", "demo", "lost"), None, "Lost"),
        EventType::Applied,
    );
    assert_eq!(status_of(&graph, "c2").0, ResourceStatus::Error);

    registry.process("PersistentVolume", &pv(meta("v1", "", "vol-9"), "Released"), EventType::Applied);
    assert_eq!(status_of(&graph, "v1").0, ResourceStatus::Pending);
}

#[test]
fn pod_config_references_materialize_late() {
    let (graph, registry) = setup();

    let mut p = pod(meta("p", "demo", "web"), "Running");
    p["spec"] = json!({
        "containers": [{
            "name": "app",
            "image": "app:1.0",
            "envFrom": [{"configMapRef": {"name": "settings"}}],
            "env": [{"name": "TOKEN", "valueFrom": {"secretKeyRef": {"name": "creds", "key": "token"}}}],
        }],
        "volumes": [{"name": "data", "persistentVolumeClaim": {"claimName": "data"}}],
        "serviceAccountName": "runner",
    });
    registry.process("Pod", &p, EventType::Applied);

    // Nothing exists yet; every relation is pending.
    let node = graph.get_node(&Uid::from("p")).unwrap();
    assert!(node.outgoing.is_empty());

    registry.process("ConfigMap", &config_map(meta("cm", "demo", "settings")), EventType::Applied);
    registry.process(
        "Secret",
        &json!({"apiVersion": "v1", "kind": "Secret", "metadata": meta("sec", "demo", "creds")}),
        EventType::Applied,
    );
    registry.process(
        "PersistentVolumeClaim",
        &pvc(meta("claim", "demo", "data"), None, "Bound"),
        EventType::Applied,
    );
    registry.process(
        "ServiceAccount",
        &json!({"apiVersion": "v1", "kind": "ServiceAccount", "metadata": meta("sa", "demo", "runner")}),
        EventType::Applied,
    );

    let node = graph.get_node(&Uid::from("p")).unwrap();
    assert_eq!(node.outgoing.get(&Uid::from("cm")).unwrap().edge_type, EdgeType::UsesConfigMap);
    assert_eq!(node.outgoing.get(&Uid::from("sec")).unwrap().edge_type, EdgeType::UsesSecret);
    assert_eq!(node.outgoing.get(&Uid::from("claim")).unwrap().edge_type, EdgeType::Mounts);
    assert_eq!(
        node.outgoing.get(&Uid::from("sa")).unwrap().edge_type,
        EdgeType::UsesServiceAccount
    );
}

#[test]
fn service_selector_matches_pods() {
    let (graph, registry) = setup();

    registry.process(
        "Service",
        &service(meta("s", "n", "web"), json!({"app": "x"})),
        EventType::Applied,
    );
    registry.process(
        "Pod",
        &pod(with_labels(meta("p1", "n", "web-1"), json!({"app": "x"})), "Running"),
        EventType::Applied,
    );
    registry.process(
        "Pod",
        &pod(with_labels(meta("p2", "n", "other-1"), json!({"app": "y"})), "Running"),
        EventType::Applied,
    );

    let svc = graph.get_node(&Uid::from("s")).unwrap();
    assert!(svc.outgoing.contains_key(&Uid::from("p1")));
    assert!(!svc.outgoing.contains_key(&Uid::from("p2")));

    // Relabeling the second pod connects it on its own update event.
    registry.process(
        "Pod",
        &pod(with_labels(meta("p2", "n", "other-1"), json!({"app": "x"})), "Running"),
        EventType::Applied,
    );
    let svc = graph.get_node(&Uid::from("s")).unwrap();
    assert!(svc.outgoing.contains_key(&Uid::from("p2")));
}

#[test]
fn endpoint_slice_edge_directions() {
    let (graph, registry) = setup();

    registry.process("Service", &service(meta("s", "demo", "web"), json!({})), EventType::Applied);
    registry.process(
        "Pod",
        &pod(meta("p", "demo", "web-1"), "Running"),
        EventType::Applied,
    );

    let slice = json!({
        "apiVersion": "discovery.k8s.io/v1",
        "kind": "EndpointSlice",
        "metadata": with_labels(
            meta("es", "demo", "web-abc"),
            json!({"kubernetes.io/service-name": "web"}),
        ),
        "addressType": "IPv4",
        "endpoints": [{
            "addresses": ["10.1.0.4"],
            "conditions": {"ready": true},
            "targetRef": {"kind": "Pod", "name": "web-1", "namespace": "demo"},
        }],
    });
    registry.process("EndpointSlice", &slice, EventType::Applied);

    // Service -> slice, slice -> pod.
    let svc = graph.get_node(&Uid::from("s")).unwrap();
    assert_eq!(svc.outgoing.get(&Uid::from("es")).unwrap().edge_type, EdgeType::Endpoints);
    let es = graph.get_node(&Uid::from("es")).unwrap();
    assert_eq!(es.outgoing.get(&Uid::from("p")).unwrap().edge_type, EdgeType::Selects);
    assert_eq!(es.status, ResourceStatus::Ready);
}

#[test]
fn endpoint_slice_waits_for_service() {
    let (graph, registry) = setup();

    let slice = json!({
        "apiVersion": "discovery.k8s.io/v1",
        "kind": "EndpointSlice",
        "metadata": with_labels(
            meta("es", "demo", "web-abc"),
            json!({"kubernetes.io/service-name": "web"}),
        ),
        "addressType": "IPv4",
        "endpoints": [],
    });
    registry.process("EndpointSlice", &slice, EventType::Applied);
    registry.process("Service", &service(meta("s", "demo", "web"), json!({})), EventType::Applied);

    let svc = graph.get_node(&Uid::from("s")).unwrap();
    assert_eq!(svc.outgoing.get(&Uid::from("es")).unwrap().edge_type, EdgeType::Endpoints);
}

#[test]
fn hpa_scales_target_even_when_observed_first() {
    let (graph, registry) = setup();

    let hpa = json!({
        "apiVersion": "autoscaling/v2",
        "kind": "HorizontalPodAutoscaler",
        "metadata": meta("h", "demo", "web"),
        "spec": {
            "maxReplicas": 5,
            "minReplicas": 1,
            "scaleTargetRef": {"apiVersion": "apps/v1", "kind": "Deployment", "name": "web"},
        },
        "status": {
            "desiredReplicas": 2,
            "currentReplicas": 2,
            "conditions": [{"type": "AbleToScale", "status": "True"}],
        },
    });
    registry.process("HorizontalPodAutoscaler", &hpa, EventType::Applied);
    assert_eq!(status_of(&graph, "h").0, ResourceStatus::Ready);

    registry.process("Deployment", &deployment(meta("d", "demo", "web"), 2, 2), EventType::Applied);

    let h = graph.get_node(&Uid::from("h")).unwrap();
    assert_eq!(h.outgoing.get(&Uid::from("d")).unwrap().edge_type, EdgeType::Scales);
    let meta = h.metadata.unwrap();
    assert_eq!(meta.max_replicas, Some(5));
    assert_eq!(meta.scale_target_ref.unwrap().name, "web");
}

#[test]
fn ingress_routes_to_services() {
    let (graph, registry) = setup();

    registry.process("Service", &service(meta("s", "demo", "web"), json!({})), EventType::Applied);

    let ingress = json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": meta("i", "demo", "edge"),
        "spec": {
            "ingressClassName": "nginx",
            "rules": [{
                "host": "example.test",
                "http": {"paths": [{
                    "path": "/",
                    "pathType": "Prefix",
                    "backend": {"service": {"name": "web", "port": {"number": 80}}},
                }]},
            }],
        },
        "status": {"loadBalancer": {"ingress": [{"ip": "203.0.113.7"}]}},
    });
    registry.process("Ingress", &ingress, EventType::Applied);

    let (status, _) = status_of(&graph, "i");
    assert_eq!(status, ResourceStatus::Ready);
    let i = graph.get_node(&Uid::from("i")).unwrap();
    assert_eq!(i.outgoing.get(&Uid::from("s")).unwrap().edge_type, EdgeType::RoutesTo);
    assert_eq!(i.metadata.unwrap().ingress_class.as_deref(), Some("nginx"));
}

#[test]
fn pdb_selects_pods_in_both_directions() {
    let (graph, registry) = setup();

    let pdb = json!({
        "apiVersion": "policy/v1",
        "kind": "PodDisruptionBudget",
        "metadata": meta("b", "demo", "web-pdb"),
        "spec": {"selector": {"matchLabels": {"app": "x"}}},
        "status": {
            "currentHealthy": 2,
            "desiredHealthy": 2,
            "disruptionsAllowed": 1,
            "expectedPods": 2,
        },
    });
    registry.process("PodDisruptionBudget", &pdb, EventType::Applied);
    assert_eq!(status_of(&graph, "b").0, ResourceStatus::Ready);

    // Pod observed after the PDB still gains the edge.
    registry.process(
        "Pod",
        &pod(with_labels(meta("p", "demo", "web-1"), json!({"app": "x"})), "Running"),
        EventType::Applied,
    );
    let b = graph.get_node(&Uid::from("b")).unwrap();
    assert_eq!(b.outgoing.get(&Uid::from("p")).unwrap().edge_type, EdgeType::Selects);
}

#[test]
fn pvc_binds_pv_in_either_order() {
    let (graph, registry) = setup();

    // PV first.
    registry.process("PersistentVolume", &pv(meta("v1", "", "vol-1"), "Bound"), EventType::Applied);
    registry.process(
        "PersistentVolumeClaim",
        &pvc(meta("c1", "demo", "data"), Some("vol-1"), "Bound"),
        EventType::Applied,
    );
    let c1 = graph.get_node(&Uid::from("c1")).unwrap();
    assert_eq!(c1.outgoing.get(&Uid::from("v1")).unwrap().edge_type, EdgeType::Binds);

    // Claim first.
    registry.process(
        "PersistentVolumeClaim",
        &pvc(meta("c2", "demo", "cache"), Some("vol-2"), "Pending"),
        EventType::Applied,
    );
    registry.process("PersistentVolume", &pv(meta("v2", "", "vol-2"), "Available"), EventType::Applied);
    let c2 = graph.get_node(&Uid::from("c2")).unwrap();
    assert_eq!(c2.outgoing.get(&Uid::from("v2")).unwrap().edge_type, EdgeType::Binds);
}

#[test]
fn namespace_and_cronjob_status() {
    let (graph, registry) = setup();

    registry.process(
        "Namespace",
        &json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": meta("ns", "", "demo"),
            "status": {"phase": "Terminating"},
        }),
        EventType::Applied,
    );
    assert_eq!(status_of(&graph, "ns").0, ResourceStatus::Pending);

    registry.process(
        "CronJob",
        &json!({
            "apiVersion": "batch/v1",
            "kind": "CronJob",
            "metadata": meta("cj", "demo", "nightly"),
            "spec": {
                "schedule": "0 3 * * *",
                "jobTemplate": {"spec": {"template": {"spec": {"containers": [{"name": "job", "image": "job:1"}]}}}},
            },
            "status": {"active": [{"name": "nightly-1"}]},
        }),
        EventType::Applied,
    );
    let (status, message) = status_of(&graph, "cj");
    assert_eq!(status, ResourceStatus::Pending);
    assert!(message.contains("1 active"));
}
