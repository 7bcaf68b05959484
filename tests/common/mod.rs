//! Shared fixture builders for integration tests: minimal JSON objects in
//! the shape the watch source delivers.
#![allow(dead_code)]

use serde_json::{json, Value};

pub fn meta(uid: &str, namespace: &str, name: &str) -> Value {
    json!({
        "uid": uid,
        "namespace": namespace,
        "name": name,
        "resourceVersion": "1",
        "creationTimestamp": "2024-01-01T00:00:00Z",
    })
}

/// Object meta carrying the Helm release/chart annotations.
pub fn helm_meta(uid: &str, namespace: &str, name: &str, release: &str) -> Value {
    let mut m = meta(uid, namespace, name);
    m["annotations"] = json!({
        "meta.helm.sh/release-name": release,
        "helm.sh/chart": format!("{release}-1.0.0"),
    });
    m
}

pub fn with_labels(mut meta: Value, labels: Value) -> Value {
    meta["labels"] = labels;
    meta
}

pub fn with_owner(mut meta: Value, owner_uid: &str, kind: &str, name: &str) -> Value {
    meta["ownerReferences"] = json!([{
        "apiVersion": "apps/v1",
        "kind": kind,
        "name": name,
        "uid": owner_uid,
    }]);
    meta
}

pub fn pod(meta: Value, phase: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": meta,
        "spec": {"containers": [{"name": "app", "image": "app:1.0"}]},
        "status": {"phase": phase},
    })
}

pub fn deployment(meta: Value, desired: i32, ready: i32) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": meta,
        "spec": {
            "replicas": desired,
            "selector": {},
            "template": {"spec": {"containers": [{"name": "app", "image": "app:1.0"}]}},
        },
        "status": {"replicas": ready, "readyReplicas": ready, "availableReplicas": ready},
    })
}

pub fn replica_set(meta: Value, desired: i32, current: i32, ready: i32) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "ReplicaSet",
        "metadata": meta,
        "spec": {
            "replicas": desired,
            "selector": {},
            "template": {"spec": {"containers": [{"name": "app", "image": "app:1.0"}]}},
        },
        "status": {"replicas": current, "readyReplicas": ready},
    })
}

pub fn service(meta: Value, selector: Value) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": meta,
        "spec": {"clusterIP": "10.0.0.1", "type": "ClusterIP", "selector": selector},
    })
}

pub fn config_map(meta: Value) -> Value {
    json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": meta})
}

pub fn pvc(meta: Value, volume_name: Option<&str>, phase: &str) -> Value {
    let mut spec = json!({});
    if let Some(volume_name) = volume_name {
        spec["volumeName"] = json!(volume_name);
    }
    json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": meta,
        "spec": spec,
        "status": {"phase": phase},
    })
}

pub fn pv(meta: Value, phase: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "PersistentVolume",
        "metadata": meta,
        "status": {"phase": phase},
    })
}
