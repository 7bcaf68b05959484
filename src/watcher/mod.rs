//! Event pump: binds watch streams to the processor registry.
//!
//! One task is spawned per tracked kind. Each task drives a
//! `kube::runtime::watcher` stream over `Api::all`, serializes every object
//! to JSON, and dispatches it synchronously through the registry, so
//! back-pressure is borne by the watch stream itself. The watcher replays
//! existing objects as `InitApply` events on (re)start; processors upsert by
//! UID, which makes those replays idempotent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::watcher;
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::processors::{EventType, ProcessorRegistry};

struct Readiness {
    expected: AtomicUsize,
    synced: AtomicUsize,
    tx: watch::Sender<bool>,
}

impl Readiness {
    fn new() -> (Arc<Self>, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Arc::new(Self {
                expected: AtomicUsize::new(0),
                synced: AtomicUsize::new(0),
                tx,
            }),
            rx,
        )
    }

    fn expect_one(&self) {
        self.expected.fetch_add(1, Ordering::SeqCst);
    }

    fn mark_synced(&self, kind: &str) {
        let synced = self.synced.fetch_add(1, Ordering::SeqCst) + 1;
        let expected = self.expected.load(Ordering::SeqCst);
        debug!(kind, synced, expected, "watch cache synced");
        if synced == expected {
            info!("all watch caches synced");
            let _ = self.tx.send(true);
        }
    }
}

/// Watches every tracked kind and feeds events into the processor registry.
pub struct EventPump {
    client: Client,
    label_selector: Option<String>,
    registry: Arc<ProcessorRegistry>,
    handles: Vec<JoinHandle<()>>,
    readiness: Arc<Readiness>,
    ready_rx: watch::Receiver<bool>,
}

impl EventPump {
    pub fn new(
        client: Client,
        label_selector: Option<String>,
        registry: Arc<ProcessorRegistry>,
    ) -> Self {
        let (readiness, ready_rx) = Readiness::new();
        Self {
            client,
            label_selector,
            registry,
            handles: Vec::new(),
            readiness,
            ready_rx,
        }
    }

    /// Receiver that flips to true once every registered kind has delivered
    /// its initial listing.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready_rx.clone()
    }

    /// Start watching one kind. `filtered` applies the configured label
    /// selector; cluster-scoped kinds whose objects never carry release
    /// labels must pass `false` so they arrive on an unfiltered channel.
    fn watch_kind<K>(&mut self, kind: &'static str, filtered: bool)
    where
        K: kube::Resource<DynamicType = ()>
            + Clone
            + std::fmt::Debug
            + Serialize
            + DeserializeOwned
            + Send
            + Sync
            + 'static,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let mut config = watcher::Config::default();
        if filtered {
            if let Some(selector) = &self.label_selector {
                config = config.labels(selector);
            }
        }

        let registry = self.registry.clone();
        let readiness = self.readiness.clone();
        self.readiness.expect_one();

        let handle = tokio::spawn(async move {
            let mut stream = Box::pin(watcher(api, config));
            let mut synced = false;
            let mut error_count = 0u32;

            while let Some(event) = stream.next().await {
                match event {
                    Ok(watcher::Event::InitApply(obj)) | Ok(watcher::Event::Apply(obj)) => {
                        error_count = 0;
                        dispatch(&registry, kind, &obj, EventType::Applied);
                    }
                    Ok(watcher::Event::Delete(obj)) => {
                        error_count = 0;
                        dispatch(&registry, kind, &obj, EventType::Deleted);
                    }
                    Ok(watcher::Event::Init) => {}
                    Ok(watcher::Event::InitDone) => {
                        error_count = 0;
                        if !synced {
                            synced = true;
                            readiness.mark_synced(kind);
                        }
                    }
                    Err(err) => {
                        error_count += 1;
                        // The watcher keeps retrying internally; only log
                        // occasionally to avoid spam.
                        if error_count == 1 || error_count % 10 == 0 {
                            warn!(kind, error_count, %err, "watch error, retrying");
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
        self.handles.push(handle);
    }

    /// Register watchers for every tracked kind.
    pub fn watch_all(&mut self) {
        use k8s_openapi::api::apps::v1 as apps;
        use k8s_openapi::api::autoscaling::v2 as autoscaling;
        use k8s_openapi::api::batch::v1 as batch;
        use k8s_openapi::api::core::v1 as core;
        use k8s_openapi::api::discovery::v1 as discovery;
        use k8s_openapi::api::networking::v1 as networking;
        use k8s_openapi::api::policy::v1 as policy;
        use k8s_openapi::api::storage::v1 as storage;

        // Core resources
        self.watch_kind::<core::Pod>("Pod", true);
        self.watch_kind::<core::Service>("Service", true);
        self.watch_kind::<core::ServiceAccount>("ServiceAccount", true);
        self.watch_kind::<core::ConfigMap>("ConfigMap", true);
        self.watch_kind::<core::Secret>("Secret", true);
        self.watch_kind::<core::PersistentVolumeClaim>("PersistentVolumeClaim", true);
        self.watch_kind::<core::PersistentVolume>("PersistentVolume", false);
        self.watch_kind::<core::Namespace>("Namespace", true);

        // Apps resources
        self.watch_kind::<apps::Deployment>("Deployment", true);
        self.watch_kind::<apps::StatefulSet>("StatefulSet", true);
        self.watch_kind::<apps::DaemonSet>("DaemonSet", true);
        self.watch_kind::<apps::ReplicaSet>("ReplicaSet", true);

        // Batch resources
        self.watch_kind::<batch::Job>("Job", true);
        self.watch_kind::<batch::CronJob>("CronJob", true);

        // Networking resources
        self.watch_kind::<networking::Ingress>("Ingress", true);
        self.watch_kind::<discovery::EndpointSlice>("EndpointSlice", true);

        // Storage resources
        self.watch_kind::<storage::StorageClass>("StorageClass", false);

        // Autoscaling resources
        self.watch_kind::<autoscaling::HorizontalPodAutoscaler>("HorizontalPodAutoscaler", true);

        // Policy resources
        self.watch_kind::<policy::PodDisruptionBudget>("PodDisruptionBudget", true);

        info!(
            kinds = self.handles.len(),
            selector = self.label_selector.as_deref().unwrap_or("<none>"),
            "event pump started"
        );
    }

    /// Abort all watcher tasks.
    pub fn stop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
        self.handles.clear();
    }
}

fn dispatch<K: Serialize>(registry: &ProcessorRegistry, kind: &str, obj: &K, event: EventType) {
    match serde_json::to_value(obj) {
        Ok(value) => registry.process(kind, &value, event),
        Err(err) => warn!(kind, %err, "failed to serialize watch object"),
    }
}
