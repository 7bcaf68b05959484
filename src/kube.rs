//! Kubernetes client construction.
//!
//! Credential source resolution, in order: in-cluster configuration when
//! requested and no explicit kubeconfig is given, then the provided
//! kubeconfig path, then the standard discovery chain (`KUBECONFIG`,
//! `~/.kube/config`).

use std::path::Path;

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, warn};

pub async fn create_client(kubeconfig: Option<&Path>, in_cluster: bool) -> Result<Client> {
    if in_cluster && kubeconfig.is_none() {
        match Config::incluster() {
            Ok(config) => {
                debug!("using in-cluster kubernetes configuration");
                return Client::try_from(config).context("building in-cluster client");
            }
            Err(err) => {
                warn!(%err, "in-cluster configuration unavailable, falling back to kubeconfig");
            }
        }
    }

    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("loading kubeconfig from {}", path.display()))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .with_context(|| format!("building config from {}", path.display()))?
        }
        None => Config::infer()
            .await
            .context("inferring kubernetes configuration")?,
    };

    debug!(cluster_url = %config.cluster_url, "kubernetes client configured");
    Client::try_from(config).context("building kubernetes client")
}
