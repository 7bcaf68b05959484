//! Astrolabe - Kubernetes state server.
//!
//! Watches the cluster, maintains a live resource relationship graph, and
//! serves it over a read-only JSON API. With persistence enabled, the graph
//! is mirrored into Redis and replayed on the next start.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use astrolabe::api;
use astrolabe::cli;
use astrolabe::graph::{Graph, GraphOps, PersistentGraph};
use astrolabe::kube;
use astrolabe::processors::ProcessorRegistry;
use astrolabe::storage::RedisStore;
use astrolabe::watcher::EventPump;

/// Astrolabe - Kubernetes state server
#[derive(Parser, Debug)]
#[command(name = "astrolabe")]
#[command(about = "Watches a Kubernetes cluster and serves its resource relationship graph", long_about = None)]
struct Args {
    /// Path to a kubeconfig file (uses in-cluster configuration if not set)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Prefer in-cluster configuration
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    in_cluster: bool,

    /// HTTP API server port
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Label selector filtering watched resources (empty tracks everything)
    #[arg(long, env = "LABEL_SELECTOR", default_value = "")]
    label_selector: String,

    /// Mirror the graph into Redis and replay it on startup
    #[arg(long, env = "ENABLE_PERSISTENCE")]
    enable_persistence: bool,

    /// Redis address
    #[arg(long, env = "REDIS_ADDR", default_value = "localhost:6379")]
    redis_addr: String,

    /// Redis password
    #[arg(long, env = "REDIS_PASSWORD", default_value = "", hide_env_values = true)]
    redis_password: String,

    /// Redis database number
    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    redis_db: i64,

    /// Snapshot interval in seconds (0 disables periodic snapshots)
    #[arg(long, default_value_t = 300)]
    snapshot_interval: u64,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    cli::init_logging(args.verbose);

    info!("starting astrolabe");
    if args.label_selector.is_empty() {
        info!("label selector: <empty> (watching all resources)");
    } else {
        info!(selector = %args.label_selector, "label selector active");
    }

    let client = kube::create_client(args.kubeconfig.as_deref(), args.in_cluster)
        .await
        .context("failed to build cluster client")?;

    // Graph store, optionally wrapped with the Redis mirror.
    let persistent = if args.enable_persistence {
        info!(addr = %args.redis_addr, "persistence enabled");
        let backend = RedisStore::connect(&args.redis_addr, &args.redis_password, args.redis_db)
            .await
            .context("failed to create redis store")?;
        let graph = Arc::new(PersistentGraph::new(Arc::new(backend)));
        if let Err(err) = graph.load_from_backend().await {
            warn!(%err, "failed to load graph from redis, starting fresh");
        }
        Some(graph)
    } else {
        info!("persistence disabled, using in-memory graph only");
        None
    };
    let graph: Arc<dyn GraphOps> = match &persistent {
        Some(persistent) => persistent.clone(),
        None => Arc::new(Graph::new()),
    };

    // Event pump: one watch task per tracked kind, all feeding the registry.
    let registry = Arc::new(ProcessorRegistry::new(graph.clone()));
    let selector = (!args.label_selector.is_empty()).then(|| args.label_selector.clone());
    let mut pump = EventPump::new(client, selector, registry);
    pump.watch_all();

    let mut ready = pump.ready();
    let ready_graph = graph.clone();
    tokio::spawn(async move {
        if ready.wait_for(|synced| *synced).await.is_ok() {
            info!(nodes = ready_graph.node_count(), "initial sync complete");
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());

    // HTTP API server.
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("failed to bind port {}", args.port))?;
    info!(port = args.port, "api server listening");
    let app = api::router(graph.clone());
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    // Periodic snapshots.
    if let Some(snapshotter) = persistent.clone().filter(|_| args.snapshot_interval > 0) {
        let mut rx = shutdown_rx.clone();
        let period = Duration::from_secs(args.snapshot_interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = snapshotter.snapshot().await {
                            error!(%err, "failed to create snapshot");
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
        });
        info!(interval_secs = args.snapshot_interval, "periodic snapshots enabled");
    }

    shutdown_signal().await?;
    info!("shutting down");

    // Stop intake first, then flush state.
    let _ = shutdown_tx.send(());
    pump.stop();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(%err, "api server error"),
        Err(err) => error!(%err, "api server task failed"),
    }

    if let Some(persistent) = persistent {
        info!("creating final snapshot");
        if let Err(err) = persistent.snapshot().await {
            error!(%err, "failed to create final snapshot");
        }
        if let Err(err) = persistent.close().await {
            error!(%err, "error closing persistence");
        }
    }

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("installing SIGINT handler")?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("installing ctrl-c handler")?;
    Ok(())
}
