//! HTTP server: a thin projection of the query layer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::api::filtering::{expand_related, include_persistent_volumes};
use crate::api::responses::{build_graph_response, nodes_to_resources, GraphResponse, Resource};
use crate::graph::{GraphOps, Node};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
struct ApiState {
    graph: Arc<dyn GraphOps>,
}

/// Build the API router over a shared graph handle.
pub fn router(graph: Arc<dyn GraphOps>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/resources", get(resources))
        .route("/api/v1/releases", get(releases))
        .route("/api/v1/charts", get(charts))
        .route("/api/v1/namespaces", get(namespaces))
        .route("/api/v1/graph", get(graph_view))
        .fallback(not_found)
        .layer(middleware::from_fn(observe))
        .with_state(ApiState { graph })
}

/// Request logging plus a hard per-request deadline.
async fn observe(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    match tokio::time::timeout(REQUEST_TIMEOUT, next.run(req)).await {
        Ok(response) => {
            debug!(%method, %uri, status = %response.status(), elapsed = ?start.elapsed(), "api request");
            response
        }
        Err(_) => {
            warn!(%method, %uri, "api request timed out");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "request timed out"})),
            )
                .into_response()
        }
    }
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "not found"})),
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct ScopeParams {
    release: Option<String>,
    namespace: Option<String>,
}

impl ScopeParams {
    fn release(&self) -> &str {
        self.release.as_deref().unwrap_or("")
    }

    fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }
}

/// Base node selection shared by the resource and graph views: release
/// scope first, then the namespace filter (cluster-scoped nodes pass any
/// namespace).
fn select_nodes(graph: &dyn GraphOps, release: &str, namespace: &str) -> Vec<Node> {
    let mut nodes = if release.is_empty() {
        graph.all_nodes()
    } else {
        graph.nodes_by_release(release)
    };
    if !namespace.is_empty() {
        nodes.retain(|n| n.namespace == namespace || n.namespace.is_empty());
    }
    nodes
}

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "nodes": state.graph.node_count(),
    }))
}

async fn resources(
    State(state): State<ApiState>,
    Query(params): Query<ScopeParams>,
) -> Json<Vec<Resource>> {
    let graph = state.graph.as_ref();
    let nodes = select_nodes(graph, params.release(), params.namespace());
    let nodes = include_persistent_volumes(graph, nodes, params.release());
    Json(nodes_to_resources(graph, &nodes))
}

async fn releases(
    State(state): State<ApiState>,
    Query(params): Query<ScopeParams>,
) -> Json<Vec<String>> {
    let graph = state.graph.as_ref();
    let mut releases = graph.all_releases();
    if !params.namespace().is_empty() {
        releases.retain(|release| {
            graph
                .nodes_by_release(release)
                .iter()
                .any(|n| n.namespace == params.namespace())
        });
    }
    releases.sort();
    Json(releases)
}

async fn charts(
    State(state): State<ApiState>,
    Query(params): Query<ScopeParams>,
) -> Json<Vec<String>> {
    let graph = state.graph.as_ref();
    let mut charts = if params.namespace().is_empty() {
        graph.all_charts()
    } else {
        graph
            .all_nodes()
            .into_iter()
            .filter(|n| n.namespace == params.namespace() && !n.chart.is_empty())
            .map(|n| n.chart)
            .collect()
    };
    charts.sort();
    charts.dedup();
    Json(charts)
}

async fn namespaces(State(state): State<ApiState>) -> Json<Vec<String>> {
    let mut namespaces: Vec<String> = state
        .graph
        .all_nodes()
        .into_iter()
        .filter(|n| !n.namespace.is_empty())
        .map(|n| n.namespace)
        .collect();
    namespaces.sort();
    namespaces.dedup();
    Json(namespaces)
}

async fn graph_view(
    State(state): State<ApiState>,
    Query(params): Query<ScopeParams>,
) -> Json<GraphResponse> {
    let graph = state.graph.as_ref();
    let nodes = select_nodes(graph, params.release(), params.namespace());
    let nodes = expand_related(graph, nodes, params.namespace(), params.release());
    let nodes = include_persistent_volumes(graph, nodes, params.release());
    Json(build_graph_response(&nodes))
}
