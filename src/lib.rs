//! astrolabe — Kubernetes state server
//!
//! Astrolabe watches a Kubernetes API server, maintains a live in-memory
//! relationship graph of cluster objects (ownership chains, selector
//! matches, volume bindings, config references, ...), and exposes it over a
//! read-only JSON API. Dashboards query it to enumerate resources, group
//! them by Helm release, and render dependency graphs without hammering the
//! API server directly.
//!
//! The crate is organised around the event flow:
//!
//! - [`watcher`] — subscribes to watch streams for every tracked kind and
//!   dispatches events into the processor registry.
//! - [`processors`] — per-kind adapters that derive a node's status and emit
//!   the edges implied by its spec.
//! - [`graph`] — the in-memory store: typed nodes and edges, secondary
//!   indexes, pending-edge tables, and the optional persistence wrapper.
//! - [`api`] — the HTTP query surface (filtering, graph expansion, response
//!   shaping).
//! - [`storage`] — the Redis mirror used to replay the graph on restart.

pub mod api;
pub mod cli;
pub mod graph;
pub mod kube;
pub mod processors;
pub mod storage;
pub mod watcher;
