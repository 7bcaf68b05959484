//! Read-only JSON API over the graph store.

mod filtering;
mod responses;
mod server;

pub use filtering::{expand_related, include_persistent_volumes};
pub use responses::{
    build_graph_response, format_age, nodes_to_resources, EdgeResponse, GraphResponse,
    NodeResponse, OwnerReference, Resource,
};
pub use server::router;
