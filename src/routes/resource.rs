//! Resource routes: one collection path and one single-record path per model.
//! Every method reaches the resource, which answers 405 for those it does not allow.

use crate::handlers::resource::{collection, single};
use crate::resource::{CollectionResource, SingleResource};
use axum::{routing::any, Router};
use tower_http::limit::RequestBodyLimitLayer;

/// Request bodies above this size are refused before parsing.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Mount `collection_resource` at `collection_path` and `single_resource` at `single_path`
/// (e.g. `/characters` and `/characters/:id`).
pub fn resource_routes(
    collection_path: &str,
    single_path: &str,
    collection_resource: CollectionResource,
    single_resource: SingleResource,
) -> Router {
    let collection_router = Router::new()
        .route(collection_path, any(collection))
        .with_state(collection_resource);
    let single_router = Router::new()
        .route(single_path, any(single))
        .with_state(single_resource);
    collection_router
        .merge(single_router)
        .layer(RequestBodyLimitLayer::new(DEFAULT_BODY_LIMIT))
}
