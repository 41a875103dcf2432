//! Axum handlers: hand the request context to the resource and render its result.

use crate::error::AppError;
use crate::resource::{CollectionResource, RequestContext, ResourceResponse, SingleResource};
use axum::extract::State;

pub async fn collection(
    State(resource): State<CollectionResource>,
    ctx: RequestContext,
) -> Result<ResourceResponse, AppError> {
    tracing::debug!(model = %resource.config.model.name, method = %ctx.method, "collection request");
    resource.handle(ctx).await
}

pub async fn single(
    State(resource): State<SingleResource>,
    ctx: RequestContext,
) -> Result<ResourceResponse, AppError> {
    tracing::debug!(model = %resource.config.model.name, method = %ctx.method, "single request");
    resource.handle(ctx).await
}
