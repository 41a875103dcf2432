//! Collection and single-record resources: the request pipelines behind each HTTP method.

pub mod collection;
pub mod context;
pub mod hooks;
pub mod single;

pub use collection::CollectionResource;
pub use context::RequestContext;
pub use hooks::{Authorizer, Identifier, NoHooks, ResourceHooks};
pub use single::SingleResource;
pub use crate::response::ResourceResponse;

use crate::config::{Model, ResourceConfig, Schema};
use crate::error::{AppError, ConfigError};
use crate::query::{FetchPlan, Predicate};
use crate::record::{Record, Row};
use crate::session::{map_store_error, Operation};
use crate::store::Transaction;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Finds the records a single GET expands for one `__included` name.
#[async_trait]
pub trait IncludeResolver: Send + Sync {
    /// Model of the records returned.
    fn target(&self) -> &Model;

    async fn resolve(
        &self,
        ctx: &RequestContext,
        tx: &mut dyn Transaction,
        row: &Row,
    ) -> Result<Vec<Record>, AppError>;
}

/// Records reached through one of the model's relationships.
pub struct LinkedRecords {
    relationship: String,
    local_column: String,
    remote_column: String,
    target: Arc<Model>,
}

impl LinkedRecords {
    pub fn new(schema: &Schema, model: &str, relationship: &str) -> Result<Self, ConfigError> {
        let missing = |kind: &'static str, id: String| ConfigError::MissingReference { kind, id };
        let owner = schema.model(model).ok_or_else(|| missing("model", model.to_string()))?;
        let rel = owner
            .relationship(relationship)
            .ok_or_else(|| missing("relationship", format!("{}.{}", model, relationship)))?;
        let target = schema
            .model(&rel.target)
            .cloned()
            .ok_or_else(|| missing("model", rel.target.clone()))?;
        Ok(LinkedRecords {
            relationship: rel.name.clone(),
            local_column: rel.local_column.clone(),
            remote_column: rel.remote_column.clone(),
            target,
        })
    }
}

#[async_trait]
impl IncludeResolver for LinkedRecords {
    fn target(&self) -> &Model {
        &self.target
    }

    async fn resolve(
        &self,
        _ctx: &RequestContext,
        tx: &mut dyn Transaction,
        row: &Row,
    ) -> Result<Vec<Record>, AppError> {
        let local = row.get(&self.local_column);
        if local.is_null() {
            return Ok(Vec::new());
        }
        tracing::debug!(relationship = %self.relationship, "resolving included records");
        let plan = FetchPlan::new(self.target.clone()).filter(Predicate::Eq(self.remote_column.clone(), local.clone()));
        let rows = tx.fetch(&plan).await.map_err(|e| map_store_error(Operation::Read, e))?;
        Ok(rows.into_iter().map(|r| r.record).collect())
    }
}

/// Method check, then identification and authorization for the method.
pub(crate) async fn admit(config: &ResourceConfig, allowed: &[axum::http::Method], ctx: &mut RequestContext) -> Result<(), AppError> {
    if !allowed.contains(&ctx.method) {
        return Err(AppError::MethodNotAllowed(allowed.to_vec()));
    }
    if let Some(identifier) = config.identifiers.get(&ctx.method) {
        identifier.identify(ctx).await?;
    }
    if let Some(authorizer) = config.authorizers.get(&ctx.method) {
        authorizer.authorize(ctx).await?;
    }
    Ok(())
}

/// Body must be a single object for PUT and PATCH.
pub(crate) fn object_body(ctx: &RequestContext) -> Result<&serde_json::Map<String, Value>, AppError> {
    match &ctx.body {
        Some(Value::Object(map)) => Ok(map),
        Some(Value::Array(_)) => Err(AppError::bad_request("Array bodies are only allowed with POST requests")),
        _ => Err(AppError::bad_request("A JSON object body is required")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use serde_json::json;

    #[test]
    fn array_bodies_only_with_post() {
        let ctx = RequestContext::new(Method::PUT).with_body(json!([{"id": 1}]));
        let err = object_body(&ctx).unwrap_err();
        assert_eq!(err.public_message(), "Array bodies are only allowed with POST requests");
        let ctx = RequestContext::new(Method::PATCH);
        assert!(matches!(object_body(&ctx), Err(AppError::BadRequest(_))));
    }
}
