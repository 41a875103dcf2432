//! Extension points invoked at fixed points of the request pipeline. Every method defaults to a no-op.

use crate::error::AppError;
use crate::query::FetchPlan;
use crate::record::{Record, Row};
use crate::resource::RequestContext;
use crate::store::Transaction;
use async_trait::async_trait;

#[async_trait]
pub trait ResourceHooks: Send + Sync {
    /// Before the lookup; may rewrite the path parameters used to locate records.
    async fn before_get(
        &self,
        _ctx: &RequestContext,
        _tx: &mut dyn Transaction,
        _path: &mut Vec<(String, String)>,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn after_get(&self, _ctx: &RequestContext, _rows: &[Row]) -> Result<(), AppError> {
        Ok(())
    }

    /// Structural filter applied after the path filters on every GET.
    fn query_filter(&self, _ctx: &RequestContext, plan: FetchPlan) -> Result<FetchPlan, AppError> {
        Ok(plan)
    }

    /// Records about to be inserted by a POST, defaults already applied.
    async fn before_post(
        &self,
        _ctx: &RequestContext,
        _tx: &mut dyn Transaction,
        _records: &mut [Record],
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn after_post(&self, _ctx: &RequestContext, _records: &[Record]) -> Result<(), AppError> {
        Ok(())
    }

    /// `current` is `None` when the PUT inserts.
    async fn before_put(
        &self,
        _ctx: &RequestContext,
        _tx: &mut dyn Transaction,
        _current: Option<&Row>,
        _changes: &mut Record,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn after_put(&self, _ctx: &RequestContext, _record: &Record) -> Result<(), AppError> {
        Ok(())
    }

    /// Extra conditions the located record must meet for a PATCH to proceed.
    fn patch_precondition(&self, _ctx: &RequestContext, plan: FetchPlan) -> Result<FetchPlan, AppError> {
        Ok(plan)
    }

    /// Last chance to alter the changes of a PATCH, after defaults.
    fn modify_patch(&self, _ctx: &RequestContext, _current: &Row, _changes: &mut Record) -> Result<(), AppError> {
        Ok(())
    }

    async fn before_patch(
        &self,
        _ctx: &RequestContext,
        _tx: &mut dyn Transaction,
        _current: &Row,
        _changes: &mut Record,
    ) -> Result<(), AppError> {
        Ok(())
    }

    /// `record` is `None` after a collection PATCH.
    async fn after_patch(&self, _ctx: &RequestContext, _record: Option<&Record>) -> Result<(), AppError> {
        Ok(())
    }

    fn delete_precondition(&self, _ctx: &RequestContext, plan: FetchPlan) -> Result<FetchPlan, AppError> {
        Ok(plan)
    }

    async fn before_delete(&self, _ctx: &RequestContext, _tx: &mut dyn Transaction, _current: &Row) -> Result<(), AppError> {
        Ok(())
    }

    /// Changes that mark the record deleted instead of removing it. `None` deletes.
    fn mark_deleted(&self, _ctx: &RequestContext, _current: &Row) -> Option<Record> {
        None
    }

    async fn after_delete(&self, _ctx: &RequestContext, _current: &Row) -> Result<(), AppError> {
        Ok(())
    }
}

/// The default: no hooks.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl ResourceHooks for NoHooks {}

/// Establishes who is calling; runs before authorization.
#[async_trait]
pub trait Identifier: Send + Sync {
    async fn identify(&self, ctx: &mut RequestContext) -> Result<(), AppError>;
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, ctx: &RequestContext) -> Result<(), AppError>;
}
