//! Single-record resource: GET, PUT, PATCH and DELETE of the one record the path identifies.

use crate::config::ResourceConfig;
use crate::deserializer::{link, parse_body_dict, parse_path_dict};
use crate::error::{AppError, CONDITIONS_VIOLATED};
use crate::query::{apply_arg_filter, FetchPlan, Resolution};
use crate::record::Row;
use crate::resource::collection::apply_defaults;
use crate::resource::{admit, object_body, RequestContext, ResourceResponse};
use crate::serializer::{data_for_row, included_items, single_envelope};
use crate::session::{Operation, Session};
use crate::store::Store;
use axum::http::Method;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct SingleResource {
    pub config: Arc<ResourceConfig>,
    pub store: Arc<dyn Store>,
}

fn multiple(config: &ResourceConfig) -> AppError {
    AppError::programming(format!(
        "Lookup on {} matched more than one record; the path does not identify a single resource",
        config.model.name
    ))
}

impl SingleResource {
    pub fn new(config: ResourceConfig, store: Arc<dyn Store>) -> Self {
        SingleResource {
            config: Arc::new(config),
            store,
        }
    }

    pub async fn handle(&self, mut ctx: RequestContext) -> Result<ResourceResponse, AppError> {
        admit(&self.config, &self.config.single_methods, &mut ctx).await?;
        match ctx.method {
            Method::GET => self.get(&ctx).await,
            Method::PUT => self.put(&ctx).await,
            Method::PATCH => self.patch(&ctx).await,
            Method::DELETE => self.delete(&ctx).await,
            _ => Err(AppError::MethodNotAllowed(self.config.single_methods.clone())),
        }
    }

    /// Plan that identifies the record from the path.
    fn locate(&self, path: &[(String, String)]) -> Result<FetchPlan, AppError> {
        let plan = FetchPlan::new(self.config.model.clone()).select_extra(self.config.extra_select.clone());
        apply_arg_filter(&self.config, plan, path)
    }

    /// The located record, re-checked against a precondition plan. Zero matches after the precondition
    /// means the record exists but the conditions do not hold.
    async fn locate_with_precondition(
        &self,
        session: &mut Session,
        plan: FetchPlan,
        precondition: FetchPlan,
    ) -> Result<Row, AppError> {
        match session.one(&plan).await? {
            Resolution::NoResult => return Err(AppError::NotFound),
            Resolution::Multiple => return Err(multiple(&self.config)),
            Resolution::One(_) => {}
        }
        match session.one(&precondition).await? {
            Resolution::One(row) => Ok(row),
            Resolution::NoResult => Err(AppError::Conflict(CONDITIONS_VIOLATED)),
            Resolution::Multiple => Err(multiple(&self.config)),
        }
    }

    async fn get(&self, ctx: &RequestContext) -> Result<ResourceResponse, AppError> {
        let config = &self.config;
        let included_names = match ctx.param_list("__included") {
            Some(names) => {
                for name in &names {
                    if !config.allowed_included.contains_key(name) {
                        return Err(AppError::bad_request(format!("'{}' cannot be included", name)));
                    }
                }
                names
            }
            None => Vec::new(),
        };

        let mut session = Session::begin(self.store.as_ref(), Operation::Read).await?;
        let mut path = ctx.path_params.clone();
        config.hooks.before_get(ctx, session.tx(), &mut path).await?;
        let plan = self.locate(&path)?;
        let plan = config.hooks.query_filter(ctx, plan)?;
        let row = match session.one(&plan).await? {
            Resolution::One(row) => row,
            Resolution::NoResult => return Err(AppError::NotFound),
            Resolution::Multiple => return Err(multiple(config)),
        };

        let mut included = Vec::new();
        for name in &included_names {
            if let Some(spec) = config.allowed_included.get(name) {
                let records = spec.link.resolve(ctx, session.tx(), &row).await?;
                included.extend(included_items(name, spec, config, ctx, &records)?);
            }
        }
        config.hooks.after_get(ctx, std::slice::from_ref(&row)).await?;
        session.close().await?;

        let data = data_for_row(config, ctx, &row)?;
        let meta = config.meta.produce(ctx, &row);
        let included = if included_names.is_empty() { None } else { Some(included) };
        Ok(ResourceResponse::ok(single_envelope(data, meta, included)))
    }

    /// Update the located record, or insert one when nothing matches and inserting is allowed.
    async fn put(&self, ctx: &RequestContext) -> Result<ResourceResponse, AppError> {
        let config = &self.config;
        let body = object_body(ctx)?;
        let plan = self.locate(&ctx.path_params)?;
        let mut parsed = parse_body_dict(config, &config.model, body, config.allow_subresources)?;

        let mut session = Session::begin(self.store.as_ref(), Operation::Write).await?;
        let (record, created) = match session.one(&plan).await? {
            Resolution::Multiple => return Err(multiple(config)),
            Resolution::NoResult if !config.allow_put_insert => return Err(AppError::NotFound),
            Resolution::NoResult => {
                parsed
                    .attributes
                    .merge(parse_path_dict(config, &config.model, &ctx.path_params)?);
                apply_defaults(&config.put_defaults, ctx, &mut parsed.attributes);
                config.hooks.before_put(ctx, session.tx(), None, &mut parsed.attributes).await?;
                let record = session.insert(&config.model, parsed.attributes).await?;
                (record, true)
            }
            Resolution::One(current) => {
                apply_defaults(&config.put_defaults, ctx, &mut parsed.attributes);
                config
                    .hooks
                    .before_put(ctx, session.tx(), Some(&current), &mut parsed.attributes)
                    .await?;
                let record = session.update(&config.model, &current.record, parsed.attributes).await?;
                (record, false)
            }
        };
        let record = link(&mut session, config, &config.model, record, parsed.linked).await?;
        session.commit().await?;
        config.hooks.after_put(ctx, &record).await?;

        let data = data_for_row(config, ctx, &Row::new(record))?;
        let body = json!({ "data": Value::Object(data) });
        Ok(if created {
            ResourceResponse::created(body)
        } else {
            ResourceResponse::ok(body)
        })
    }

    async fn patch(&self, ctx: &RequestContext) -> Result<ResourceResponse, AppError> {
        let config = &self.config;
        let body = object_body(ctx)?;
        let plan = self.locate(&ctx.path_params)?;
        let precondition = config
            .hooks
            .patch_precondition(ctx, plan.clone())?
            .filters(config.param_filters.filter_by_params(&config.model, &ctx.params)?);
        let mut parsed = parse_body_dict(config, &config.model, body, config.allow_subresources)?;

        let mut session = Session::begin(self.store.as_ref(), Operation::Write).await?;
        let current = self.locate_with_precondition(&mut session, plan, precondition).await?;
        apply_defaults(&config.patch_defaults, ctx, &mut parsed.attributes);
        config.hooks.modify_patch(ctx, &current, &mut parsed.attributes)?;
        config
            .hooks
            .before_patch(ctx, session.tx(), &current, &mut parsed.attributes)
            .await?;
        let record = session.update(&config.model, &current.record, parsed.attributes).await?;
        let record = link(&mut session, config, &config.model, record, parsed.linked).await?;
        session.commit().await?;
        config.hooks.after_patch(ctx, Some(&record)).await?;

        let data = data_for_row(config, ctx, &Row::new(record))?;
        Ok(ResourceResponse::ok(json!({ "data": Value::Object(data) })))
    }

    /// Remove the located record, or mark it deleted when the hooks say so.
    async fn delete(&self, ctx: &RequestContext) -> Result<ResourceResponse, AppError> {
        let config = &self.config;
        let plan = self.locate(&ctx.path_params)?;
        let precondition = config
            .hooks
            .delete_precondition(ctx, plan.clone())?
            .filters(config.param_filters.filter_by_params(&config.model, &ctx.params)?);

        let mut session = Session::begin(self.store.as_ref(), Operation::Delete).await?;
        let current = self.locate_with_precondition(&mut session, plan, precondition).await?;
        config.hooks.before_delete(ctx, session.tx(), &current).await?;
        match config.hooks.mark_deleted(ctx, &current) {
            Some(changes) => {
                session.update(&config.model, &current.record, changes).await?;
            }
            None => session.delete(&config.model, &current.record).await?,
        }
        session.commit().await?;
        config.hooks.after_delete(ctx, &current).await?;
        Ok(ResourceResponse::ok(json!({})))
    }
}
