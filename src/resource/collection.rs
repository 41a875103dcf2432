//! Collection resource: list (GET), create (POST) and add-patches (PATCH).

use crate::config::{DefaultFn, Model, ResourceConfig};
use crate::deserializer::{deserialize, link, parse_body_dict, parse_path_dict, ParsedBody};
use crate::error::AppError;
use crate::query::{apply_arg_filter, apply_sort, FetchPlan, Pagination};
use crate::record::{Record, Row};
use crate::resource::{admit, RequestContext, ResourceResponse};
use crate::serializer::{collection_element, collection_envelope, data_for_row, Serializer};
use crate::session::{Operation, Session};
use crate::store::Store;
use axum::http::Method;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct CollectionResource {
    pub config: Arc<ResourceConfig>,
    pub store: Arc<dyn Store>,
}

impl CollectionResource {
    pub fn new(config: ResourceConfig, store: Arc<dyn Store>) -> Self {
        CollectionResource {
            config: Arc::new(config),
            store,
        }
    }

    /// Dispatch by method. Methods outside the configured set are a 405.
    pub async fn handle(&self, mut ctx: RequestContext) -> Result<ResourceResponse, AppError> {
        admit(&self.config, &self.config.collection_methods, &mut ctx).await?;
        match ctx.method {
            Method::GET => self.get(&ctx).await,
            Method::POST => self.post(&ctx).await,
            Method::PATCH => self.patch(&ctx).await,
            _ => Err(AppError::MethodNotAllowed(self.config.collection_methods.clone())),
        }
    }

    async fn get(&self, ctx: &RequestContext) -> Result<ResourceResponse, AppError> {
        let config = &self.config;
        let mut session = Session::begin(self.store.as_ref(), Operation::Read).await?;
        let mut path = ctx.path_params.clone();
        config.hooks.before_get(ctx, session.tx(), &mut path).await?;

        let plan = FetchPlan::new(config.model.clone()).select_extra(config.extra_select.clone());
        let plan = apply_arg_filter(config, plan, &path)?;
        let plan = config.hooks.query_filter(ctx, plan)?;
        let plan = plan.filters(config.param_filters.filter_by_params(&config.model, &ctx.params)?);
        let plan = apply_sort(&config.model, plan, ctx, config.default_sort.as_deref())?;

        let pagination = Pagination::from_request(ctx)?;
        let total = if pagination.requested() {
            Some(session.count(&plan.counting()).await?)
        } else {
            None
        };
        let plan = plan.window(pagination.offset, pagination.limit);
        let rows = session.fetch(&plan).await?;
        config.hooks.after_get(ctx, &rows).await?;
        session.close().await?;

        let data = rows
            .iter()
            .map(|row| collection_element(config, ctx, row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ResourceResponse::ok(collection_envelope(data, total, &pagination)))
    }

    async fn post(&self, ctx: &RequestContext) -> Result<ResourceResponse, AppError> {
        let config = &self.config;
        let body = ctx
            .body
            .as_ref()
            .ok_or_else(|| AppError::bad_request("A JSON body is required"))?;
        match body {
            Value::Object(_) if !config.post_types.object => {
                return Err(AppError::bad_request("Object bodies are not allowed for this resource"))
            }
            Value::Array(_) if !config.post_types.array => {
                return Err(AppError::bad_request("Array bodies are not allowed for this resource"))
            }
            _ => {}
        }
        let path_attributes = parse_path_dict(config, &config.model, &ctx.path_params)?;
        let (parsed, is_array) = deserialize(config, body, &path_attributes)?;

        let mut records = Vec::with_capacity(parsed.len());
        let mut linked = Vec::with_capacity(parsed.len());
        for ParsedBody {
            mut attributes,
            linked: groups,
        } in parsed
        {
            apply_defaults(&config.post_defaults, ctx, &mut attributes);
            records.push(attributes);
            linked.push(groups);
        }

        let mut session = Session::begin(self.store.as_ref(), Operation::Write).await?;
        config.hooks.before_post(ctx, session.tx(), &mut records).await?;
        let mut stored = Vec::with_capacity(records.len());
        for (attributes, groups) in records.into_iter().zip(linked) {
            let record = session.insert(&config.model, attributes).await?;
            let record = link(&mut session, config, &config.model, record, groups).await?;
            stored.push(record);
        }
        session.commit().await?;
        config.hooks.after_post(ctx, &stored).await?;

        let mut data = stored
            .into_iter()
            .map(|record| data_for_row(config, ctx, &Row::new(record)).map(Value::Object))
            .collect::<Result<Vec<_>, _>>()?;
        let data = if is_array {
            Value::Array(data)
        } else {
            data.pop().unwrap_or(Value::Null)
        };
        Ok(ResourceResponse::created(json!({ "data": data })))
    }

    /// `{"patches": [{"op": "add", "path": "/", "value": {...}}]}`: each patch creates one record of the
    /// model its path is configured for.
    async fn patch(&self, ctx: &RequestContext) -> Result<ResourceResponse, AppError> {
        let config = &self.config;
        let invalid = || AppError::bad_request("Invalid patch document");
        let patches = ctx
            .body
            .as_ref()
            .and_then(|b| b.get("patches"))
            .and_then(Value::as_array)
            .ok_or_else(invalid)?;
        let targets = config.patch_targets();

        let mut creates = Vec::with_capacity(patches.len());
        for patch in patches {
            if patch.get("op").and_then(Value::as_str) != Some("add") {
                return Err(invalid());
            }
            let path = patch.get("path").and_then(Value::as_str).ok_or_else(invalid)?;
            let model = targets
                .iter()
                .find(|(p, _)| p == path)
                .map(|(_, m)| m.clone())
                .ok_or_else(invalid)?;
            let value = patch.get("value").and_then(Value::as_object).ok_or_else(invalid)?;
            let mut parsed = parse_body_dict(config, &model, value, config.allow_subresources)?;
            let path_attributes = parse_path_dict(config, &model, &ctx.path_params)?;
            parsed.attributes.merge(path_attributes);
            creates.push((model, parsed));
        }

        let mut session = Session::begin(self.store.as_ref(), Operation::Write).await?;
        let mut created: Vec<(Arc<Model>, Record)> = Vec::with_capacity(creates.len());
        for (model, parsed) in creates {
            let record = session.insert(&model, parsed.attributes).await?;
            let record = link(&mut session, config, &model, record, parsed.linked).await?;
            created.push((model, record));
        }
        session.commit().await?;
        config.hooks.after_patch(ctx, None).await?;

        let data = created
            .iter()
            .map(|(model, record)| {
                if model.name == config.model.name {
                    data_for_row(config, ctx, &Row::new(record.clone())).map(Value::Object)
                } else {
                    Serializer::new(model, &config.codec, &config.geometry_axes)
                        .serialize(record, None)
                        .map(Value::Object)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ResourceResponse::ok(json!({ "data": data })))
    }
}

/// Fill keys the body left out from the configured producers.
pub(crate) fn apply_defaults(
    defaults: &[(String, DefaultFn)],
    ctx: &RequestContext,
    attributes: &mut Record,
) {
    for (name, produce) in defaults {
        if !attributes.contains(name) {
            let value = produce(ctx, attributes);
            attributes.insert(name.clone(), value);
        }
    }
}
