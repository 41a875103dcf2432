//! Fetch plan assembly: path filters, sorting and pagination, each validated against the model.

use crate::config::{AttrTarget, Model, ResourceConfig};
use crate::error::AppError;
use crate::query::filter::typed;
use crate::query::plan::{FetchPlan, SortKey};
use crate::query::predicate::Predicate;
use crate::resource::RequestContext;

/// Equality filters from path parameters, resolved through the lookup attribute map.
pub fn apply_arg_filter(
    config: &ResourceConfig,
    mut plan: FetchPlan,
    args: &[(String, String)],
) -> Result<FetchPlan, AppError> {
    for (key, value) in args {
        match config.lookup_target(key) {
            AttrTarget::Ignore => continue,
            AttrTarget::Custom(f) => plan = plan.filter(f(value)?),
            AttrTarget::Column(name) => {
                let column = plan.model.column(&name).ok_or_else(|| {
                    AppError::programming(format!(
                        "{}.attr_map['{}'] does not exist or is not a column",
                        plan.model.name, name
                    ))
                })?;
                // a path value that cannot be the column's type cannot name any record
                let value = typed(column, value).map_err(|_| AppError::NotFound)?;
                plan = plan.filter(Predicate::Eq(name, value));
            }
        }
    }
    Ok(plan)
}

/// `__sort` when given (invalid field: 400), else the configured default (invalid field: 500).
pub fn apply_sort(
    model: &Model,
    plan: FetchPlan,
    ctx: &RequestContext,
    default_sort: Option<&[String]>,
) -> Result<FetchPlan, AppError> {
    let (fields, using_default) = match ctx.param_list("__sort") {
        Some(fields) => (fields, false),
        None => match default_sort {
            Some(fields) => (fields.to_vec(), true),
            None => return Ok(plan),
        },
    };
    let mut keys = Vec::with_capacity(fields.len());
    for field in &fields {
        let key = SortKey::parse(field);
        if !model.is_column(&key.attribute) {
            if using_default {
                return Err(AppError::programming(format!(
                    "Sort field {}.{} does not exist or is not a column",
                    model.name, key.attribute
                )));
            }
            return Err(AppError::bad_request("An attribute provided for sorting is invalid"));
        }
        keys.push(key);
    }
    Ok(plan.order_by(keys))
}

/// `__offset` / `__limit` as given by the client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pagination {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl Pagination {
    pub fn from_request(ctx: &RequestContext) -> Result<Self, AppError> {
        Ok(Pagination {
            offset: ctx.param_u64("__offset")?,
            limit: ctx.param_u64("__limit")?,
        })
    }

    /// Either parameter present: a total is counted and reported.
    pub fn requested(&self) -> bool {
        self.offset.is_some() || self.limit.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{schema_from_json, Schema};
    use axum::http::Method;
    use serde_json::json;
    use std::sync::Arc;

    fn schema() -> Arc<Schema> {
        Arc::new(
            schema_from_json(json!({"models": [
                {"name": "employee", "primary_key": "id",
                 "columns": [{"name": "id", "type": "integer"}, {"name": "name", "type": "text"},
                             {"name": "company_id", "type": "integer"}],
                 "properties": [{"name": "caps_name"}]}
            ]}))
            .unwrap(),
        )
    }

    #[test]
    fn test_arg_filter_follows_lookup_map() {
        let config = ResourceConfig::new(schema(), "employee")
            .unwrap()
            .map_attr("employee_id", AttrTarget::Column("id".into()))
            .map_attr("tenant", AttrTarget::Ignore);
        let plan = FetchPlan::new(config.model.clone());
        let args = vec![("employee_id".to_string(), "7".to_string()), ("tenant".to_string(), "x".to_string())];
        let plan = apply_arg_filter(&config, plan, &args).unwrap();
        assert_eq!(plan.predicates, vec![Predicate::Eq("id".into(), 7i64.into())]);
    }

    #[test]
    fn test_arg_filter_to_non_column_is_programming_error() {
        let config = ResourceConfig::new(schema(), "employee")
            .unwrap()
            .map_attr("x", AttrTarget::Column("caps_name".into()));
        let plan = FetchPlan::new(config.model.clone());
        let err = apply_arg_filter(&config, plan, &[("x".to_string(), "1".to_string())]).unwrap_err();
        assert!(matches!(err, AppError::Programming(_)));
    }

    #[test]
    fn test_custom_lookup() {
        let config = ResourceConfig::new(schema(), "employee").unwrap().map_attr(
            "company",
            AttrTarget::Custom(Arc::new(|v: &str| Ok(Predicate::eq("company_id", v.parse::<i64>().unwrap_or(0))))),
        );
        let plan = apply_arg_filter(
            &config,
            FetchPlan::new(config.model.clone()),
            &[("company".to_string(), "3".to_string())],
        )
        .unwrap();
        assert_eq!(plan.predicates, vec![Predicate::Eq("company_id".into(), 3i64.into())]);
    }

    #[test]
    fn test_sort_validation_depends_on_source() {
        let schema = schema();
        let model = schema.model("employee").unwrap().clone();
        let bad_default = vec!["nope".to_string()];
        let ctx = RequestContext::new(Method::GET);
        let err = apply_sort(&model, FetchPlan::new(model.clone()), &ctx, Some(&bad_default)).unwrap_err();
        assert!(matches!(err, AppError::Programming(_)));

        let ctx = RequestContext::new(Method::GET).with_param("__sort", "nope");
        let err = apply_sort(&model, FetchPlan::new(model.clone()), &ctx, None).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let ctx = RequestContext::new(Method::GET).with_param("__sort", "-name,id");
        let plan = apply_sort(&model, FetchPlan::new(model.clone()), &ctx, Some(&bad_default)).unwrap();
        assert_eq!(plan.sort.len(), 2);
        assert!(plan.sort[0].descending);
    }

    #[test]
    fn test_pagination_rejects_malformed() {
        let ctx = RequestContext::new(Method::GET).with_param("__limit", "ten");
        assert!(matches!(Pagination::from_request(&ctx), Err(AppError::BadRequest(_))));
        let ctx = RequestContext::new(Method::GET).with_param("__offset", "3");
        let p = Pagination::from_request(&ctx).unwrap();
        assert!(p.requested());
        assert_eq!(p.limit, None);
    }
}
