//! Records to wire mappings, and the response envelopes around them.

use crate::codec::{FieldCodec, GeometryAxes};
use crate::config::{AttributeKind, IncludedSpec, Model, ResourceConfig};
use crate::error::AppError;
use crate::query::Pagination;
use crate::record::{Record, Row};
use crate::resource::RequestContext;
use serde_json::{json, Map, Value};

/// Serializes records of one model with one codec configuration.
pub struct Serializer<'a> {
    pub model: &'a Model,
    pub codec: &'a FieldCodec,
    pub axes: &'a GeometryAxes,
}

impl<'a> Serializer<'a> {
    pub fn new(model: &'a Model, codec: &'a FieldCodec, axes: &'a GeometryAxes) -> Self {
        Serializer { model, codec, axes }
    }

    pub fn for_resource(config: &'a ResourceConfig) -> Self {
        Serializer::new(&config.model, &config.codec, &config.geometry_axes)
    }

    /// Selected column attributes of `record`; `None` selects every column in declaration order.
    /// Relationships and properties in a selection are skipped; a name the model lacks is a programming error.
    pub fn serialize(&self, record: &Record, fields: Option<&[String]>) -> Result<Map<String, Value>, AppError> {
        let mut out = Map::new();
        match fields {
            None => {
                for column in self.model.columns() {
                    let v = self.codec.serialize(
                        &column.name,
                        record.get(&column.name),
                        Some(&column.column_type),
                        self.axes,
                    )?;
                    out.insert(column.name.clone(), v);
                }
            }
            Some(fields) => {
                for name in fields {
                    let attribute = self.model.attribute(name).ok_or_else(|| {
                        AppError::programming(format!(
                            "Response field {}.{} does not exist",
                            self.model.name, name
                        ))
                    })?;
                    if let AttributeKind::Column(column) = &attribute.kind {
                        let v = self.codec.serialize(name, record.get(name), Some(&column.column_type), self.axes)?;
                        out.insert(name.clone(), v);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Resource identifier of a related record: `{id, type, attributes}`.
    pub fn included_item(&self, kind: &str, record: &Record, fields: Option<&[String]>) -> Result<Value, AppError> {
        let pk = self.model.primary_key();
        let id = self
            .codec
            .serialize(&pk.name, record.get(&pk.name), Some(&pk.column_type), self.axes)?;
        Ok(json!({
            "id": id,
            "type": kind,
            "attributes": Value::Object(self.serialize(record, fields)?),
        }))
    }
}

/// Data element of a fetched row, with response field selection applied.
pub fn data_for_row(config: &ResourceConfig, ctx: &RequestContext, row: &Row) -> Result<Map<String, Value>, AppError> {
    let fields = config.response_fields.resolve(ctx, row);
    Serializer::for_resource(config).serialize(&row.record, fields.as_deref())
}

/// Collection element: the record's attributes with its meta block, if any, inside under `meta`.
pub fn collection_element(config: &ResourceConfig, ctx: &RequestContext, row: &Row) -> Result<Value, AppError> {
    let mut data = data_for_row(config, ctx, row)?;
    if let Some(meta) = config.meta.produce(ctx, row) {
        data.insert("meta".into(), Value::Object(meta));
    }
    Ok(Value::Object(data))
}

/// Related records of one `__included` entry.
pub fn included_items(
    name: &str,
    spec: &IncludedSpec,
    config: &ResourceConfig,
    ctx: &RequestContext,
    records: &[Record],
) -> Result<Vec<Value>, AppError> {
    let model = spec.link.target();
    let serializer = Serializer::new(model, &config.codec, &spec.geometry_axes);
    records
        .iter()
        .map(|record| {
            let row = Row::new(record.clone());
            let fields = spec.response_fields.resolve(ctx, &row);
            serializer.included_item(name, record, fields.as_deref())
        })
        .collect()
}

/// `{data: [...], meta?: {total, offset?, limit?}}`
pub fn collection_envelope(data: Vec<Value>, total: Option<u64>, pagination: &Pagination) -> Value {
    let mut body = Map::new();
    body.insert("data".into(), Value::Array(data));
    if let Some(total) = total {
        let mut meta = Map::new();
        meta.insert("total".into(), Value::from(total));
        if let Some(offset) = pagination.offset {
            meta.insert("offset".into(), Value::from(offset));
        }
        if let Some(limit) = pagination.limit {
            meta.insert("limit".into(), Value::from(limit));
        }
        body.insert("meta".into(), Value::Object(meta));
    }
    Value::Object(body)
}

/// `{data: {...}, meta?, included?}`
pub fn single_envelope(data: Map<String, Value>, meta: Option<Map<String, Value>>, included: Option<Vec<Value>>) -> Value {
    let mut body = Map::new();
    body.insert("data".into(), Value::Object(data));
    if let Some(meta) = meta {
        body.insert("meta".into(), Value::Object(meta));
    }
    if let Some(included) = included {
        body.insert("included".into(), Value::Array(included));
    }
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{schema_from_json, MetaFn, MetaSpec, ResponseFields};
    use crate::codec::FieldValue;
    use axum::http::Method;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn config() -> ResourceConfig {
        let schema = schema_from_json(json!({"models": [
            {"name": "employee", "primary_key": "id",
             "columns": [{"name": "id", "type": "uuid"}, {"name": "name", "type": "text"},
                         {"name": "joined", "type": "timestamp"}, {"name": "company_id", "type": "integer"}],
             "relationships": [{"name": "company", "target": "company", "cardinality": "to_one", "local_column": "company_id"}],
             "properties": [{"name": "caps_name"}]},
            {"name": "company", "primary_key": "id",
             "columns": [{"name": "id", "type": "integer"}, {"name": "name", "type": "text"}]}
        ]}))
        .unwrap();
        ResourceConfig::new(Arc::new(schema), "employee").unwrap()
    }

    fn row() -> Row {
        let joined = NaiveDate::from_ymd_opt(2015, 6, 1).unwrap().and_hms_opt(9, 30, 0).unwrap();
        Row::new(
            Record::new()
                .with("id", FieldValue::Uuid(uuid::Uuid::nil()))
                .with("name", "Iris")
                .with("joined", FieldValue::DateTime(joined)),
        )
    }

    #[test]
    fn serializes_every_column_by_default() {
        let config = config();
        let ctx = RequestContext::new(Method::GET);
        let data = data_for_row(&config, &ctx, &row()).unwrap();
        assert_eq!(data["id"], json!("00000000000000000000000000000000"));
        assert_eq!(data["joined"], json!("2015-06-01T09:30:00Z"));
        assert_eq!(data["company_id"], Value::Null);
        assert!(!data.contains_key("company"));
    }

    #[test]
    fn field_selection_skips_non_columns_and_rejects_unknown() {
        let config = config().response_fields(ResponseFields::Static(vec!["name".into(), "company".into(), "caps_name".into()]));
        let ctx = RequestContext::new(Method::GET);
        let data = data_for_row(&config, &ctx, &row()).unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data["name"], json!("Iris"));

        let config = config.response_fields(ResponseFields::Static(vec!["salary".into()]));
        assert!(matches!(data_for_row(&config, &ctx, &row()), Err(AppError::Programming(_))));
    }

    #[test]
    fn meta_goes_inside_collection_elements() {
        let initial: MetaFn = Arc::new(|r: &Row| match r.get("name") {
            FieldValue::Text(s) => json!(s.chars().next().map(String::from)),
            _ => Value::Null,
        });
        let config = config().meta(MetaSpec::Static(vec![("initial".into(), initial)]));
        let ctx = RequestContext::new(Method::GET);
        let element = collection_element(&config, &ctx, &row()).unwrap();
        assert_eq!(element["meta"], json!({"initial": "I"}));

        let dynamic = config.meta(MetaSpec::Dynamic(Arc::new(|_: &RequestContext, _: &Row| None)));
        let element = collection_element(&dynamic, &ctx, &row()).unwrap();
        assert!(element.get("meta").is_none());
    }

    #[test]
    fn envelopes() {
        let body = collection_envelope(vec![json!({"id": 1})], Some(7), &Pagination { offset: Some(5), limit: None });
        assert_eq!(body, json!({"data": [{"id": 1}], "meta": {"total": 7, "offset": 5}}));
        let body = collection_envelope(vec![], None, &Pagination::default());
        assert_eq!(body, json!({"data": []}));
        let body = single_envelope(Map::new(), Some(Map::new()), None);
        assert_eq!(body, json!({"data": {}, "meta": {}}));
    }

    #[test]
    fn included_item_uses_related_primary_key() {
        let config = config();
        let company = config.schema.model("company").unwrap().clone();
        let serializer = Serializer::new(&company, &config.codec, &config.geometry_axes);
        let item = serializer
            .included_item("company", &Record::new().with("id", 4i64).with("name", "STAR Labs"), None)
            .unwrap();
        assert_eq!(item, json!({"id": 4, "type": "company", "attributes": {"id": 4, "name": "STAR Labs"}}));
    }
}
