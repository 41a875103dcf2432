//! Inbound bodies to records: flat attributes, linked sub-resources one level deep, path-derived identifiers.

use crate::codec::FieldValue;
use crate::config::{AttrTarget, AttributeKind, Model, ResourceConfig, UnknownKeys};
use crate::error::AppError;
use crate::query::filter::typed;
use crate::record::Record;
use crate::session::Session;
use crate::store::key_of;
use serde_json::{Map, Value};

/// Records to create through one relationship of the parent.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkedGroup {
    pub relationship: String,
    pub records: Vec<ParsedBody>,
}

/// One body object: its own attributes plus linked groups, which are never flattened into it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedBody {
    pub attributes: Record,
    pub linked: Vec<LinkedGroup>,
}

/// Parse one body object for `model`. Relationships are followed only while `recurse` is set,
/// and the records under them are parsed with recursion off.
pub fn parse_body_dict(
    config: &ResourceConfig,
    model: &Model,
    body: &Map<String, Value>,
    recurse: bool,
) -> Result<ParsedBody, AppError> {
    let mut parsed = ParsedBody::default();
    for (key, value) in body {
        match model.attribute(key).map(|a| &a.kind) {
            Some(AttributeKind::Column(column)) => {
                let v = config.codec.deserialize(key, column, value, &config.geometry_axes)?;
                parsed.attributes.insert(key.clone(), v);
            }
            Some(AttributeKind::Property(property)) => match &property.writes {
                Some(target) => {
                    let column = model.column(target).ok_or_else(|| {
                        AppError::programming(format!(
                            "{}.{} writes to {}, which is not a column",
                            model.name, property.name, target
                        ))
                    })?;
                    let v = config.codec.deserialize(target, column, value, &config.geometry_axes)?;
                    parsed.attributes.insert(target.clone(), v);
                }
                // seen by hooks only; the session drops it before the store
                None => parsed.attributes.insert(key.clone(), FieldValue::from_json(value)),
            },
            Some(AttributeKind::Relationship(rel)) if recurse => {
                let target = config.schema.model(&rel.target).ok_or_else(|| {
                    AppError::programming(format!("{}.{} targets unknown model {}", model.name, key, rel.target))
                })?;
                let items: Vec<&Map<String, Value>> = match (rel.uses_list(), value) {
                    (true, Value::Array(items)) => items
                        .iter()
                        .map(|item| item.as_object().ok_or_else(|| invalid_linked(key)))
                        .collect::<Result<_, _>>()?,
                    (false, Value::Object(item)) => vec![item],
                    (false, Value::Null) => Vec::new(),
                    _ => return Err(invalid_linked(key)),
                };
                let records = items
                    .into_iter()
                    .map(|item| parse_body_dict(config, target, item, false))
                    .collect::<Result<Vec<_>, _>>()?;
                parsed.linked.push(LinkedGroup {
                    relationship: key.clone(),
                    records,
                });
            }
            _ => match config.unknown_keys {
                UnknownKeys::Drop => {
                    tracing::debug!(model = %model.name, key = %key, "dropping unknown body key");
                }
                UnknownKeys::Reject => {
                    return Err(AppError::bad_request(format!("Unknown attribute '{}'", key)));
                }
            },
        }
    }
    Ok(parsed)
}

fn invalid_linked(key: &str) -> AppError {
    AppError::bad_request(format!("Invalid value for linked attribute '{}'", key))
}

/// Attributes named by path parameters, through the inbound attribute map. Ignored and lookup-only
/// targets contribute nothing.
pub fn parse_path_dict(config: &ResourceConfig, model: &Model, path: &[(String, String)]) -> Result<Record, AppError> {
    let mut out = Record::new();
    for (key, raw) in path {
        let AttrTarget::Column(name) = config.inbound_target(key) else {
            continue;
        };
        let column = model.column(&name).ok_or_else(|| {
            AppError::programming(format!(
                "{}.inbound_attr_map['{}'] does not exist or is not a column",
                model.name, name
            ))
        })?;
        let value = typed(column, raw).map_err(|_| AppError::NotFound)?;
        out.insert(name, value);
    }
    Ok(out)
}

/// Every top-level object of a body, with path attributes merged into each last.
/// Returns the records and whether the body was an array.
pub fn deserialize(
    config: &ResourceConfig,
    body: &Value,
    path_attributes: &Record,
) -> Result<(Vec<ParsedBody>, bool), AppError> {
    let (objects, is_array): (Vec<&Map<String, Value>>, bool) = match body {
        Value::Object(map) => (vec![map], false),
        Value::Array(items) => (
            items
                .iter()
                .map(|item| {
                    item.as_object()
                        .ok_or_else(|| AppError::bad_request("Every element of an array body must be an object"))
                })
                .collect::<Result<_, _>>()?,
            true,
        ),
        _ => return Err(AppError::bad_request("The request body must be a JSON object or array")),
    };
    let parsed = objects
        .into_iter()
        .map(|object| {
            let mut parsed = parse_body_dict(config, &config.model, object, config.allow_subresources)?;
            parsed.attributes.merge(path_attributes.clone());
            Ok(parsed)
        })
        .collect::<Result<Vec<_>, AppError>>()?;
    Ok((parsed, is_array))
}

/// Insert linked records for a stored parent. To-many children get the parent's key; a to-one child is
/// inserted first and the parent updated to point at it. Returns the parent as stored afterwards.
pub async fn link(
    session: &mut Session,
    config: &ResourceConfig,
    model: &Model,
    mut parent: Record,
    linked: Vec<LinkedGroup>,
) -> Result<Record, AppError> {
    for group in linked {
        let rel = model.relationship(&group.relationship).ok_or_else(|| {
            AppError::programming(format!("{} has no relationship {}", model.name, group.relationship))
        })?;
        let target = config
            .schema
            .model(&rel.target)
            .cloned()
            .ok_or_else(|| AppError::programming(format!("unknown model {}", rel.target)))?;
        for child in group.records {
            let mut attributes = child.attributes;
            if rel.uses_list() {
                attributes.insert(rel.remote_column.clone(), parent.get(&rel.local_column).clone());
                session.insert(&target, attributes).await?;
            } else {
                let stored = session.insert(&target, attributes).await?;
                let pointer = Record::new().with(rel.local_column.clone(), stored.get(&rel.remote_column).clone());
                parent = session.update(model, &parent, pointer).await?;
            }
        }
        tracing::debug!(
            model = %model.name,
            key = ?key_of(model, &parent),
            relationship = %group.relationship,
            "linked records created"
        );
    }
    Ok(parent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema_from_json;
    use serde_json::json;
    use std::sync::Arc;

    fn config() -> ResourceConfig {
        let schema = schema_from_json(json!({"models": [
            {"name": "team", "primary_key": "id",
             "columns": [{"name": "id", "type": "integer"}, {"name": "name", "type": "text"},
                         {"name": "founded", "type": "date"}],
             "relationships": [{"name": "characters", "target": "character", "cardinality": "to_many", "remote_column": "team_id"}],
             "properties": [{"name": "display_name", "writes": "name"}, {"name": "slogan"}]},
            {"name": "character", "primary_key": "id",
             "columns": [{"name": "id", "type": "integer"}, {"name": "name", "type": "text"},
                         {"name": "team_id", "type": "integer"}],
             "relationships": [{"name": "team", "target": "team", "cardinality": "to_one", "local_column": "team_id"}]}
        ]}))
        .unwrap();
        ResourceConfig::new(Arc::new(schema), "team").unwrap()
    }

    fn object(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn columns_properties_and_unknown_keys() {
        let config = config();
        let body = object(json!({"founded": "2014-10-07", "display_name": "Team Flash", "slogan": "Run", "nope": 1}));
        let parsed = parse_body_dict(&config, &config.model, &body, true).unwrap();
        assert_eq!(
            parsed.attributes.get("founded"),
            &FieldValue::Date(chrono::NaiveDate::from_ymd_opt(2014, 10, 7).unwrap())
        );
        assert_eq!(parsed.attributes.get("name"), &FieldValue::from("Team Flash"));
        assert_eq!(parsed.attributes.get("slogan"), &FieldValue::from("Run"));
        assert!(!parsed.attributes.contains("nope"));

        let strict = config.unknown_keys(UnknownKeys::Reject);
        assert!(matches!(
            parse_body_dict(&strict, &strict.model, &body, true),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn relationships_recurse_one_level() {
        let config = config().allow_subresources(true);
        let body = json!({"name": "Legends", "characters": [{"name": "Sara", "team": {"name": "ignored"}}]});
        let (parsed, is_array) = deserialize(&config, &body, &Record::new()).unwrap();
        assert!(!is_array);
        let top = &parsed[0];
        assert!(!top.attributes.contains("characters"));
        assert_eq!(top.linked.len(), 1);
        let child = &top.linked[0].records[0];
        assert_eq!(child.attributes.get("name"), &FieldValue::from("Sara"));
        assert!(child.linked.is_empty());

        // subresources off: the relationship key is an unknown key
        let (parsed, _) = deserialize(&config.allow_subresources(false), &body, &Record::new()).unwrap();
        assert!(parsed[0].linked.is_empty());
    }

    #[test]
    fn to_many_requires_a_list() {
        let config = config().allow_subresources(true);
        let body = json!({"characters": {"name": "Sara"}});
        assert!(matches!(deserialize(&config, &body, &Record::new()), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn path_attributes_merge_into_every_record() {
        let config = config().map_attr("team_name", AttrTarget::Column("name".into()));
        let path = parse_path_dict(&config, &config.model, &[("team_name".into(), "Flash".into())]).unwrap();
        let body = json!([{"name": "overridden"}, {"founded": null}]);
        let (parsed, is_array) = deserialize(&config, &body, &path).unwrap();
        assert!(is_array);
        for p in &parsed {
            assert_eq!(p.attributes.get("name"), &FieldValue::from("Flash"));
        }
        assert!(matches!(deserialize(&config, &json!("x"), &path), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn malformed_temporal_values_are_client_errors() {
        let config = config();
        let body = object(json!({"founded": "07/10/2014"}));
        assert!(matches!(
            parse_body_dict(&config, &config.model, &body, false),
            Err(AppError::BadRequest(_))
        ));
    }
}
