//! Load model config from JSON and resolve it into a `Schema`.

use crate::config::resolved::{
    AttributeDescriptor, AttributeKind, ColumnDescriptor, ColumnType, ForeignKey, GeometryKind, Model, Property,
    Relationship, Schema,
};
use crate::config::types::*;
use crate::config::validate;
use crate::error::ConfigError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Build the resolved schema from full config (validates first).
pub fn resolve(config: &FullConfig) -> Result<Schema, ConfigError> {
    validate(config)?;
    let primary_keys: HashMap<&str, &str> = config
        .models
        .iter()
        .map(|m| (m.name.as_str(), m.primary_key.as_str()))
        .collect();

    let mut models = HashMap::new();
    let mut foreign_keys: Vec<ForeignKey> = Vec::new();

    for m in &config.models {
        let mut attributes = Vec::with_capacity(m.columns.len() + m.relationships.len() + m.properties.len());
        for c in &m.columns {
            let column_type = infer_column_type(c)?;
            attributes.push(AttributeDescriptor {
                name: c.name.clone(),
                kind: AttributeKind::Column(ColumnDescriptor {
                    name: c.name.clone(),
                    column_type,
                    sql_type: c.type_.sql(),
                    nullable: c.nullable && c.name != m.primary_key,
                    unique: c.unique,
                    primary_key: c.name == m.primary_key,
                }),
            });
        }
        for r in &m.relationships {
            let target_pk = primary_keys.get(r.target.as_str()).copied().unwrap_or_default();
            let (local_column, remote_column) = match r.cardinality {
                Cardinality::ToOne => (
                    r.local_column.clone().unwrap_or_default(),
                    r.remote_column.clone().unwrap_or_else(|| target_pk.to_string()),
                ),
                Cardinality::ToMany => (
                    r.local_column.clone().unwrap_or_else(|| m.primary_key.clone()),
                    r.remote_column.clone().unwrap_or_default(),
                ),
            };
            let fk = match r.cardinality {
                Cardinality::ToOne => ForeignKey {
                    from_model: m.name.clone(),
                    from_column: local_column.clone(),
                    to_model: r.target.clone(),
                    to_column: remote_column.clone(),
                },
                Cardinality::ToMany => ForeignKey {
                    from_model: r.target.clone(),
                    from_column: remote_column.clone(),
                    to_model: m.name.clone(),
                    to_column: local_column.clone(),
                },
            };
            if !foreign_keys.contains(&fk) {
                foreign_keys.push(fk);
            }
            attributes.push(AttributeDescriptor {
                name: r.name.clone(),
                kind: AttributeKind::Relationship(Relationship {
                    name: r.name.clone(),
                    target: r.target.clone(),
                    cardinality: r.cardinality,
                    local_column,
                    remote_column,
                }),
            });
        }
        for p in &m.properties {
            attributes.push(AttributeDescriptor {
                name: p.name.clone(),
                kind: AttributeKind::Property(Property {
                    name: p.name.clone(),
                    writes: p.writes.clone(),
                }),
            });
        }

        let index: HashMap<String, usize> = attributes
            .iter()
            .enumerate()
            .map(|(i, a)| (a.name.clone(), i))
            .collect();
        let primary_key = index[m.primary_key.as_str()];
        let model = Model {
            name: m.name.clone(),
            table_name: m.table.clone().unwrap_or_else(|| m.name.clone()),
            schema_name: m.schema.clone(),
            attributes,
            index,
            primary_key,
            unique: m.unique.clone(),
            version_column: m.version_column.clone(),
        };
        tracing::debug!(model = %model.name, attributes = model.attributes.len(), "resolved model");
        models.insert(m.name.clone(), Arc::new(model));
    }

    Ok(Schema { models, foreign_keys })
}

/// Map a configured SQL type onto the semantic column type.
fn infer_column_type(c: &ColumnConfig) -> Result<ColumnType, ConfigError> {
    let lower = c.type_.name().trim().to_lowercase();
    let ty = if lower == "timestamptz" || lower == "timestamp with time zone" {
        ColumnType::DateTime { timezone: true }
    } else if lower == "timestamp" || lower.starts_with("timestamp ") || lower == "datetime" {
        ColumnType::DateTime { timezone: false }
    } else if lower == "date" {
        ColumnType::Date
    } else if lower == "time" || lower.starts_with("time ") {
        ColumnType::Time
    } else if lower.contains("uuid") {
        ColumnType::Uuid
    } else if lower.contains("int") || lower.contains("serial") {
        ColumnType::Integer
    } else if lower == "real" || lower.starts_with("double") || lower.starts_with("float") {
        ColumnType::Float
    } else if lower.starts_with("bool") {
        ColumnType::Boolean
    } else if lower == "numeric" || lower == "decimal" {
        ColumnType::Decimal
    } else if lower == "text" || lower.contains("char") || lower == "string" {
        ColumnType::String
    } else if lower == "json" || lower == "jsonb" {
        ColumnType::Json
    } else if lower == "geometry" {
        let (kind, implied) = match c.geometry_type.as_deref().map(str::to_uppercase).as_deref() {
            Some("POINT") => (GeometryKind::Point, 2),
            Some("POINTZ") => (GeometryKind::Point, 3),
            Some("LINESTRING") => (GeometryKind::LineString, 2),
            Some("LINESTRINGZ") => (GeometryKind::LineString, 3),
            Some("POLYGON") => (GeometryKind::Polygon, 2),
            Some("POLYGONZ") => (GeometryKind::Polygon, 3),
            None => (GeometryKind::Any, 2),
            Some(other) => {
                return Err(ConfigError::Validation(format!(
                    "{}: unsupported geometry_type {}",
                    c.name, other
                )))
            }
        };
        let dimension = c.dimension.unwrap_or(implied);
        if !(2..=3).contains(&dimension) {
            return Err(ConfigError::Validation(format!(
                "{}: geometry dimension must be 2 or 3",
                c.name
            )));
        }
        ColumnType::Geometry { kind, dimension }
    } else {
        ColumnType::Other(c.type_.name().to_string())
    };
    Ok(ty)
}

/// Read a model config file (`{"models": [...]}`).
pub fn load_from_file(path: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&text).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}

/// Resolve a schema straight from a JSON value. Mostly useful for tests and embedded configs.
pub fn schema_from_json(value: serde_json::Value) -> Result<Schema, ConfigError> {
    let config: FullConfig = serde_json::from_value(value).map_err(|e| ConfigError::Load(e.to_string()))?;
    resolve(&config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn company_schema() -> Schema {
        schema_from_json(json!({"models": [
            {"name": "company", "table": "companies", "primary_key": "id",
             "columns": [{"name": "id", "type": "integer"}, {"name": "name", "type": "varchar", "unique": true}],
             "relationships": [{"name": "employees", "target": "employee", "cardinality": "to_many", "remote_column": "company_id"}]},
            {"name": "employee", "table": "employees", "primary_key": "id",
             "columns": [
                {"name": "id", "type": "integer"},
                {"name": "joined", "type": "timestamp"},
                {"name": "pay_rate", "type": {"name": "numeric", "params": [12, 4]}},
                {"name": "start_time", "type": "time"},
                {"name": "company_id", "type": "integer"}
             ],
             "relationships": [{"name": "company", "target": "company", "cardinality": "to_one", "local_column": "company_id"}]}
        ]}))
        .unwrap()
    }

    #[test]
    fn resolves_column_types() {
        let schema = company_schema();
        let employee = schema.model("employee").unwrap();
        assert_eq!(employee.column("joined").unwrap().column_type, ColumnType::DateTime { timezone: false });
        assert_eq!(employee.column("pay_rate").unwrap().column_type, ColumnType::Decimal);
        assert_eq!(employee.column("pay_rate").unwrap().sql_type, "numeric(12,4)");
        assert_eq!(employee.column("start_time").unwrap().column_type, ColumnType::Time);
        assert_eq!(employee.primary_key().name, "id");
        assert!(employee.column("company").is_none());
        assert!(employee.relationship("company").is_some());
    }

    #[test]
    fn both_sides_of_a_relationship_share_one_foreign_key() {
        let schema = company_schema();
        assert_eq!(schema.foreign_keys().len(), 1);
        let fk = &schema.foreign_keys()[0];
        assert_eq!(fk.from_model, "employee");
        assert_eq!(fk.from_column, "company_id");
        assert_eq!(fk.to_model, "company");
        assert_eq!(fk.to_column, "id");
        let company = schema.model("company").unwrap();
        let rel = company.relationship("employees").unwrap();
        assert_eq!(rel.local_column, "id");
        assert!(rel.uses_list());
    }

    #[cfg(feature = "geometry")]
    #[test]
    fn geometry_dimension_follows_shape_suffix() {
        let schema = schema_from_json(json!({"models": [
            {"name": "place", "primary_key": "id", "columns": [
                {"name": "id", "type": "integer"},
                {"name": "location", "type": "geometry", "geometry_type": "POINTZ"}
            ]}
        ]}))
        .unwrap();
        let place = schema.model("place").unwrap();
        assert_eq!(
            place.column("location").unwrap().column_type,
            ColumnType::Geometry { kind: GeometryKind::Point, dimension: 3 }
        );
    }
}
