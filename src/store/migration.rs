//! Create the tables a schema describes: CREATE SCHEMA, CREATE TABLE, then foreign keys.
//! Idempotent: everything is IF NOT EXISTS, and constraints that already exist are left alone.

use crate::config::{ColumnType, Model, Schema};
use crate::error::AppError;
use crate::store::sql::{qualified_table, quoted};
use sqlx::PgPool;
use std::collections::BTreeSet;

fn column_def(model: &Model, c: &crate::config::ColumnDescriptor) -> String {
    let sql_type = match (&c.column_type, c.primary_key) {
        (ColumnType::Integer, true) if c.sql_type.to_lowercase().contains("serial") => c.sql_type.clone(),
        (ColumnType::Integer, true) => format!("{} GENERATED BY DEFAULT AS IDENTITY", c.sql_type),
        (ColumnType::Uuid, true) => format!("{} DEFAULT gen_random_uuid()", c.sql_type),
        _ => c.sql_type.clone(),
    };
    let mut def = format!("{} {}", quoted(&c.name), sql_type);
    if !c.nullable {
        def.push_str(" NOT NULL");
    }
    if c.unique && !c.primary_key {
        def.push_str(" UNIQUE");
    }
    if model.version_column.as_deref() == Some(c.name.as_str()) {
        def.push_str(" DEFAULT 1");
    }
    def
}

/// DDL for one model's table, without foreign keys.
pub fn create_table_sql(model: &Model) -> String {
    let mut defs: Vec<String> = model.columns().map(|c| column_def(model, c)).collect();
    defs.push(format!("PRIMARY KEY ({})", quoted(&model.primary_key().name)));
    for cols in &model.unique {
        let cols: Vec<String> = cols.iter().map(|c| quoted(c)).collect();
        defs.push(format!("UNIQUE ({})", cols.join(", ")));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        qualified_table(model),
        defs.join(",\n  ")
    )
}

/// Create schemas and tables for every model, then add foreign keys. Models are created in name order.
pub async fn ensure_tables(pool: &PgPool, schema: &Schema) -> Result<(), AppError> {
    let mut models: Vec<_> = schema.models().collect();
    models.sort_by(|a, b| a.name.cmp(&b.name));

    let schema_names: BTreeSet<&str> = models.iter().filter_map(|m| m.schema_name.as_deref()).collect();
    for name in schema_names {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(name)))
            .execute(pool)
            .await?;
    }

    for model in &models {
        let ddl = create_table_sql(model);
        tracing::debug!(sql = %ddl, "create table");
        sqlx::query(&ddl).execute(pool).await?;
    }

    for fk in schema.foreign_keys() {
        let (Some(from), Some(to)) = (schema.model(&fk.from_model), schema.model(&fk.to_model)) else {
            continue;
        };
        let constraint = format!("fk_{}_{}", from.table_name, fk.from_column);
        let sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            qualified_table(from),
            quoted(&constraint),
            quoted(&fk.from_column),
            qualified_table(to),
            quoted(&fk.to_column)
        );
        // already present on every run after the first
        let _ = sqlx::query(&sql).execute(pool).await;
    }
    tracing::info!(models = models.len(), "tables ensured");
    Ok(())
}
