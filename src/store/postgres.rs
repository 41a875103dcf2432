//! PostgreSQL store: one sqlx transaction per request.

use crate::codec::FieldValue;
use crate::config::{ColumnDescriptor, ColumnType, Model, Schema};
use crate::error::StoreError;
use crate::query::{FetchPlan, Projection};
use crate::record::{Record, Row};
use crate::store::sql::{self, extra_name, QueryBuf};
use crate::store::{Store, Transaction};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row as _};
use std::sync::Arc;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    schema: Arc<Schema>,
}

impl PgStore {
    pub fn new(pool: PgPool, schema: Arc<Schema>) -> Self {
        PgStore { pool, schema }
    }

    pub async fn connect(database_url: &str, max_connections: u32, schema: Arc<Schema>) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(PgStore::new(pool, schema))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction {
            tx,
            schema: self.schema.clone(),
        }))
    }
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    schema: Arc<Schema>,
}

impl PgTransaction {
    async fn query_many(&mut self, q: &QueryBuf) -> Result<Vec<PgRow>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        query.fetch_all(&mut *self.tx).await.map_err(classify)
    }

    async fn query_optional(&mut self, q: &QueryBuf) -> Result<Option<PgRow>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        query.fetch_optional(&mut *self.tx).await.map_err(classify)
    }

    /// Target column of a `Related` projection, so its value decodes with the right type.
    fn projected_column(&self, model: &Model, relationship: &str, attribute: &str) -> Option<(ColumnDescriptor, bool)> {
        let rel = model.relationship(relationship)?;
        let target = self.schema.model(&rel.target)?;
        target.column(attribute).map(|c| (c.clone(), rel.uses_list()))
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn fetch(&mut self, plan: &FetchPlan) -> Result<Vec<Row>, StoreError> {
        let q = sql::select(&self.schema, plan)?;
        let rows = self.query_many(&q).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = decode_record(&plan.model, row)?;
            let mut extra = Vec::with_capacity(plan.extra.len());
            for (i, projection) in plan.extra.iter().enumerate() {
                let name = extra_name(i);
                let value = match projection {
                    Projection::CountRelated { .. } => {
                        FieldValue::Int(row.try_get::<i64, _>(name.as_str()).map_err(classify)?)
                    }
                    Projection::Related { relationship, attribute } => {
                        match self.projected_column(&plan.model, relationship, attribute) {
                            Some((column, true)) => {
                                let items: Option<Value> = row.try_get(name.as_str()).map_err(classify)?;
                                decode_list(&column, items)?
                            }
                            Some((column, false)) => decode_cell(row, &name, &column.column_type)?,
                            None => FieldValue::Null,
                        }
                    }
                };
                extra.push(value);
            }
            out.push(Row { record, extra });
        }
        Ok(out)
    }

    async fn count(&mut self, plan: &FetchPlan) -> Result<u64, StoreError> {
        let q = sql::count(&self.schema, plan)?;
        let row = self.query_optional(&q).await?;
        let n: i64 = match row {
            Some(r) => r.try_get(0).map_err(classify)?,
            None => 0,
        };
        Ok(n.max(0) as u64)
    }

    async fn insert(&mut self, model: &Model, values: Record) -> Result<Record, StoreError> {
        let q = sql::insert(model, &values)?;
        let row = self
            .query_optional(&q)
            .await?
            .ok_or_else(|| StoreError::Db(sqlx::Error::RowNotFound))?;
        decode_record(model, &row)
    }

    async fn update(&mut self, model: &Model, current: &Record, changes: Record) -> Result<Record, StoreError> {
        let q = sql::update(model, current, &changes)?;
        match self.query_optional(&q).await? {
            Some(row) => decode_record(model, &row),
            None => Err(StoreError::StaleVersion(format!(
                "{} row changed or removed since it was read",
                model.name
            ))),
        }
    }

    async fn delete(&mut self, model: &Model, current: &Record) -> Result<(), StoreError> {
        let q = sql::delete(model, current)?;
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        let result = query.execute(&mut *self.tx).await.map_err(classify)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::StaleVersion(format!(
                "{} row changed or removed since it was read",
                model.name
            )));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(classify)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(classify)
    }
}

/// Sort database errors into the classes the resource layer reports.
fn classify(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
        let message = db.message().to_string();
        match code.as_str() {
            "23505" => return StoreError::UniqueViolation(message),
            "23503" => return StoreError::ForeignKeyViolation(message),
            "23502" => return StoreError::InvalidValue(message),
            c if c.starts_with("22") => return StoreError::InvalidValue(message),
            _ => {}
        }
    }
    StoreError::Db(e)
}

fn decode_record(model: &Model, row: &PgRow) -> Result<Record, StoreError> {
    let mut record = Record::new();
    for column in model.columns() {
        let value = decode_cell(row, &column.name, &column.column_type)?;
        record.insert(column.name.clone(), value);
    }
    Ok(record)
}

/// One cell, decoded by the column's semantic type (the select list casts every column accordingly).
fn decode_cell(row: &PgRow, name: &str, ty: &ColumnType) -> Result<FieldValue, StoreError> {
    let value = match ty {
        ColumnType::Integer => row.try_get::<Option<i64>, _>(name).map_err(classify)?.into(),
        ColumnType::Float => row
            .try_get::<Option<f64>, _>(name)
            .map_err(classify)?
            .map(FieldValue::Float)
            .unwrap_or(FieldValue::Null),
        ColumnType::Boolean => row.try_get::<Option<bool>, _>(name).map_err(classify)?.into(),
        ColumnType::String | ColumnType::Other(_) => row.try_get::<Option<String>, _>(name).map_err(classify)?.into(),
        ColumnType::DateTime { timezone: true } => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name)
            .map_err(classify)?
            .map(|d| FieldValue::DateTime(d.naive_utc()))
            .unwrap_or(FieldValue::Null),
        ColumnType::DateTime { timezone: false } => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(name)
            .map_err(classify)?
            .map(FieldValue::DateTime)
            .unwrap_or(FieldValue::Null),
        ColumnType::Date => row
            .try_get::<Option<chrono::NaiveDate>, _>(name)
            .map_err(classify)?
            .map(FieldValue::Date)
            .unwrap_or(FieldValue::Null),
        ColumnType::Time => row
            .try_get::<Option<chrono::NaiveTime>, _>(name)
            .map_err(classify)?
            .map(FieldValue::Time)
            .unwrap_or(FieldValue::Null),
        ColumnType::Decimal => row
            .try_get::<Option<rust_decimal::Decimal>, _>(name)
            .map_err(classify)?
            .map(FieldValue::Decimal)
            .unwrap_or(FieldValue::Null),
        ColumnType::Uuid => row
            .try_get::<Option<uuid::Uuid>, _>(name)
            .map_err(classify)?
            .map(FieldValue::Uuid)
            .unwrap_or(FieldValue::Null),
        ColumnType::Json => row
            .try_get::<Option<Value>, _>(name)
            .map_err(classify)?
            .map(FieldValue::Json)
            .unwrap_or(FieldValue::Null),
        ColumnType::Geometry { .. } => match row.try_get::<Option<String>, _>(name).map_err(classify)? {
            Some(text) => geometry_from_text(&text, ty)?,
            None => FieldValue::Null,
        },
    };
    Ok(value)
}

fn geometry_from_text(text: &str, ty: &ColumnType) -> Result<FieldValue, StoreError> {
    let json: Value = serde_json::from_str(text).map_err(|e| StoreError::InvalidValue(e.to_string()))?;
    FieldValue::Json(json).coerce(ty).map_err(StoreError::InvalidValue)
}

/// Values of a to-many projection, aggregated by the database as a JSON array.
fn decode_list(column: &ColumnDescriptor, items: Option<Value>) -> Result<FieldValue, StoreError> {
    let Some(Value::Array(items)) = items else {
        return Ok(FieldValue::List(Vec::new()));
    };
    items
        .iter()
        .map(|item| match (&column.column_type, item) {
            (ColumnType::Geometry { .. }, Value::String(text)) => geometry_from_text(text, &column.column_type),
            (ty, item) => FieldValue::from_json(item)
                .coerce(ty)
                .map_err(StoreError::InvalidValue),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(FieldValue::List)
}
