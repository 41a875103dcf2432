//! Parameterised PostgreSQL built from fetch plans. Identifiers come from model config only; every value is a
//! bound parameter with an explicit cast.

use crate::codec::FieldValue;
use crate::config::{ColumnDescriptor, ColumnType, Model, Schema};
use crate::error::StoreError;
use crate::query::{FetchPlan, Predicate, Projection};
use crate::record::Record;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::{Database, Type};

pub(crate) const MAIN_ALIAS: &str = "main";

/// Quote identifier for PostgreSQL (safe: only from config).
pub(crate) fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub(crate) fn qualified_table(model: &Model) -> String {
    match &model.schema_name {
        Some(schema) => format!("{}.{}", quoted(schema), quoted(&model.table_name)),
        None => quoted(&model.table_name),
    }
}

/// Name of the i-th extra projection in a result row.
pub(crate) fn extra_name(i: usize) -> String {
    format!("__extra_{}", i)
}

/// A value bound to a query, typed so PostgreSQL sees the right parameter type.
#[derive(Clone, Debug)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Decimal(Decimal),
    Uuid(uuid::Uuid),
    Json(Value),
}

impl PgBindValue {
    /// Bind form of a value destined for `column_type`.
    pub fn from_field(value: &FieldValue, column_type: &ColumnType) -> Self {
        match value {
            FieldValue::Null => PgBindValue::Null,
            FieldValue::Bool(b) => PgBindValue::Bool(*b),
            FieldValue::Int(i) => PgBindValue::I64(*i),
            FieldValue::Float(f) => PgBindValue::F64(*f),
            FieldValue::Text(s) => PgBindValue::String(s.clone()),
            FieldValue::DateTime(d) => match column_type {
                ColumnType::DateTime { timezone: true } => PgBindValue::TimestampTz(d.and_utc()),
                _ => PgBindValue::Timestamp(*d),
            },
            FieldValue::Date(d) => PgBindValue::Date(*d),
            FieldValue::Time(t) => PgBindValue::Time(*t),
            FieldValue::Decimal(d) => PgBindValue::Decimal(*d),
            FieldValue::Uuid(u) => PgBindValue::Uuid(*u),
            FieldValue::Json(v) => match column_type {
                ColumnType::Json => PgBindValue::Json(v.clone()),
                _ => PgBindValue::String(v.to_string()),
            },
            #[cfg(feature = "geometry")]
            FieldValue::Geometry(g) => PgBindValue::String(g.to_geojson().to_string()),
            FieldValue::List(_) => PgBindValue::Json(value.clone().into_plain_json()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            PgBindValue::Null => Ok(IsNull::Yes),
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf),
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf),
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf),
            PgBindValue::String(s) => <String as Encode<Postgres>>::encode_by_ref(s, buf),
            PgBindValue::Timestamp(d) => <NaiveDateTime as Encode<Postgres>>::encode_by_ref(d, buf),
            PgBindValue::TimestampTz(d) => <DateTime<Utc> as Encode<Postgres>>::encode_by_ref(d, buf),
            PgBindValue::Date(d) => <NaiveDate as Encode<Postgres>>::encode_by_ref(d, buf),
            PgBindValue::Time(t) => <NaiveTime as Encode<Postgres>>::encode_by_ref(t, buf),
            PgBindValue::Decimal(d) => <Decimal as Encode<Postgres>>::encode_by_ref(d, buf),
            PgBindValue::Uuid(u) => <uuid::Uuid as Encode<Postgres>>::encode_by_ref(u, buf),
            PgBindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgBindValue::Null | PgBindValue::String(_) => <String as Type<Postgres>>::type_info(),
            PgBindValue::Bool(_) => <bool as Type<Postgres>>::type_info(),
            PgBindValue::I64(_) => <i64 as Type<Postgres>>::type_info(),
            PgBindValue::F64(_) => <f64 as Type<Postgres>>::type_info(),
            PgBindValue::Timestamp(_) => <NaiveDateTime as Type<Postgres>>::type_info(),
            PgBindValue::TimestampTz(_) => <DateTime<Utc> as Type<Postgres>>::type_info(),
            PgBindValue::Date(_) => <NaiveDate as Type<Postgres>>::type_info(),
            PgBindValue::Time(_) => <NaiveTime as Type<Postgres>>::type_info(),
            PgBindValue::Decimal(_) => <Decimal as Type<Postgres>>::type_info(),
            PgBindValue::Uuid(_) => <uuid::Uuid as Type<Postgres>>::type_info(),
            PgBindValue::Json(_) => <Value as Type<Postgres>>::type_info(),
        })
    }
}

impl Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
    aliases: usize,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
            aliases: 0,
        }
    }

    fn push_param(&mut self, v: PgBindValue) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Placeholder for a value of `column`, cast to the column's type.
    fn placeholder(&mut self, column: &ColumnDescriptor, value: &FieldValue) -> String {
        let n = self.push_param(PgBindValue::from_field(value, &column.column_type));
        match column.column_type {
            ColumnType::Geometry { .. } => format!("ST_SetSRID(ST_GeomFromGeoJSON(${}::text), 4326)", n),
            ColumnType::Other(_) => format!("${}", n),
            _ => format!("${}::{}", n, column.column_type.pg_cast()),
        }
    }

    fn next_alias(&mut self) -> String {
        self.aliases += 1;
        format!("sub{}", self.aliases)
    }
}

/// Read expression for a column, normalised so each semantic type decodes one way.
fn column_expr(alias: Option<&str>, column: &ColumnDescriptor) -> String {
    let col = match alias {
        Some(a) => format!("{}.{}", a, quoted(&column.name)),
        None => quoted(&column.name),
    };
    match &column.column_type {
        ColumnType::Geometry { .. } => format!("ST_AsGeoJSON({})", col),
        ColumnType::Other(_) => format!("{}::text", col),
        ty => format!("{}::{}", col, ty.pg_cast()),
    }
}

fn select_list(alias: Option<&str>, model: &Model) -> String {
    model
        .columns()
        .map(|c| format!("{} AS {}", column_expr(alias, c), quoted(&c.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column<'a>(model: &'a Model, name: &str) -> Result<&'a ColumnDescriptor, StoreError> {
    model
        .column(name)
        .ok_or_else(|| StoreError::Unsupported(format!("{} has no column {}", model.name, name)))
}

fn predicate_sql(
    q: &mut QueryBuf,
    schema: &Schema,
    model: &Model,
    alias: &str,
    predicate: &Predicate,
) -> Result<String, StoreError> {
    let col = |name: &str| format!("{}.{}", alias, quoted(name));
    Ok(match predicate {
        Predicate::Eq(attr, FieldValue::Null) | Predicate::IsNull(attr) => {
            column(model, attr)?;
            format!("{} IS NULL", col(attr))
        }
        Predicate::NotNull(attr) => {
            column(model, attr)?;
            format!("{} IS NOT NULL", col(attr))
        }
        Predicate::Eq(attr, value) => {
            let c = column(model, attr)?;
            format!("{} = {}", col(attr), q.placeholder(c, value))
        }
        Predicate::Like {
            attribute,
            pattern,
            case_insensitive,
        } => {
            column(model, attribute)?;
            let n = q.push_param(PgBindValue::String(pattern.clone()));
            let op = if *case_insensitive { "ILIKE" } else { "LIKE" };
            format!("{}::text {} ${}::text", col(attribute), op, n)
        }
        Predicate::Compare { attribute, op, value } => {
            let c = column(model, attribute)?;
            format!("{} {} {}", col(attribute), op.sql(), q.placeholder(c, value))
        }
        Predicate::In(attr, values) => {
            let c = column(model, attr)?;
            if values.is_empty() {
                "FALSE".to_string()
            } else {
                let phs: Vec<String> = values.iter().map(|v| q.placeholder(c, v)).collect();
                format!("{} IN ({})", col(attr), phs.join(", "))
            }
        }
        Predicate::And(items) => join(q, schema, model, alias, items, " AND ", "TRUE")?,
        Predicate::Or(items) => join(q, schema, model, alias, items, " OR ", "FALSE")?,
        Predicate::Not(inner) => format!("NOT ({})", predicate_sql(q, schema, model, alias, inner)?),
        Predicate::Exists {
            relationship,
            predicate,
        } => {
            let rel = model
                .relationship(relationship)
                .ok_or_else(|| StoreError::Unsupported(format!("{} has no relationship {}", model.name, relationship)))?;
            let target = schema
                .model(&rel.target)
                .ok_or_else(|| StoreError::UnknownModel(rel.target.clone()))?;
            let sub = q.next_alias();
            let inner = predicate_sql(q, schema, target, &sub, predicate)?;
            format!(
                "EXISTS (SELECT 1 FROM {} {} WHERE {}.{} = {} AND {})",
                qualified_table(target),
                sub,
                sub,
                quoted(&rel.remote_column),
                col(&rel.local_column),
                inner
            )
        }
    })
}

fn join(
    q: &mut QueryBuf,
    schema: &Schema,
    model: &Model,
    alias: &str,
    items: &[Predicate],
    sep: &str,
    empty: &str,
) -> Result<String, StoreError> {
    if items.is_empty() {
        return Ok(empty.to_string());
    }
    let parts = items
        .iter()
        .map(|p| predicate_sql(q, schema, model, alias, p))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", parts.join(sep)))
}

fn where_clause(q: &mut QueryBuf, schema: &Schema, plan: &FetchPlan) -> Result<String, StoreError> {
    if plan.predicates.is_empty() {
        return Ok(String::new());
    }
    let parts = plan
        .predicates
        .iter()
        .map(|p| predicate_sql(q, schema, &plan.model, MAIN_ALIAS, p))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(" WHERE {}", parts.join(" AND ")))
}

fn projection_sql(q: &mut QueryBuf, schema: &Schema, model: &Model, projection: &Projection) -> Result<String, StoreError> {
    let relationship = match projection {
        Projection::Related { relationship, .. } | Projection::CountRelated { relationship } => relationship,
    };
    let rel = model
        .relationship(relationship)
        .ok_or_else(|| StoreError::Unsupported(format!("{} has no relationship {}", model.name, relationship)))?;
    let target = schema
        .model(&rel.target)
        .ok_or_else(|| StoreError::UnknownModel(rel.target.clone()))?;
    let sub = q.next_alias();
    let from = format!(
        "{} {} WHERE {}.{} = {}.{}",
        qualified_table(target),
        sub,
        sub,
        quoted(&rel.remote_column),
        MAIN_ALIAS,
        quoted(&rel.local_column)
    );
    Ok(match projection {
        Projection::CountRelated { .. } => format!("(SELECT COUNT(*) FROM {})", from),
        Projection::Related { attribute, .. } => {
            let expr = column_expr(Some(&sub), column(target, attribute)?);
            if rel.uses_list() {
                format!("(SELECT COALESCE(json_agg({}), '[]'::json) FROM {})::jsonb", expr, from)
            } else {
                format!("(SELECT {} FROM {} LIMIT 1)", expr, from)
            }
        }
    })
}

/// SELECT for a plan: main table aliased as "main", extra projections as scalar subqueries.
pub fn select(schema: &Schema, plan: &FetchPlan) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let model = &plan.model;
    let mut select_parts = vec![select_list(Some(MAIN_ALIAS), model)];
    for (i, projection) in plan.extra.iter().enumerate() {
        let expr = projection_sql(&mut q, schema, model, projection)?;
        select_parts.push(format!("{} AS {}", expr, quoted(&extra_name(i))));
    }
    let where_clause = where_clause(&mut q, schema, plan)?;
    let mut order: Vec<String> = Vec::new();
    for key in &plan.sort {
        column(model, &key.attribute)?;
        let dir = if key.descending { " DESC" } else { "" };
        order.push(format!("{}.{}{}", MAIN_ALIAS, quoted(&key.attribute), dir));
    }
    order.push(format!("{}.{}", MAIN_ALIAS, quoted(&model.primary_key().name)));
    let limit_clause = plan.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = plan.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {} {}{} ORDER BY {}{}{}",
        select_parts.join(", "),
        qualified_table(model),
        MAIN_ALIAS,
        where_clause,
        order.join(", "),
        limit_clause,
        offset_clause
    );
    Ok(q)
}

pub fn count(schema: &Schema, plan: &FetchPlan) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let where_clause = where_clause(&mut q, schema, plan)?;
    q.sql = format!(
        "SELECT COUNT(*) FROM {} {}{}",
        qualified_table(&plan.model),
        MAIN_ALIAS,
        where_clause
    );
    Ok(q)
}

/// INSERT of the given columns only; omitted columns take their database default.
pub fn insert(model: &Model, values: &Record) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in model.columns() {
        if !values.contains(&c.name) {
            continue;
        }
        let value = values.get(&c.name);
        if c.primary_key && value.is_null() {
            continue;
        }
        cols.push(quoted(&c.name));
        placeholders.push(q.placeholder(c, value));
    }
    let returning = select_list(None, model);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", qualified_table(model), returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            qualified_table(model),
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    Ok(q)
}

/// UPDATE by primary key; with a version column, also by the version read and bumping it.
pub fn update(model: &Model, current: &Record, changes: &Record) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let pk = model.primary_key();
    let version = model.version_column.as_deref();
    let mut sets = Vec::new();
    for c in model.columns() {
        if c.primary_key || Some(c.name.as_str()) == version || !changes.contains(&c.name) {
            continue;
        }
        let ph = q.placeholder(c, changes.get(&c.name));
        sets.push(format!("{} = {}", quoted(&c.name), ph));
    }
    if let Some(v) = version {
        sets.push(format!("{} = {}.{} + 1", quoted(v), MAIN_ALIAS, quoted(v)));
    }
    if sets.is_empty() {
        sets.push(format!("{} = {}.{}", quoted(&pk.name), MAIN_ALIAS, quoted(&pk.name)));
    }
    let mut conditions = vec![format!(
        "{}.{} = {}",
        MAIN_ALIAS,
        quoted(&pk.name),
        q.placeholder(pk, current.get(&pk.name))
    )];
    if let Some(v) = version {
        let c = column(model, v)?;
        conditions.push(format!("{}.{} = {}", MAIN_ALIAS, quoted(v), q.placeholder(c, current.get(v))));
    }
    q.sql = format!(
        "UPDATE {} AS {} SET {} WHERE {} RETURNING {}",
        qualified_table(model),
        MAIN_ALIAS,
        sets.join(", "),
        conditions.join(" AND "),
        select_list(Some(MAIN_ALIAS), model)
    );
    Ok(q)
}

pub fn delete(model: &Model, current: &Record) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let pk = model.primary_key();
    let mut conditions = vec![format!("{} = {}", quoted(&pk.name), q.placeholder(pk, current.get(&pk.name)))];
    if let Some(v) = model.version_column.as_deref() {
        let c = column(model, v)?;
        conditions.push(format!("{} = {}", quoted(v), q.placeholder(c, current.get(v))));
    }
    q.sql = format!("DELETE FROM {} WHERE {}", qualified_table(model), conditions.join(" AND "));
    Ok(q)
}
