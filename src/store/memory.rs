//! In-process store. Each transaction works on a snapshot; commit replays its operations onto the latest
//! committed state and validates versions, unique constraints and foreign keys before publishing.

use crate::codec::FieldValue;
use crate::config::{ColumnType, Model, Schema};
use crate::error::StoreError;
use crate::query::{FetchPlan, Projection};
use crate::record::{Record, Row};
use crate::store::{key_of, Store, Transaction};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Committed rows per model, in insertion order.
type Tables = HashMap<String, Vec<Record>>;

#[derive(Clone)]
pub struct MemoryStore {
    schema: Arc<Schema>,
    tables: Arc<Mutex<Tables>>,
    sequences: Arc<Mutex<HashMap<String, i64>>>,
}

impl MemoryStore {
    pub fn new(schema: Arc<Schema>) -> Self {
        MemoryStore {
            schema,
            tables: Arc::new(Mutex::new(Tables::new())),
            sequences: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Committed rows of a model, for assertions in tests and diagnostics.
    pub fn snapshot(&self, model: &str) -> Vec<Record> {
        lock(&self.tables).get(model).cloned().unwrap_or_default()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let working = lock(&self.tables).clone();
        Ok(Box::new(MemoryTransaction {
            schema: self.schema.clone(),
            tables: self.tables.clone(),
            sequences: self.sequences.clone(),
            working,
            ops: Vec::new(),
        }))
    }
}

enum Op {
    Insert {
        model: String,
        record: Record,
    },
    Update {
        model: String,
        key: FieldValue,
        expected_version: Option<FieldValue>,
        changes: Record,
    },
    Delete {
        model: String,
        key: FieldValue,
        expected_version: Option<FieldValue>,
    },
}

impl Op {
    fn model(&self) -> &str {
        match self {
            Op::Insert { model, .. } | Op::Update { model, .. } | Op::Delete { model, .. } => model,
        }
    }
}

pub struct MemoryTransaction {
    schema: Arc<Schema>,
    tables: Arc<Mutex<Tables>>,
    sequences: Arc<Mutex<HashMap<String, i64>>>,
    working: Tables,
    ops: Vec<Op>,
}

impl MemoryTransaction {
    fn model(&self, name: &str) -> Result<Arc<Model>, StoreError> {
        self.schema
            .model(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownModel(name.to_string()))
    }

    /// Records reached from `record` through one of `model`'s relationships.
    fn related(&self, model: &Model, relationship: &str, record: &Record) -> Vec<Record> {
        let Some(rel) = model.relationship(relationship) else {
            return Vec::new();
        };
        let local = record.get(&rel.local_column);
        if local.is_null() {
            return Vec::new();
        }
        self.working
            .get(&rel.target)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.get(&rel.remote_column).same_as(local))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn matching(&self, plan: &FetchPlan) -> Vec<Record> {
        let model = &plan.model;
        let related = |rel: &str, record: &Record| self.related(model, rel, record);
        self.working
            .get(&model.name)
            .map(|rows| {
                rows.iter()
                    .filter(|r| plan.predicates.iter().all(|p| p.evaluate(r, &related)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn project(&self, model: &Model, record: &Record, projection: &Projection) -> FieldValue {
        match projection {
            Projection::Related { relationship, attribute } => {
                let linked = self.related(model, relationship, record);
                match model.relationship(relationship) {
                    Some(rel) if rel.uses_list() => {
                        FieldValue::List(linked.iter().map(|r| r.get(attribute).clone()).collect())
                    }
                    _ => linked.first().map(|r| r.get(attribute).clone()).unwrap_or(FieldValue::Null),
                }
            }
            Projection::CountRelated { relationship } => {
                FieldValue::Int(self.related(model, relationship, record).len() as i64)
            }
        }
    }

    fn position(&self, model: &Model, key: &FieldValue) -> Option<usize> {
        let pk = &model.primary_key().name;
        self.working
            .get(&model.name)
            .and_then(|rows| rows.iter().position(|r| r.get(pk).same_as(key)))
    }

    fn next_key(&self, model: &Model) -> Result<FieldValue, StoreError> {
        let pk = model.primary_key();
        match pk.column_type {
            ColumnType::Integer => {
                let mut sequences = lock(&self.sequences);
                let next = sequences.entry(model.name.clone()).or_insert(0);
                *next += 1;
                Ok(FieldValue::Int(*next))
            }
            ColumnType::Uuid => Ok(FieldValue::Uuid(uuid::Uuid::new_v4())),
            _ => Err(StoreError::InvalidValue(format!(
                "{}.{} requires a value",
                model.name, pk.name
            ))),
        }
    }

    fn observe_key(&self, model: &Model, key: &FieldValue) {
        if let FieldValue::Int(k) = key {
            let mut sequences = lock(&self.sequences);
            let seq = sequences.entry(model.name.clone()).or_insert(0);
            if *k > *seq {
                *seq = *k;
            }
        }
    }
}

/// Coerce every value to its column type; keys that are not columns are dropped.
fn normalise(model: &Model, values: Record) -> Result<Record, StoreError> {
    let mut out = Record::new();
    for (name, value) in values {
        let Some(column) = model.column(&name) else {
            continue;
        };
        let value = value
            .coerce(&column.column_type)
            .map_err(|e| StoreError::InvalidValue(format!("{}.{}: {}", model.name, name, e)))?;
        out.insert(name, value);
    }
    Ok(out)
}

fn check_not_null(model: &Model, record: &Record) -> Result<(), StoreError> {
    for column in model.columns() {
        if !column.nullable && record.get(&column.name).is_null() {
            return Err(StoreError::InvalidValue(format!(
                "{}.{} may not be null",
                model.name, column.name
            )));
        }
    }
    Ok(())
}

fn bump(version: &FieldValue) -> FieldValue {
    match version {
        FieldValue::Int(v) => FieldValue::Int(v + 1),
        _ => FieldValue::Int(1),
    }
}

/// Ascending order puts nulls last, descending puts them first.
fn compare_for_sort(a: &FieldValue, b: &FieldValue) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => a.compare(b).unwrap_or(Ordering::Equal),
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn fetch(&mut self, plan: &FetchPlan) -> Result<Vec<Row>, StoreError> {
        let model = &plan.model;
        let pk = model.primary_key().name.clone();
        let mut records = self.matching(plan);
        records.sort_by(|a, b| {
            for key in &plan.sort {
                let ord = compare_for_sort(a.get(&key.attribute), b.get(&key.attribute));
                let ord = if key.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            compare_for_sort(a.get(&pk), b.get(&pk))
        });
        let offset = plan.offset.unwrap_or(0) as usize;
        let limit = plan.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let rows = records
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|record| {
                let extra = plan.extra.iter().map(|p| self.project(model, &record, p)).collect();
                Row { record, extra }
            })
            .collect();
        Ok(rows)
    }

    async fn count(&mut self, plan: &FetchPlan) -> Result<u64, StoreError> {
        Ok(self.matching(plan).len() as u64)
    }

    async fn insert(&mut self, model: &Model, values: Record) -> Result<Record, StoreError> {
        let model = self.model(&model.name)?;
        let mut record = normalise(&model, values)?;
        let pk = model.primary_key().name.clone();
        if record.get(&pk).is_null() {
            let key = self.next_key(&model)?;
            record.insert(pk.clone(), key);
        } else {
            self.observe_key(&model, record.get(&pk));
        }
        if let Some(version) = &model.version_column {
            if record.get(version).is_null() {
                record.insert(version.clone(), FieldValue::Int(1));
            }
        }
        check_not_null(&model, &record)?;
        self.working.entry(model.name.clone()).or_default().push(record.clone());
        self.ops.push(Op::Insert {
            model: model.name.clone(),
            record: record.clone(),
        });
        Ok(record)
    }

    async fn update(&mut self, model: &Model, current: &Record, changes: Record) -> Result<Record, StoreError> {
        let model = self.model(&model.name)?;
        let key = key_of(&model, current).clone();
        let mut changes = normalise(&model, changes)?;
        let index = self
            .position(&model, &key)
            .ok_or_else(|| StoreError::StaleVersion(format!("{} {:?} no longer exists", model.name, key)))?;
        let expected_version = match &model.version_column {
            Some(version) => {
                let expected = current.get(version).clone();
                let stored = self.working[&model.name][index].get(version);
                if !stored.same_as(&expected) {
                    return Err(StoreError::StaleVersion(format!("{} {:?}", model.name, key)));
                }
                changes.insert(version.clone(), bump(&expected));
                Some(expected)
            }
            None => None,
        };
        let rows = self.working.entry(model.name.clone()).or_default();
        let mut updated = rows[index].clone();
        updated.merge(changes.clone());
        check_not_null(&model, &updated)?;
        rows[index] = updated.clone();
        self.ops.push(Op::Update {
            model: model.name.clone(),
            key,
            expected_version,
            changes,
        });
        Ok(updated)
    }

    async fn delete(&mut self, model: &Model, current: &Record) -> Result<(), StoreError> {
        let model = self.model(&model.name)?;
        let key = key_of(&model, current).clone();
        let index = self
            .position(&model, &key)
            .ok_or_else(|| StoreError::StaleVersion(format!("{} {:?} no longer exists", model.name, key)))?;
        let expected_version = model.version_column.as_ref().map(|v| current.get(v).clone());
        if let (Some(version), Some(expected)) = (&model.version_column, &expected_version) {
            if !self.working[&model.name][index].get(version).same_as(expected) {
                return Err(StoreError::StaleVersion(format!("{} {:?}", model.name, key)));
            }
        }
        if let Some(rows) = self.working.get_mut(&model.name) {
            rows.remove(index);
        }
        self.ops.push(Op::Delete {
            model: model.name.clone(),
            key,
            expected_version,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.ops.is_empty() {
            return Ok(());
        }
        let mut shared = lock(&self.tables);
        let mut next = shared.clone();
        let mut touched = HashSet::new();
        for op in &self.ops {
            touched.insert(op.model().to_string());
            replay(&self.schema, &mut next, op)?;
        }
        validate(&self.schema, &next, &touched)?;
        tracing::debug!(operations = self.ops.len(), "memory transaction committed");
        *shared = next;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

fn replay(schema: &Schema, tables: &mut Tables, op: &Op) -> Result<(), StoreError> {
    let model = schema
        .model(op.model())
        .ok_or_else(|| StoreError::UnknownModel(op.model().to_string()))?;
    let pk = &model.primary_key().name;
    let rows = tables.entry(model.name.clone()).or_default();
    let locate = |rows: &Vec<Record>, key: &FieldValue| {
        rows.iter()
            .position(|r| r.get(pk).same_as(key))
            .ok_or_else(|| StoreError::StaleVersion(format!("{} {:?} no longer exists", model.name, key)))
    };
    let check_version = |row: &Record, expected: &Option<FieldValue>| match (&model.version_column, expected) {
        (Some(version), Some(expected)) if !row.get(version).same_as(expected) => {
            Err(StoreError::StaleVersion(format!("{} {:?}", model.name, row.get(pk))))
        }
        _ => Ok(()),
    };
    match op {
        Op::Insert { record, .. } => rows.push(record.clone()),
        Op::Update {
            key,
            expected_version,
            changes,
            ..
        } => {
            let index = locate(rows, key)?;
            check_version(&rows[index], expected_version)?;
            rows[index].merge(changes.clone());
        }
        Op::Delete {
            key, expected_version, ..
        } => {
            let index = locate(rows, key)?;
            check_version(&rows[index], expected_version)?;
            rows.remove(index);
        }
    }
    Ok(())
}

fn validate(schema: &Schema, tables: &Tables, touched: &HashSet<String>) -> Result<(), StoreError> {
    let empty = Vec::new();
    for name in touched {
        let Some(model) = schema.model(name) else { continue };
        let rows = tables.get(name).unwrap_or(&empty);
        let mut constraints: Vec<Vec<String>> = model
            .columns()
            .filter(|c| c.unique || c.primary_key)
            .map(|c| vec![c.name.clone()])
            .collect();
        constraints.extend(model.unique.iter().cloned());
        for columns in &constraints {
            for (i, a) in rows.iter().enumerate() {
                if columns.iter().any(|c| a.get(c).is_null()) {
                    continue;
                }
                let clash = rows[i + 1..]
                    .iter()
                    .any(|b| columns.iter().all(|c| a.get(c).same_as(b.get(c))));
                if clash {
                    return Err(StoreError::UniqueViolation(format!("{}({})", name, columns.join(", "))));
                }
            }
        }
    }
    for fk in schema.foreign_keys() {
        if !touched.contains(&fk.from_model) && !touched.contains(&fk.to_model) {
            continue;
        }
        let targets = tables.get(&fk.to_model).unwrap_or(&empty);
        for row in tables.get(&fk.from_model).unwrap_or(&empty) {
            let value = row.get(&fk.from_column);
            if value.is_null() {
                continue;
            }
            if !targets.iter().any(|t| t.get(&fk.to_column).same_as(value)) {
                return Err(StoreError::ForeignKeyViolation(format!(
                    "{}.{} -> {}.{}",
                    fk.from_model, fk.from_column, fk.to_model, fk.to_column
                )));
            }
        }
    }
    Ok(())
}
