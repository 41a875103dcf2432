//! One request's unit of work: store calls with their failures translated into client-facing errors.

use crate::config::Model;
use crate::error::{
    AppError, StoreError, CONDITIONS_VIOLATED, FOREIGN_KEY_VIOLATED, LINKED_CONTENT, UNIQUE_VIOLATED,
};
use crate::query::{FetchPlan, Resolution};
use crate::record::{Record, Row};
use crate::store::{Store, Transaction};

/// What a write is doing; decides the message for a foreign-key failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Delete,
}

/// Map a store failure onto the status and fixed message a client sees.
pub fn map_store_error(op: Operation, e: StoreError) -> AppError {
    match e {
        StoreError::UniqueViolation(detail) => {
            tracing::debug!(detail = %detail, "unique constraint violated");
            AppError::Conflict(UNIQUE_VIOLATED)
        }
        StoreError::ForeignKeyViolation(detail) => {
            tracing::debug!(detail = %detail, "foreign key constraint violated");
            match op {
                Operation::Delete => AppError::Conflict(LINKED_CONTENT),
                Operation::Read | Operation::Write => AppError::Conflict(FOREIGN_KEY_VIOLATED),
            }
        }
        StoreError::StaleVersion(detail) => {
            tracing::debug!(detail = %detail, "stale version");
            AppError::Conflict(CONDITIONS_VIOLATED)
        }
        StoreError::InvalidValue(detail) => {
            tracing::debug!(detail = %detail, "value rejected by store");
            AppError::bad_request("A value provided is invalid or missing")
        }
        other => AppError::Store(other),
    }
}

/// Only columns reach the store. Properties without a write target were for hooks and end here.
fn column_values(model: &Model, values: Record) -> Record {
    let mut out = Record::new();
    for (name, value) in values {
        if model.is_column(&name) {
            out.insert(name, value);
        } else {
            tracing::debug!(model = %model.name, attribute = %name, "not a column; not stored");
        }
    }
    out
}

pub struct Session {
    tx: Box<dyn Transaction>,
    op: Operation,
}

impl Session {
    pub async fn begin(store: &dyn Store, op: Operation) -> Result<Self, AppError> {
        let tx = store.begin().await.map_err(|e| map_store_error(op, e))?;
        Ok(Session { tx, op })
    }

    /// The underlying transaction, as handed to hooks.
    pub fn tx(&mut self) -> &mut dyn Transaction {
        self.tx.as_mut()
    }

    pub async fn fetch(&mut self, plan: &FetchPlan) -> Result<Vec<Row>, AppError> {
        tracing::debug!(model = %plan.model.name, predicates = plan.predicates.len(), sort = ?plan.sort, "fetch");
        self.tx.fetch(plan).await.map_err(|e| map_store_error(self.op, e))
    }

    pub async fn count(&mut self, plan: &FetchPlan) -> Result<u64, AppError> {
        self.tx.count(plan).await.map_err(|e| map_store_error(self.op, e))
    }

    /// `.one()`-style lookup: tells no match from several.
    pub async fn one(&mut self, plan: &FetchPlan) -> Result<Resolution, AppError> {
        let rows = self.fetch(&plan.for_one()).await?;
        Ok(Resolution::from_rows(rows))
    }

    pub async fn insert(&mut self, model: &Model, values: Record) -> Result<Record, AppError> {
        let values = column_values(model, values);
        self.tx.insert(model, values).await.map_err(|e| map_store_error(self.op, e))
    }

    pub async fn update(&mut self, model: &Model, current: &Record, changes: Record) -> Result<Record, AppError> {
        let changes = column_values(model, changes);
        self.tx
            .update(model, current, changes)
            .await
            .map_err(|e| map_store_error(self.op, e))
    }

    pub async fn delete(&mut self, model: &Model, current: &Record) -> Result<(), AppError> {
        self.tx.delete(model, current).await.map_err(|e| map_store_error(self.op, e))
    }

    pub async fn commit(self) -> Result<(), AppError> {
        let op = self.op;
        self.tx.commit().await.map_err(|e| map_store_error(op, e))
    }

    /// End a read-only session.
    pub async fn close(self) -> Result<(), AppError> {
        let op = self.op;
        self.tx.rollback().await.map_err(|e| map_store_error(op, e))
    }
}
