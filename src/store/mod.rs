//! Storage seam: every request runs inside one `Transaction`.

pub mod memory;
pub mod migration;
pub mod postgres;
mod sql;

pub use memory::MemoryStore;
pub use migration::ensure_tables;
pub use postgres::PgStore;

use crate::codec::FieldValue;
use crate::config::Model;
use crate::error::StoreError;
use crate::query::FetchPlan;
use crate::record::{Record, Row};
use async_trait::async_trait;

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;
}

/// Unit of work. Dropping without `commit` discards every change.
#[async_trait]
pub trait Transaction: Send {
    async fn fetch(&mut self, plan: &FetchPlan) -> Result<Vec<Row>, StoreError>;

    /// Matches for the plan's predicates, ignoring its window.
    async fn count(&mut self, plan: &FetchPlan) -> Result<u64, StoreError>;

    /// Insert and return the stored record (generated key and defaults filled in).
    async fn insert(&mut self, model: &Model, values: Record) -> Result<Record, StoreError>;

    /// Apply `changes` to the record `current` was read from. With a version column, a record changed
    /// since it was read is a `StaleVersion`.
    async fn update(&mut self, model: &Model, current: &Record, changes: Record) -> Result<Record, StoreError>;

    async fn delete(&mut self, model: &Model, current: &Record) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Primary-key value of a record.
pub fn key_of<'a>(model: &Model, record: &'a Record) -> &'a FieldValue {
    record.get(&model.primary_key().name)
}
