//! Resolved model: config validated and flattened into attribute descriptor arenas.

use crate::config::Cardinality;
use std::collections::HashMap;
use std::sync::Arc;

/// Shape kind of a geometry column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
    /// Plain `geometry` column without a declared shape.
    Any,
}

/// Semantic column type, inferred from the configured SQL type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    String,
    DateTime { timezone: bool },
    Date,
    Time,
    Decimal,
    Uuid,
    Json,
    Geometry { kind: GeometryKind, dimension: u8 },
    Other(String),
}

impl ColumnType {
    /// PostgreSQL type used in placeholder casts.
    pub fn pg_cast(&self) -> &str {
        match self {
            ColumnType::Integer => "bigint",
            ColumnType::Float => "double precision",
            ColumnType::Boolean => "boolean",
            ColumnType::String => "text",
            ColumnType::DateTime { timezone: true } => "timestamptz",
            ColumnType::DateTime { timezone: false } => "timestamp",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::Decimal => "numeric",
            ColumnType::Uuid => "uuid",
            ColumnType::Json => "jsonb",
            ColumnType::Geometry { .. } => "geometry",
            ColumnType::Other(name) => name.as_str(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    /// SQL type as configured, used for DDL.
    pub sql_type: String,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
}

#[derive(Clone, Debug)]
pub struct Relationship {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    /// Our FK for to_one; our PK for to_many.
    pub local_column: String,
    /// Their PK for to_one; their FK for to_many.
    pub remote_column: String,
}

impl Relationship {
    pub fn uses_list(&self) -> bool {
        self.cardinality == Cardinality::ToMany
    }
}

#[derive(Clone, Debug)]
pub struct Property {
    pub name: String,
    pub writes: Option<String>,
}

#[derive(Clone, Debug)]
pub enum AttributeKind {
    Column(ColumnDescriptor),
    Relationship(Relationship),
    Property(Property),
}

#[derive(Clone, Debug)]
pub struct AttributeDescriptor {
    pub name: String,
    pub kind: AttributeKind,
}

/// One model: every attribute indexed by name. Built once at startup.
#[derive(Clone, Debug)]
pub struct Model {
    pub name: String,
    pub table_name: String,
    pub schema_name: Option<String>,
    pub attributes: Vec<AttributeDescriptor>,
    pub(crate) index: HashMap<String, usize>,
    pub(crate) primary_key: usize,
    /// Composite unique constraints (column-level ones live on the descriptor).
    pub unique: Vec<Vec<String>>,
    pub version_column: Option<String>,
}

impl Model {
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.index.get(name).map(|&i| &self.attributes[i])
    }

    /// Column-typed attribute by name; relationships and properties do not qualify.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        match self.attribute(name).map(|a| &a.kind) {
            Some(AttributeKind::Column(c)) => Some(c),
            _ => None,
        }
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        match self.attribute(name).map(|a| &a.kind) {
            Some(AttributeKind::Relationship(r)) => Some(r),
            _ => None,
        }
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        match self.attribute(name).map(|a| &a.kind) {
            Some(AttributeKind::Property(p)) => Some(p),
            _ => None,
        }
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.attributes.iter().filter_map(|a| match &a.kind {
            AttributeKind::Column(c) => Some(c),
            _ => None,
        })
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.attributes.iter().filter_map(|a| match &a.kind {
            AttributeKind::Relationship(r) => Some(r),
            _ => None,
        })
    }

    pub fn primary_key(&self) -> &ColumnDescriptor {
        match &self.attributes[self.primary_key].kind {
            AttributeKind::Column(c) => c,
            // resolve() only ever points primary_key at a column
            _ => unreachable!("primary key of {} is not a column", self.name),
        }
    }

    pub fn is_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

/// A foreign key implied by a relationship: `from_model.from_column` references `to_model.to_column`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForeignKey {
    pub from_model: String,
    pub from_column: String,
    pub to_model: String,
    pub to_column: String,
}

/// All resolved models, by name.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    pub(crate) models: HashMap<String, Arc<Model>>,
    pub(crate) foreign_keys: Vec<ForeignKey>,
}

impl Schema {
    pub fn model(&self, name: &str) -> Option<&Arc<Model>> {
        self.models.get(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.values()
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// Foreign keys held by rows of `model`.
    pub fn foreign_keys_from<'a>(&'a self, model: &'a str) -> impl Iterator<Item = &'a ForeignKey> + 'a {
        self.foreign_keys.iter().filter(move |fk| fk.from_model == model)
    }

    /// Foreign keys pointing at rows of `model`.
    pub fn foreign_keys_to<'a>(&'a self, model: &'a str) -> impl Iterator<Item = &'a ForeignKey> + 'a {
        self.foreign_keys.iter().filter(move |fk| fk.to_model == model)
    }
}
