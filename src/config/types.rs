//! Raw model config types matching the JSON model file (models.json).

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnTypeConfig {
    Simple(String),
    Parameterized { name: String, params: Option<Vec<u32>> },
}

impl ColumnTypeConfig {
    pub fn name(&self) -> &str {
        match self {
            ColumnTypeConfig::Simple(s) => s.as_str(),
            ColumnTypeConfig::Parameterized { name, .. } => name.as_str(),
        }
    }

    /// SQL type as written in DDL, e.g. `varchar(50)` or `numeric(12,4)`.
    pub fn sql(&self) -> String {
        match self {
            ColumnTypeConfig::Simple(s) => s.clone(),
            ColumnTypeConfig::Parameterized { name, params } => match params {
                Some(p) if !p.is_empty() => format!(
                    "{}({})",
                    name,
                    p.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(",")
                ),
                _ => name.clone(),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ColumnTypeConfig,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    /// PostGIS shape for geometry columns: POINT, POINTZ, LINESTRING, LINESTRINGZ, POLYGON, POLYGONZ.
    #[serde(default)]
    pub geometry_type: Option<String>,
    /// Overrides the dimension implied by `geometry_type`.
    #[serde(default)]
    pub dimension: Option<u8>,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// We hold a foreign key to them (many-to-one).
    ToOne,
    /// They hold a foreign key to us (one-to-many).
    ToMany,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationshipConfig {
    pub name: String,
    /// Name of the related model.
    pub target: String,
    pub cardinality: Cardinality,
    /// Our column in the join: our FK for to_one (required), our PK for to_many (defaults to PK).
    #[serde(default)]
    pub local_column: Option<String>,
    /// Their column in the join: their PK for to_one (defaults to PK), their FK for to_many (required).
    #[serde(default)]
    pub remote_column: Option<String>,
}

/// Write-only computed attribute. When `writes` is set the value is stored in that column.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub name: String,
    #[serde(default)]
    pub writes: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// Table name; defaults to the model name.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    pub primary_key: String,
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
    /// Composite unique constraints.
    #[serde(default)]
    pub unique: Vec<Vec<String>>,
    /// Integer column bumped on every update; stale updates are rejected.
    #[serde(default)]
    pub version_column: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// All models in one struct for in-memory loading.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullConfig {
    pub models: Vec<ModelConfig>,
}
