//! Model config validation: referential integrity between models, columns and relationships.

use crate::config::{Cardinality, FullConfig, ModelConfig};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let mut models: HashMap<&str, &ModelConfig> = HashMap::new();
    for m in &config.models {
        if models.insert(m.name.as_str(), m).is_some() {
            return Err(ConfigError::DuplicateName(m.name.clone()));
        }
    }

    for m in &config.models {
        let mut names = HashSet::new();
        let attribute_names = m
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .chain(m.relationships.iter().map(|r| r.name.as_str()))
            .chain(m.properties.iter().map(|p| p.name.as_str()));
        for name in attribute_names {
            if !names.insert(name) {
                return Err(ConfigError::DuplicateName(format!("{}.{}", m.name, name)));
            }
        }

        let columns: HashSet<&str> = m.columns.iter().map(|c| c.name.as_str()).collect();
        if !columns.contains(m.primary_key.as_str()) {
            return Err(ConfigError::InvalidPrimaryKey {
                model: m.name.clone(),
                column: m.primary_key.clone(),
            });
        }

        if let Some(version) = &m.version_column {
            if !columns.contains(version.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "version column",
                    id: format!("{}.{}", m.name, version),
                });
            }
        }

        for constraint in &m.unique {
            if constraint.is_empty() {
                return Err(ConfigError::Validation(format!("{}: empty unique constraint", m.name)));
            }
            for col in constraint {
                if !columns.contains(col.as_str()) {
                    return Err(ConfigError::MissingReference {
                        kind: "unique column",
                        id: format!("{}.{}", m.name, col),
                    });
                }
            }
        }

        for p in &m.properties {
            if let Some(target) = &p.writes {
                if !columns.contains(target.as_str()) {
                    return Err(ConfigError::MissingReference {
                        kind: "property target column",
                        id: format!("{}.{}", m.name, target),
                    });
                }
            }
        }

        for c in &m.columns {
            if c.type_.name().eq_ignore_ascii_case("geometry") && !cfg!(feature = "geometry") {
                return Err(ConfigError::Validation(format!(
                    "{}.{}: geometry columns require the `geometry` feature",
                    m.name, c.name
                )));
            }
        }

        for r in &m.relationships {
            let target = models.get(r.target.as_str()).ok_or_else(|| ConfigError::MissingReference {
                kind: "relationship target",
                id: format!("{}.{} -> {}", m.name, r.name, r.target),
            })?;
            let target_columns: HashSet<&str> = target.columns.iter().map(|c| c.name.as_str()).collect();
            let (local_required, remote_required) = match r.cardinality {
                Cardinality::ToOne => (r.local_column.as_deref(), None),
                Cardinality::ToMany => (None, r.remote_column.as_deref()),
            };
            if r.cardinality == Cardinality::ToOne && local_required.is_none() {
                return Err(ConfigError::Validation(format!(
                    "{}.{}: to_one relationship requires local_column",
                    m.name, r.name
                )));
            }
            if r.cardinality == Cardinality::ToMany && remote_required.is_none() {
                return Err(ConfigError::Validation(format!(
                    "{}.{}: to_many relationship requires remote_column",
                    m.name, r.name
                )));
            }
            if let Some(local) = &r.local_column {
                if !columns.contains(local.as_str()) {
                    return Err(ConfigError::MissingReference {
                        kind: "relationship column",
                        id: format!("{}.{}", m.name, local),
                    });
                }
            }
            if let Some(remote) = &r.remote_column {
                if !target_columns.contains(remote.as_str()) {
                    return Err(ConfigError::MissingReference {
                        kind: "relationship column",
                        id: format!("{}.{}", target.name, remote),
                    });
                }
            }
        }
    }

    Ok(())
}
