//! Fetched and to-be-written attribute values.

use crate::codec::FieldValue;
use std::collections::hash_map;
use std::collections::HashMap;

static NULL: FieldValue = FieldValue::Null;

/// Column name to value. A column absent from the map reads as null.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    values: HashMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> &FieldValue {
        self.values.get(column).unwrap_or(&NULL)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<FieldValue>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn remove(&mut self, column: &str) -> Option<FieldValue> {
        self.values.remove(column)
    }

    /// Overwrite this record's values with every value set in `other`.
    pub fn merge(&mut self, other: Record) {
        self.values.extend(other.values);
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, FieldValue> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl IntoIterator for Record {
    type Item = (String, FieldValue);
    type IntoIter = hash_map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl FromIterator<(String, FieldValue)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Record {
            values: iter.into_iter().collect(),
        }
    }
}

/// One fetched record plus the extra projected values, in projection order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    pub record: Record,
    pub extra: Vec<FieldValue>,
}

impl Row {
    pub fn new(record: Record) -> Self {
        Row {
            record,
            extra: Vec::new(),
        }
    }

    pub fn get(&self, column: &str) -> &FieldValue {
        self.record.get(column)
    }
}
