//! The composed, not-yet-executed query for one request.

use crate::config::Model;
use crate::query::predicate::Predicate;
use crate::record::Row;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub attribute: String,
    pub descending: bool,
}

impl SortKey {
    /// `name` or `-name`.
    pub fn parse(field: &str) -> SortKey {
        match field.strip_prefix('-') {
            Some(name) => SortKey {
                attribute: name.to_string(),
                descending: true,
            },
            None => SortKey {
                attribute: field.to_string(),
                descending: false,
            },
        }
    }
}

/// A value fetched alongside each record, appended to `Row::extra` in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Projection {
    /// Column of the record reached through a to-one relationship.
    Related { relationship: String, attribute: String },
    /// Number of records reached through a relationship.
    CountRelated { relationship: String },
}

#[derive(Clone, Debug)]
pub struct FetchPlan {
    pub model: Arc<Model>,
    pub predicates: Vec<Predicate>,
    pub sort: Vec<SortKey>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub extra: Vec<Projection>,
}

impl FetchPlan {
    pub fn new(model: Arc<Model>) -> Self {
        FetchPlan {
            model,
            predicates: Vec::new(),
            sort: Vec::new(),
            offset: None,
            limit: None,
            extra: Vec::new(),
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn filters(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.predicates.extend(predicates);
        self
    }

    pub fn order_by(mut self, keys: Vec<SortKey>) -> Self {
        self.sort = keys;
        self
    }

    pub fn select_extra(mut self, extra: Vec<Projection>) -> Self {
        self.extra = extra;
        self
    }

    pub fn window(mut self, offset: Option<u64>, limit: Option<u64>) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// Same filters, no ordering, slicing or projections. What a total count runs over.
    pub fn counting(&self) -> FetchPlan {
        FetchPlan {
            model: self.model.clone(),
            predicates: self.predicates.clone(),
            sort: Vec::new(),
            offset: None,
            limit: None,
            extra: Vec::new(),
        }
    }

    /// Fetch at most two rows: enough to tell one match from several.
    pub fn for_one(&self) -> FetchPlan {
        let mut plan = self.clone();
        plan.offset = None;
        plan.limit = Some(2);
        plan
    }
}

/// Outcome of a `.one()`-style lookup.
#[derive(Debug)]
pub enum Resolution {
    NoResult,
    One(Row),
    Multiple,
}

impl Resolution {
    pub fn from_rows(mut rows: Vec<Row>) -> Resolution {
        match rows.len() {
            0 => Resolution::NoResult,
            1 => rows.pop().map(Resolution::One).unwrap_or(Resolution::NoResult),
            _ => Resolution::Multiple,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    #[test]
    fn sort_key_prefix() {
        assert_eq!(
            SortKey::parse("-joined"),
            SortKey {
                attribute: "joined".into(),
                descending: true
            }
        );
        assert!(!SortKey::parse("name").descending);
    }

    #[test]
    fn resolution_distinguishes_counts() {
        assert!(matches!(Resolution::from_rows(vec![]), Resolution::NoResult));
        assert!(matches!(Resolution::from_rows(vec![Row::new(Record::new())]), Resolution::One(_)));
        assert!(matches!(
            Resolution::from_rows(vec![Row::new(Record::new()), Row::new(Record::new())]),
            Resolution::Multiple
        ));
    }
}
