//! Store-independent predicates over a model's columns.

use crate::codec::FieldValue;
use crate::record::Record;
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn sql(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }

    fn accepts(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Lte => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Gte => ord != Ordering::Less,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Equality; a null value means IS NULL.
    Eq(String, FieldValue),
    IsNull(String),
    NotNull(String),
    /// SQL LIKE pattern (`%` any run, `_` one character).
    Like {
        attribute: String,
        pattern: String,
        case_insensitive: bool,
    },
    Compare {
        attribute: String,
        op: CompareOp,
        value: FieldValue,
    },
    In(String, Vec<FieldValue>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// At least one record reached through `relationship` satisfies `predicate`.
    Exists {
        relationship: String,
        predicate: Box<Predicate>,
    },
}

impl Predicate {
    pub fn eq(attribute: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::Eq(attribute.into(), value.into())
    }

    pub fn is_null(attribute: impl Into<String>) -> Self {
        Predicate::IsNull(attribute.into())
    }

    pub fn not_null(attribute: impl Into<String>) -> Self {
        Predicate::NotNull(attribute.into())
    }

    /// Evaluate against one record. `related` yields the records linked through a relationship name.
    pub fn evaluate(&self, record: &Record, related: &dyn Fn(&str, &Record) -> Vec<Record>) -> bool {
        match self {
            Predicate::Eq(attr, FieldValue::Null) | Predicate::IsNull(attr) => record.get(attr).is_null(),
            Predicate::Eq(attr, value) => record.get(attr).same_as(value),
            Predicate::NotNull(attr) => !record.get(attr).is_null(),
            Predicate::Like {
                attribute,
                pattern,
                case_insensitive,
            } => match record.get(attribute) {
                FieldValue::Null => false,
                FieldValue::Text(s) => like(s, pattern, *case_insensitive),
                other => match other.clone().into_plain_json() {
                    serde_json::Value::String(s) => like(&s, pattern, *case_insensitive),
                    v => like(&v.to_string(), pattern, *case_insensitive),
                },
            },
            Predicate::Compare { attribute, op, value } => {
                let current = record.get(attribute);
                if current.is_null() || value.is_null() {
                    return false;
                }
                current.compare(value).map(|o| op.accepts(o)).unwrap_or(false)
            }
            Predicate::In(attr, values) => {
                let current = record.get(attr);
                !current.is_null() && values.iter().any(|v| current.same_as(v))
            }
            Predicate::And(items) => items.iter().all(|p| p.evaluate(record, related)),
            Predicate::Or(items) => items.iter().any(|p| p.evaluate(record, related)),
            Predicate::Not(inner) => !inner.evaluate(record, related),
            Predicate::Exists { relationship, predicate } => related(relationship, record)
                .iter()
                .any(|r| predicate.evaluate(r, &|_: &str, _: &Record| Vec::new())),
        }
    }
}

/// LIKE matching with `%` and `_` wildcards.
pub fn like(value: &str, pattern: &str, case_insensitive: bool) -> bool {
    let (value, pattern): (Vec<char>, Vec<char>) = if case_insensitive {
        (value.to_lowercase().chars().collect(), pattern.to_lowercase().chars().collect())
    } else {
        (value.chars().collect(), pattern.chars().collect())
    };
    let (mut v, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while v < value.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == value[v]) {
            v += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, v));
            p += 1;
        } else if let Some((bp, bv)) = backtrack {
            p = bp + 1;
            v = bv + 1;
            backtrack = Some((bp, bv + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}
