//! Query-string filters: `field` or `field__op` keys compiled into predicates through an operator table.

use crate::codec::FieldValue;
use crate::config::{ColumnDescriptor, Model};
use crate::error::AppError;
use crate::query::predicate::{CompareOp, Predicate};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Builds a predicate for one column from the raw query-string value.
pub type OperatorFn = Arc<dyn Fn(&ColumnDescriptor, &str) -> Result<Predicate, AppError> + Send + Sync>;

/// One parsed filter key/value: `(attribute, operator, raw value)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterClause {
    pub attribute: String,
    pub operator: String,
    pub raw: String,
}

impl FilterClause {
    /// `None` for reserved keys (leading `__`).
    pub fn parse(key: &str, raw: &str) -> Result<Option<FilterClause>, AppError> {
        if key.starts_with("__") {
            return Ok(None);
        }
        let mut parts = key.split("__");
        let attribute = parts.next().unwrap_or_default().to_string();
        let operator = parts.next().unwrap_or("=").to_string();
        if parts.next().is_some() {
            return Err(AppError::bad_request("An attribute provided for filtering is invalid"));
        }
        Ok(Some(FilterClause {
            attribute,
            operator,
            raw: raw.to_string(),
        }))
    }
}

/// Operator name to predicate builder. Built-ins can be overridden and new operators added.
#[derive(Clone)]
pub struct OperatorTable {
    operators: HashMap<String, OperatorFn>,
}

impl fmt::Debug for OperatorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.operators.keys().collect();
        names.sort();
        f.debug_struct("OperatorTable").field("operators", &names).finish()
    }
}

impl Default for OperatorTable {
    fn default() -> Self {
        let mut t = OperatorTable {
            operators: HashMap::new(),
        };
        t.insert("=", |c, raw| Ok(Predicate::Eq(c.name.clone(), typed(c, raw)?)));
        t.insert("null", |c, raw| {
            Ok(if raw != "0" {
                Predicate::IsNull(c.name.clone())
            } else {
                Predicate::NotNull(c.name.clone())
            })
        });
        t.insert("startswith", |c, raw| Ok(like(c, format!("{}%", raw), false)));
        t.insert("istartswith", |c, raw| Ok(like(c, format!("{}%", raw), true)));
        t.insert("endswith", |c, raw| Ok(like(c, format!("%{}", raw), false)));
        t.insert("iendswith", |c, raw| Ok(like(c, format!("%{}", raw), true)));
        t.insert("contains", |c, raw| Ok(like(c, format!("%{}%", raw), false)));
        t.insert("icontains", |c, raw| Ok(like(c, format!("%{}%", raw), true)));
        t.insert("lt", |c, raw| compare(c, CompareOp::Lt, raw));
        t.insert("lte", |c, raw| compare(c, CompareOp::Lte, raw));
        t.insert("gt", |c, raw| compare(c, CompareOp::Gt, raw));
        t.insert("gte", |c, raw| compare(c, CompareOp::Gte, raw));
        t.insert("in", |c, raw| {
            let values = param_string_to_list(raw)?
                .into_iter()
                .map(|v| typed(c, v))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Predicate::In(c.name.clone(), values))
        });
        t
    }
}

impl OperatorTable {
    pub fn insert<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&ColumnDescriptor, &str) -> Result<Predicate, AppError> + Send + Sync + 'static,
    {
        self.operators.insert(name.into(), Arc::new(f));
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ColumnDescriptor, &str) -> Result<Predicate, AppError> + Send + Sync + 'static,
    {
        self.insert(name, f);
        self
    }

    pub fn get(&self, name: &str) -> Option<&OperatorFn> {
        self.operators.get(name)
    }

    /// Compile one clause against `model`. The attribute must be a column.
    pub fn compile(&self, model: &Model, clause: &FilterClause) -> Result<Predicate, AppError> {
        let column = model.column(&clause.attribute).ok_or_else(|| {
            tracing::warn!(
                model = %model.name,
                attribute = %clause.attribute,
                "filter attribute does not exist or is not a column"
            );
            AppError::bad_request("An attribute provided for filtering is invalid")
        })?;
        let op = self
            .get(&clause.operator)
            .ok_or_else(|| AppError::bad_request(format!("Unknown filter operator '{}'", clause.operator)))?;
        op(column, &clause.raw)
    }

    /// Predicates for every filter key in `params`, in order. Reserved `__` keys are skipped.
    pub fn filter_by_params(&self, model: &Model, params: &[(String, String)]) -> Result<Vec<Predicate>, AppError> {
        let mut out = Vec::new();
        for (key, raw) in params {
            if let Some(clause) = FilterClause::parse(key, raw)? {
                out.push(self.compile(model, &clause)?);
            }
        }
        Ok(out)
    }
}

/// Coerce a raw query value to the column's type. Values that cannot be that type are a client error.
pub fn typed(column: &ColumnDescriptor, raw: &str) -> Result<FieldValue, AppError> {
    FieldValue::Text(raw.to_string())
        .coerce(&column.column_type)
        .map_err(|e| AppError::bad_request(format!("Invalid filter value for {}: {}", column.name, e)))
}

fn like(column: &ColumnDescriptor, pattern: String, case_insensitive: bool) -> Predicate {
    Predicate::Like {
        attribute: column.name.clone(),
        pattern,
        case_insensitive,
    }
}

fn compare(column: &ColumnDescriptor, op: CompareOp, raw: &str) -> Result<Predicate, AppError> {
    Ok(Predicate::Compare {
        attribute: column.name.clone(),
        op,
        value: typed(column, raw)?,
    })
}

static LIST_PARAM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[[^\]]+\]$").expect("list pattern is valid"));

/// `[a,b,c]` to its elements. Anything not bracketed, or empty, is rejected.
pub fn param_string_to_list(raw: &str) -> Result<Vec<&str>, AppError> {
    if !LIST_PARAM.is_match(raw) {
        return Err(AppError::bad_request("Invalid list value; expected [value,value,...]"));
    }
    Ok(raw[1..raw.len() - 1].split(',').collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema_from_json;
    use serde_json::json;

    fn employee() -> Arc<Model> {
        let schema = schema_from_json(json!({"models": [
            {"name": "company", "primary_key": "id", "columns": [{"name": "id", "type": "integer"}]},
            {"name": "employee", "primary_key": "id",
             "columns": [
                {"name": "id", "type": "integer"},
                {"name": "name", "type": "text"},
                {"name": "left", "type": "timestamp"},
                {"name": "company_id", "type": "integer"}
             ],
             "relationships": [{"name": "company", "target": "company", "cardinality": "to_one", "local_column": "company_id"}],
             "properties": [{"name": "caps_name"}]}
        ]}))
        .unwrap();
        schema.model("employee").unwrap().clone()
    }

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_plain_key_is_equality() {
        let table = OperatorTable::default();
        let p = table.filter_by_params(&employee(), &params(&[("id", "2")])).unwrap();
        assert_eq!(p, vec![Predicate::Eq("id".into(), FieldValue::Int(2))]);
    }

    #[test]
    fn test_null_polarity() {
        let table = OperatorTable::default();
        let m = employee();
        assert_eq!(
            table.filter_by_params(&m, &params(&[("left__null", "1")])).unwrap(),
            vec![Predicate::IsNull("left".into())]
        );
        assert_eq!(
            table.filter_by_params(&m, &params(&[("left__null", "0")])).unwrap(),
            vec![Predicate::NotNull("left".into())]
        );
        assert_eq!(
            table.filter_by_params(&m, &params(&[("left__null", "false")])).unwrap(),
            vec![Predicate::IsNull("left".into())]
        );
    }

    #[test]
    fn test_like_operators_wrap_value() {
        let table = OperatorTable::default();
        let p = table.filter_by_params(&employee(), &params(&[("name__icontains", "oh")])).unwrap();
        assert_eq!(
            p,
            vec![Predicate::Like {
                attribute: "name".into(),
                pattern: "%oh%".into(),
                case_insensitive: true
            }]
        );
    }

    #[test]
    fn test_in_rejects_malformed_lists() {
        let table = OperatorTable::default();
        let m = employee();
        for bad in ["[]", "[1", "1]", "1,2"] {
            let err = table.filter_by_params(&m, &params(&[("id__in", bad)])).unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "{} accepted", bad);
        }
        assert_eq!(
            table.filter_by_params(&m, &params(&[("id__in", "[1,3]")])).unwrap(),
            vec![Predicate::In("id".into(), vec![FieldValue::Int(1), FieldValue::Int(3)])]
        );
    }

    #[test]
    fn test_list_param_shapes() {
        assert_eq!(param_string_to_list("[a,b]").unwrap(), vec!["a", "b"]);
        assert_eq!(param_string_to_list("[x]").unwrap(), vec!["x"]);
        for bad in ["", "[]", "[a]b]", "a,b"] {
            assert!(matches!(param_string_to_list(bad), Err(AppError::BadRequest(_))), "{} accepted", bad);
        }
    }

    #[test]
    fn test_invalid_attributes_rejected() {
        let table = OperatorTable::default();
        let m = employee();
        for key in ["nope", "company", "caps_name", "name__contains__x"] {
            let err = table.filter_by_params(&m, &params(&[(key, "x")])).unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "{} accepted", key);
        }
        let err = table.filter_by_params(&m, &params(&[("name__like", "x")])).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_reserved_keys_skipped() {
        let table = OperatorTable::default();
        let p = table
            .filter_by_params(&employee(), &params(&[("__sort", "-id"), ("__limit", "2")]))
            .unwrap();
        assert!(p.is_empty());
    }

    #[test]
    fn test_operators_can_be_overridden_and_added() {
        let table = OperatorTable::default()
            .with("=", |c, raw| Ok(Predicate::Like {
                attribute: c.name.clone(),
                pattern: raw.to_string(),
                case_insensitive: true,
            }))
            .with("ne", |c, raw| Ok(Predicate::Not(Box::new(Predicate::Eq(c.name.clone(), typed(c, raw)?)))));
        let m = employee();
        let p = table.filter_by_params(&m, &params(&[("name", "JOHN"), ("id__ne", "1")])).unwrap();
        assert!(matches!(&p[0], Predicate::Like { case_insensitive: true, .. }));
        assert!(matches!(&p[1], Predicate::Not(_)));
    }

    #[test]
    fn test_uncoercible_values_rejected() {
        let table = OperatorTable::default();
        let err = table.filter_by_params(&employee(), &params(&[("id__gt", "abc")])).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
