//! Typed field values held by records, plus coercion from wire/query text into a column's type.

use crate::config::ColumnType;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;
use uuid::Uuid;

#[cfg(feature = "geometry")]
use crate::codec::geometry::Geometry;

/// One stored attribute value. Datetimes are kept naive; timezone-aware columns hold UTC.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Decimal(Decimal),
    Uuid(Uuid),
    Json(Value),
    #[cfg(feature = "geometry")]
    Geometry(Geometry),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Untyped conversion of a wire value: scalars map to their natural variant, containers stay JSON.
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Int(i)
                } else {
                    FieldValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => FieldValue::Json(v.clone()),
        }
    }

    /// Ordering used by sorting and range predicates. `None` for values of unrelated kinds.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        use FieldValue::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Bool(a), Bool(b)) => a.partial_cmp(b),
            (Int(a), Int(b)) => a.partial_cmp(b),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Decimal(a), Decimal(b)) => a.partial_cmp(b),
            (Decimal(a), Int(b)) => a.partial_cmp(&rust_decimal::Decimal::from(*b)),
            (Int(a), Decimal(b)) => rust_decimal::Decimal::from(*a).partial_cmp(b),
            (Decimal(a), Float(b)) => a.to_f64().and_then(|a| a.partial_cmp(b)),
            (Float(a), Decimal(b)) => b.to_f64().and_then(|b| a.partial_cmp(&b)),
            (Text(a), Text(b)) => a.partial_cmp(b),
            (DateTime(a), DateTime(b)) => a.partial_cmp(b),
            (Date(a), Date(b)) => a.partial_cmp(b),
            (Time(a), Time(b)) => a.partial_cmp(b),
            (Uuid(a), Uuid(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Equality as a store sees it: numeric kinds compare by value.
    pub fn same_as(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Json(a), FieldValue::Json(b)) => a == b,
            (FieldValue::List(a), FieldValue::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
            }
            #[cfg(feature = "geometry")]
            (FieldValue::Geometry(a), FieldValue::Geometry(b)) => a == b,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    /// Normalise a value into the representation a column stores, the way a database would on write.
    pub fn coerce(self, ty: &ColumnType) -> Result<FieldValue, String> {
        if self.is_null() {
            return Ok(FieldValue::Null);
        }
        Ok(match (ty, self) {
            (ColumnType::Integer, FieldValue::Int(i)) => FieldValue::Int(i),
            (ColumnType::Integer, FieldValue::Float(f)) if f.fract() == 0.0 => FieldValue::Int(f as i64),
            (ColumnType::Integer, FieldValue::Text(s)) => FieldValue::Int(
                s.trim().parse().map_err(|_| format!("'{}' is not an integer", s))?,
            ),
            (ColumnType::Float, FieldValue::Int(i)) => FieldValue::Float(i as f64),
            (ColumnType::Float, FieldValue::Float(f)) => FieldValue::Float(f),
            (ColumnType::Float, FieldValue::Decimal(d)) => FieldValue::Float(d.to_f64().unwrap_or(f64::NAN)),
            (ColumnType::Float, FieldValue::Text(s)) => {
                FieldValue::Float(s.trim().parse().map_err(|_| format!("'{}' is not a number", s))?)
            }
            (ColumnType::Decimal, FieldValue::Decimal(d)) => FieldValue::Decimal(d),
            (ColumnType::Decimal, FieldValue::Int(i)) => FieldValue::Decimal(Decimal::from(i)),
            (ColumnType::Decimal, FieldValue::Float(f)) => {
                FieldValue::Decimal(Decimal::from_f64(f).ok_or_else(|| format!("{} is not a decimal", f))?)
            }
            (ColumnType::Decimal, FieldValue::Text(s)) => {
                FieldValue::Decimal(Decimal::from_str(s.trim()).map_err(|_| format!("'{}' is not a decimal", s))?)
            }
            (ColumnType::Boolean, FieldValue::Bool(b)) => FieldValue::Bool(b),
            (ColumnType::Boolean, FieldValue::Int(i)) => FieldValue::Bool(i != 0),
            (ColumnType::Boolean, FieldValue::Text(s)) => FieldValue::Bool(parse_bool(&s)?),
            (ColumnType::Uuid, FieldValue::Uuid(u)) => FieldValue::Uuid(u),
            (ColumnType::Uuid, FieldValue::Text(s)) => {
                FieldValue::Uuid(Uuid::parse_str(s.trim()).map_err(|_| format!("'{}' is not a uuid", s))?)
            }
            (ColumnType::DateTime { .. }, FieldValue::DateTime(d)) => FieldValue::DateTime(d),
            (ColumnType::DateTime { .. }, FieldValue::Text(s)) => FieldValue::DateTime(parse_datetime_text(&s)?),
            (ColumnType::Date, FieldValue::Date(d)) => FieldValue::Date(d),
            (ColumnType::Date, FieldValue::DateTime(d)) => FieldValue::Date(d.date()),
            (ColumnType::Date, FieldValue::Text(s)) => FieldValue::Date(
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| format!("'{}' is not a date", s))?,
            ),
            (ColumnType::Time, FieldValue::Time(t)) => FieldValue::Time(t),
            (ColumnType::Time, FieldValue::Text(s)) => FieldValue::Time(
                NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").map_err(|_| format!("'{}' is not a time", s))?,
            ),
            (ColumnType::String, FieldValue::Text(s)) => FieldValue::Text(s),
            (ColumnType::String, FieldValue::Int(i)) => FieldValue::Text(i.to_string()),
            (ColumnType::String, FieldValue::Float(f)) => FieldValue::Text(f.to_string()),
            (ColumnType::String, FieldValue::Bool(b)) => FieldValue::Text(b.to_string()),
            (ColumnType::Json, v) => FieldValue::Json(v.into_plain_json()),
            #[cfg(feature = "geometry")]
            (ColumnType::Geometry { .. }, FieldValue::Geometry(g)) => FieldValue::Geometry(g),
            #[cfg(feature = "geometry")]
            (ColumnType::Geometry { .. }, FieldValue::Json(v)) => FieldValue::Geometry(Geometry::from_geojson(&v)?),
            (ColumnType::Other(_), v) => v,
            (ty, v) => return Err(format!("{:?} cannot be stored in a {} column", v, ty.pg_cast())),
        })
    }

    /// Plain JSON rendering without any codec configuration (used for JSON columns and store-side keys).
    pub fn into_plain_json(self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(b),
            FieldValue::Int(i) => Value::from(i),
            FieldValue::Float(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            FieldValue::Text(s) => Value::String(s),
            FieldValue::DateTime(d) => Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            FieldValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            FieldValue::Time(t) => Value::String(t.format("%H:%M:%S%.f").to_string()),
            FieldValue::Decimal(d) => Value::String(d.to_string()),
            FieldValue::Uuid(u) => Value::String(u.to_string()),
            FieldValue::Json(v) => v,
            #[cfg(feature = "geometry")]
            FieldValue::Geometry(g) => g.to_geojson(),
            FieldValue::List(items) => Value::Array(items.into_iter().map(FieldValue::into_plain_json).collect()),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim().to_lowercase().as_str() {
        "true" | "t" | "1" | "yes" => Ok(true),
        "false" | "f" | "0" | "no" => Ok(false),
        _ => Err(format!("'{}' is not a boolean", s)),
    }
}

/// Accepts the wire formats (`...Z`, naive) and RFC 3339 with an offset (converted to UTC).
fn parse_datetime_text(s: &str) -> Result<NaiveDateTime, String> {
    let s = s.trim();
    if let Ok(d) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ") {
        return Ok(d);
    }
    if let Ok(d) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(d);
    }
    if let Ok(d) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(d);
    }
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.naive_utc())
        .map_err(|_| format!("'{}' is not a datetime", s))
}
