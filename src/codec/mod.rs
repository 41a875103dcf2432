//! Field codec: converts between wire JSON and typed field values, in both directions.

#[cfg(feature = "geometry")]
pub mod geometry;
pub mod value;

#[cfg(feature = "geometry")]
pub use geometry::Geometry;
pub use value::FieldValue;

use crate::config::{ColumnDescriptor, ColumnType};
use crate::error::AppError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "geometry")]
use crate::config::GeometryKind;

/// Per-attribute axis names for geometry values, e.g. `{"location": ["lon", "lat"]}`.
pub type GeometryAxes = HashMap<String, Vec<String>>;

pub const NAIVE_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
pub const UTC_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Caller-supplied conversion consulted before the built-ins. Returning `None` defers to the next plugin.
pub trait CodecPlugin: Send + Sync {
    fn serialize(&self, _name: &str, _value: &FieldValue) -> Option<Value> {
        None
    }

    fn deserialize(
        &self,
        _name: &str,
        _column: &ColumnDescriptor,
        _value: &Value,
    ) -> Option<Result<FieldValue, AppError>> {
        None
    }
}

/// Outbound-only plugin from a closure.
pub struct SerializeWith<F>(pub F);

impl<F> CodecPlugin for SerializeWith<F>
where
    F: Fn(&str, &FieldValue) -> Option<Value> + Send + Sync,
{
    fn serialize(&self, name: &str, value: &FieldValue) -> Option<Value> {
        (self.0)(name, value)
    }
}

#[derive(Clone, Default)]
pub struct FieldCodec {
    naive_datetimes: HashSet<String>,
    datetime_in_ms: HashSet<String>,
    plugins: Vec<Arc<dyn CodecPlugin>>,
}

impl fmt::Debug for FieldCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCodec")
            .field("naive_datetimes", &self.naive_datetimes)
            .field("datetime_in_ms", &self.datetime_in_ms)
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

impl FieldCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Datetime attribute exchanged without a zone suffix.
    pub fn naive(mut self, name: impl Into<String>) -> Self {
        self.naive_datetimes.insert(name.into());
        self
    }

    /// Datetime attribute exchanged as integer seconds since the Unix epoch (UTC).
    pub fn epoch_seconds(mut self, name: impl Into<String>) -> Self {
        self.datetime_in_ms.insert(name.into());
        self
    }

    pub fn plugin(mut self, plugin: Arc<dyn CodecPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Wire form of one attribute. `column` is the declared type, when the value comes from a column.
    pub fn serialize(
        &self,
        name: &str,
        value: &FieldValue,
        column: Option<&ColumnType>,
        axes: &GeometryAxes,
    ) -> Result<Value, AppError> {
        for plugin in &self.plugins {
            if let Some(v) = plugin.serialize(name, value) {
                return Ok(v);
            }
        }
        Ok(match value {
            FieldValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.serialize(name, v, column, axes))
                    .collect::<Result<_, _>>()?,
            ),
            FieldValue::DateTime(d) => self.format_datetime(name, d),
            FieldValue::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
            FieldValue::Time(t) => Value::String(t.format("%H:%M:%S%.f").to_string()),
            FieldValue::Decimal(d) => d
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Uuid(u) => Value::String(u.simple().to_string()),
            #[cfg(feature = "geometry")]
            FieldValue::Geometry(g) => format_geometry(name, g, column, axes)?,
            other => other.clone().into_plain_json(),
        })
    }

    fn format_datetime(&self, name: &str, d: &NaiveDateTime) -> Value {
        if self.naive_datetimes.contains(name) {
            Value::String(d.format(NAIVE_DATETIME_FORMAT).to_string())
        } else if self.datetime_in_ms.contains(name) {
            Value::from(d.and_utc().timestamp())
        } else {
            Value::String(d.format(UTC_DATETIME_FORMAT).to_string())
        }
    }

    /// Typed value for one inbound attribute of the given column. Malformed temporal values are a client error.
    pub fn deserialize(
        &self,
        name: &str,
        column: &ColumnDescriptor,
        value: &Value,
        axes: &GeometryAxes,
    ) -> Result<FieldValue, AppError> {
        for plugin in &self.plugins {
            if let Some(v) = plugin.deserialize(name, column, value) {
                return v;
            }
        }
        if value.is_null() {
            return Ok(FieldValue::Null);
        }
        match &column.column_type {
            ColumnType::DateTime { .. } => self.parse_datetime(name, value).map(FieldValue::DateTime),
            ColumnType::Date => value
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
                .map(FieldValue::Date)
                .ok_or_else(|| AppError::bad_request(format!("Invalid date value for {}", name))),
            ColumnType::Time => value
                .as_str()
                .and_then(parse_time)
                .map(FieldValue::Time)
                .ok_or_else(|| AppError::bad_request(format!("Invalid time value for {}", name))),
            #[cfg(feature = "geometry")]
            ColumnType::Geometry { kind, dimension } => {
                parse_geometry(name, *kind, *dimension, value, axes).map(FieldValue::Geometry)
            }
            _ => {
                let _ = axes;
                Ok(FieldValue::from_json(value))
            }
        }
    }

    fn parse_datetime(&self, name: &str, value: &Value) -> Result<NaiveDateTime, AppError> {
        let invalid = || AppError::bad_request(format!("Invalid datetime value for {}", name));
        if self.datetime_in_ms.contains(name) {
            let secs = value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f.trunc() as i64))
                .ok_or_else(invalid)?;
            return DateTime::from_timestamp(secs, 0).map(|d| d.naive_utc()).ok_or_else(invalid);
        }
        let text = value.as_str().ok_or_else(invalid)?;
        let format = if self.naive_datetimes.contains(name) {
            NAIVE_DATETIME_FORMAT
        } else {
            UTC_DATETIME_FORMAT
        };
        NaiveDateTime::parse_from_str(text, format).map_err(|_| invalid())
    }
}

/// `HH:MM:SS`, whole seconds only.
fn parse_time(s: &str) -> Option<NaiveTime> {
    let mut parts = s.split(':');
    let hour = parts.next()?.parse().ok()?;
    let minute = parts.next()?.parse().ok()?;
    let second = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    NaiveTime::from_hms_opt(hour, minute, second)
}

#[cfg(feature = "geometry")]
fn default_axes(dimension: usize) -> Vec<String> {
    ["x", "y", "z"].iter().take(dimension).map(|s| s.to_string()).collect()
}

#[cfg(feature = "geometry")]
fn format_geometry(
    name: &str,
    geometry: &Geometry,
    column: Option<&ColumnType>,
    axes: &GeometryAxes,
) -> Result<Value, AppError> {
    let dimension = match column {
        Some(ColumnType::Geometry { dimension, .. }) => Some(*dimension as usize),
        _ => None,
    };
    let named = |position: &[f64]| -> Value {
        let mut names = axes.get(name).cloned().unwrap_or_else(|| default_axes(3));
        names.truncate(dimension.unwrap_or(position.len()));
        let map = names
            .into_iter()
            .enumerate()
            .map(|(i, axis)| {
                let ordinate = position
                    .get(i)
                    .and_then(|o| serde_json::Number::from_f64(*o))
                    .map(Value::Number)
                    .unwrap_or(Value::Null);
                (axis, ordinate)
            })
            .collect();
        Value::Object(map)
    };
    match geometry {
        Geometry::Point(p) => Ok(named(p)),
        Geometry::LineString(points) => Ok(Value::Array(points.iter().map(|p| named(p)).collect())),
        Geometry::Polygon(_) => Ok(Value::Array(
            geometry.exterior().unwrap_or_default().iter().map(|p| named(p)).collect(),
        )),
        Geometry::Other { kind, .. } => Err(AppError::UnsupportedGeometryType(kind.clone())),
    }
}

#[cfg(feature = "geometry")]
fn parse_geometry(
    name: &str,
    kind: GeometryKind,
    dimension: u8,
    value: &Value,
    axes: &GeometryAxes,
) -> Result<Geometry, AppError> {
    let names = axes.get(name).cloned().unwrap_or_else(|| default_axes(dimension as usize));
    let invalid = || AppError::bad_request(format!("Invalid geometry value for {}", name));
    let position = |v: &Value| -> Result<Vec<f64>, AppError> {
        let obj = v.as_object().ok_or_else(invalid)?;
        names
            .iter()
            .map(|axis| match obj.get(axis) {
                None | Some(Value::Null) => Ok(0.0),
                Some(o) => o.as_f64().ok_or_else(invalid),
            })
            .collect()
    };
    let positions = |v: &Value| -> Result<Vec<Vec<f64>>, AppError> {
        v.as_array().ok_or_else(invalid)?.iter().map(position).collect()
    };
    match kind {
        GeometryKind::Point => position(value).map(Geometry::Point),
        GeometryKind::LineString => positions(value).map(Geometry::LineString),
        GeometryKind::Polygon => positions(value).map(Geometry::polygon),
        GeometryKind::Any => Geometry::from_geojson(value).map_err(|_| invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column(name: &str, column_type: ColumnType) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.into(),
            column_type,
            sql_type: String::new(),
            nullable: true,
            unique: false,
            primary_key: false,
        }
    }

    #[test]
    fn datetime_modes() {
        let codec = FieldCodec::new().naive("left").epoch_seconds("joined_ms");
        let d = NaiveDate::from_ymd_opt(2015, 6, 1).unwrap().and_hms_opt(12, 30, 5).unwrap();
        let v = FieldValue::DateTime(d);
        let axes = GeometryAxes::new();
        assert_eq!(codec.serialize("joined", &v, None, &axes).unwrap(), json!("2015-06-01T12:30:05Z"));
        assert_eq!(codec.serialize("left", &v, None, &axes).unwrap(), json!("2015-06-01T12:30:05"));
        assert_eq!(codec.serialize("joined_ms", &v, None, &axes).unwrap(), json!(1433161805));
    }

    #[test]
    fn default_datetime_round_trips() {
        let codec = FieldCodec::new();
        let col = column("joined", ColumnType::DateTime { timezone: false });
        let axes = GeometryAxes::new();
        let wire = json!("2016-01-02T03:04:05Z");
        let v = codec.deserialize("joined", &col, &wire, &axes).unwrap();
        assert_eq!(codec.serialize("joined", &v, Some(&col.column_type), &axes).unwrap(), wire);
    }

    #[test]
    fn malformed_datetime_is_a_client_error() {
        let codec = FieldCodec::new();
        let col = column("joined", ColumnType::DateTime { timezone: false });
        let err = codec
            .deserialize("joined", &col, &json!("2016-01-02 03:04:05"), &GeometryAxes::new())
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn time_and_date_round_trip() {
        let codec = FieldCodec::new();
        let axes = GeometryAxes::new();
        let t = column("start_time", ColumnType::Time);
        let v = codec.deserialize("start_time", &t, &json!("08:30:00"), &axes).unwrap();
        assert_eq!(codec.serialize("start_time", &v, None, &axes).unwrap(), json!("08:30:00"));
        let d = column("born", ColumnType::Date);
        let v = codec.deserialize("born", &d, &json!("1999-12-31"), &axes).unwrap();
        assert_eq!(codec.serialize("born", &v, None, &axes).unwrap(), json!("1999-12-31"));
        assert!(codec.deserialize("start_time", &t, &json!("08:30"), &axes).is_err());
    }

    #[test]
    fn uuid_and_decimal_outbound() {
        let codec = FieldCodec::new();
        let axes = GeometryAxes::new();
        let u = uuid::Uuid::parse_str("8c3b2ca4-6a43-4d79-9b8f-0fcd2d3f9a11").unwrap();
        assert_eq!(
            codec.serialize("id", &FieldValue::Uuid(u), None, &axes).unwrap(),
            json!("8c3b2ca46a434d799b8f0fcd2d3f9a11")
        );
        let d: rust_decimal::Decimal = "12.5".parse().unwrap();
        assert_eq!(codec.serialize("pay_rate", &FieldValue::Decimal(d), None, &axes).unwrap(), json!(12.5));
    }

    #[test]
    fn plugins_run_before_builtins() {
        let codec = FieldCodec::new().plugin(Arc::new(SerializeWith(|name: &str, _: &FieldValue| {
            (name == "secret").then(|| json!("***"))
        })));
        let axes = GeometryAxes::new();
        assert_eq!(codec.serialize("secret", &FieldValue::from("x"), None, &axes).unwrap(), json!("***"));
        assert_eq!(codec.serialize("other", &FieldValue::from("x"), None, &axes).unwrap(), json!("x"));
    }

    #[test]
    fn lists_serialize_element_wise() {
        let codec = FieldCodec::new();
        let d = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let v = FieldValue::List(vec![FieldValue::Date(d), FieldValue::Null]);
        assert_eq!(
            codec.serialize("days", &v, None, &GeometryAxes::new()).unwrap(),
            json!(["2020-01-01", null])
        );
    }

    #[cfg(feature = "geometry")]
    #[test]
    fn point_axes_are_named_and_truncated() {
        let codec = FieldCodec::new();
        let ty = ColumnType::Geometry { kind: GeometryKind::Point, dimension: 2 };
        let mut axes = GeometryAxes::new();
        axes.insert("location".into(), vec!["lon".into(), "lat".into(), "alt".into()]);
        let v = FieldValue::Geometry(Geometry::Point(vec![1.5, 2.5]));
        assert_eq!(
            codec.serialize("location", &v, Some(&ty), &axes).unwrap(),
            json!({"lon": 1.5, "lat": 2.5})
        );
    }

    #[cfg(feature = "geometry")]
    #[test]
    fn geometry_round_trips_and_missing_axes_default_to_zero() {
        let codec = FieldCodec::new();
        let axes = GeometryAxes::new();
        let col = column("area", ColumnType::Geometry { kind: GeometryKind::Polygon, dimension: 2 });
        let wire = json!([{"x": 0.0, "y": 0.0}, {"x": 1.0, "y": 0.0}, {"x": 1.0, "y": 1.0}, {"x": 0.0, "y": 0.0}]);
        let v = codec.deserialize("area", &col, &wire, &axes).unwrap();
        assert_eq!(codec.serialize("area", &v, Some(&col.column_type), &axes).unwrap(), wire);

        let point = column("at", ColumnType::Geometry { kind: GeometryKind::Point, dimension: 3 });
        let v = codec.deserialize("at", &point, &json!({"x": 4.0}), &axes).unwrap();
        assert_eq!(v, FieldValue::Geometry(Geometry::Point(vec![4.0, 0.0, 0.0])));
    }

    #[cfg(feature = "geometry")]
    #[test]
    fn unsupported_shapes_fail() {
        let codec = FieldCodec::new();
        let g = Geometry::from_geojson(&json!({"type": "MultiPoint", "coordinates": [[0.0, 0.0]]})).unwrap();
        let err = codec
            .serialize("shape", &FieldValue::Geometry(g), None, &GeometryAxes::new())
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedGeometryType(k) if k == "MultiPoint"));
    }
}
