//! Minimal geometry values: the shapes the codec knows how to name axes for, exchanged as GeoJSON with stores.

use serde_json::{json, Value};

#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    Point(Vec<f64>),
    LineString(Vec<Vec<f64>>),
    /// Rings, exterior first. Each ring is closed (last position equals the first).
    Polygon(Vec<Vec<Vec<f64>>>),
    /// Any other GeoJSON geometry, kept as received.
    Other { kind: String, geojson: Value },
}

impl Geometry {
    pub fn kind_name(&self) -> &str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::LineString(_) => "LineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::Other { kind, .. } => kind,
        }
    }

    /// Polygon from an exterior ring, closing it if needed.
    pub fn polygon(mut exterior: Vec<Vec<f64>>) -> Self {
        if let (Some(first), Some(last)) = (exterior.first(), exterior.last()) {
            if first != last {
                let first = first.clone();
                exterior.push(first);
            }
        }
        Geometry::Polygon(vec![exterior])
    }

    pub fn exterior(&self) -> Option<&[Vec<f64>]> {
        match self {
            Geometry::Polygon(rings) => rings.first().map(Vec::as_slice),
            _ => None,
        }
    }

    pub fn to_geojson(&self) -> Value {
        match self {
            Geometry::Point(c) => json!({"type": "Point", "coordinates": c}),
            Geometry::LineString(c) => json!({"type": "LineString", "coordinates": c}),
            Geometry::Polygon(c) => json!({"type": "Polygon", "coordinates": c}),
            Geometry::Other { geojson, .. } => geojson.clone(),
        }
    }

    pub fn from_geojson(v: &Value) -> Result<Self, String> {
        let kind = v
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| "geometry without a type".to_string())?;
        let coordinates = v.get("coordinates");
        let parse = |c: Option<&Value>| -> Result<Value, String> {
            c.cloned().ok_or_else(|| format!("{} without coordinates", kind))
        };
        Ok(match kind {
            "Point" => Geometry::Point(
                serde_json::from_value(parse(coordinates)?).map_err(|e| format!("bad Point: {}", e))?,
            ),
            "LineString" => Geometry::LineString(
                serde_json::from_value(parse(coordinates)?).map_err(|e| format!("bad LineString: {}", e))?,
            ),
            "Polygon" => Geometry::Polygon(
                serde_json::from_value(parse(coordinates)?).map_err(|e| format!("bad Polygon: {}", e))?,
            ),
            other => Geometry::Other {
                kind: other.to_string(),
                geojson: v.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_ring_is_closed() {
        let g = Geometry::polygon(vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![1.0, 1.0]]);
        assert_eq!(g.exterior().unwrap().len(), 4);
        assert_eq!(g.exterior().unwrap()[3], vec![0.0, 0.0]);
    }

    #[test]
    fn geojson_round_trip() {
        let g = Geometry::LineString(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(Geometry::from_geojson(&g.to_geojson()).unwrap(), g);
        let multi = json!({"type": "MultiPoint", "coordinates": [[1.0, 2.0]]});
        assert_eq!(Geometry::from_geojson(&multi).unwrap().kind_name(), "MultiPoint");
    }
}
