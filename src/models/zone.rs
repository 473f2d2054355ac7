use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::location::{parse_f64_option, GeoPoint};

/// A row of the `zones` table: an area with a daily distance goal, assigned
/// to one user.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Zone {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "parse_polygon")]
    pub polygon: Vec<GeoPoint>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub target_km: Option<f64>,
    #[serde(default)]
    pub assigned_user: Option<String>,
}

impl Zone {
    /// Zones name their user either by bare id or as `"User <id>"`.
    pub fn is_assigned_to(&self, user_id: i64) -> bool {
        let Some(assigned) = self.assigned_user.as_deref().map(str::trim) else {
            return false;
        };
        assigned == user_id.to_string() || assigned == format!("User {}", user_id)
    }
}

/// A row of `user_targets`: the spot a user is sent to.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UserTarget {
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub lng: Option<f64>,
}

impl UserTarget {
    pub fn point(&self) -> Option<GeoPoint> {
        let point = GeoPoint::new(self.lat?, self.lng?);
        point.is_valid().then_some(point)
    }
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a polygon stored as `[{"lat":..,"lng":..}, ...]`, as `[[lat, lng], ...]`
/// or as either of those encoded in a string. Bad vertices are dropped.
pub(crate) fn polygon_from_value(value: &Value) -> Vec<GeoPoint> {
    let entries = match value {
        Value::Array(entries) => entries,
        Value::String(text) => {
            return serde_json::from_str::<Value>(text)
                .map(|v| match v {
                    Value::String(_) => Vec::new(),
                    other => polygon_from_value(&other),
                })
                .unwrap_or_default();
        }
        _ => return Vec::new(),
    };

    entries
        .iter()
        .filter_map(|entry| {
            let (lat, lng) = match entry {
                Value::Object(vertex) => (vertex.get("lat")?, vertex.get("lng")?),
                Value::Array(pair) => (pair.first()?, pair.get(1)?),
                _ => return None,
            };
            let point = GeoPoint::new(number(lat)?, number(lng)?);
            point.is_valid().then_some(point)
        })
        .collect()
}

fn parse_polygon<'de, D>(deserializer: D) -> Result<Vec<GeoPoint>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<Value> = Option::deserialize(deserializer)?;
    Ok(v.as_ref().map(polygon_from_value).unwrap_or_default())
}
