use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A (lat, lng) pair in degrees. Stored as `[lat, lng]` inside `trips.path`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl From<[f64; 2]> for GeoPoint {
    fn from([lat, lng]: [f64; 2]) -> Self {
        Self { lat, lng }
    }
}

impl From<GeoPoint> for [f64; 2] {
    fn from(p: GeoPoint) -> Self {
        [p.lat, p.lng]
    }
}

/// One fix delivered by a location source.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationSample {
    #[serde(alias = "latitude", deserialize_with = "parse_f64")]
    pub lat: f64,
    #[serde(alias = "longitude", alias = "lon", deserialize_with = "parse_f64")]
    pub lng: f64,
    #[serde(default = "Utc::now", alias = "time")]
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(lat: f64, lng: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            lat,
            lng,
            timestamp,
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }

    /// Parses one line of a recorded track: either a JSON object or `lat,lng[,rfc3339]`.
    /// Returns `None` for blank, comment or malformed lines.
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        if line.starts_with('{') {
            return serde_json::from_str(line).ok();
        }

        let mut fields = line.split(',').map(str::trim);
        let lat = fields.next()?.parse::<f64>().ok()?;
        let lng = fields.next()?.parse::<f64>().ok()?;
        let timestamp = match fields.next() {
            Some(raw) if !raw.is_empty() => DateTime::parse_from_rfc3339(raw)
                .ok()?
                .with_timezone(&Utc),
            _ => Utc::now(),
        };
        Some(Self::new(lat, lng, timestamp))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrFloat {
    String(String),
    Float(f64),
}

fn parse_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match StringOrFloat::deserialize(deserializer)? {
        StringOrFloat::Float(f) => Ok(f),
        StringOrFloat::String(s) => s.trim().parse::<f64>().map_err(serde::de::Error::custom),
    }
}

/// Accepts a number, a numeric string, an empty string or null. Anything
/// unparsable becomes `None` instead of failing the whole record.
pub(crate) fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match v {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsing_fix_with_string_coordinates() {
        let payload = r#"
        {
            "latitude": "+20.652494",
            "longitude": "-100.391404",
            "timestamp": "2025-11-29T06:15:15Z"
        }
        "#;

        let sample: LocationSample = serde_json::from_str(payload).unwrap();
        assert_eq!(sample.lat, 20.652494);
        assert_eq!(sample.lng, -100.391404);
        assert_eq!(sample.timestamp.to_rfc3339(), "2025-11-29T06:15:15+00:00");
    }

    #[test]
    fn test_from_line_formats() {
        let json = LocationSample::from_line(r#"{"lat": 12.97, "lng": 77.59}"#).unwrap();
        assert_eq!(json.point(), GeoPoint::new(12.97, 77.59));

        let csv = LocationSample::from_line("12.5, 77.25, 2025-01-02T03:04:05Z").unwrap();
        assert_eq!(csv.point(), GeoPoint::new(12.5, 77.25));
        assert_eq!(csv.timestamp.to_rfc3339(), "2025-01-02T03:04:05+00:00");

        assert!(LocationSample::from_line("").is_none());
        assert!(LocationSample::from_line("# header").is_none());
        assert!(LocationSample::from_line("north,south").is_none());
        assert!(LocationSample::from_line("12.5").is_none());
    }

    #[test]
    fn test_point_serializes_as_pair() {
        let json = serde_json::to_string(&vec![GeoPoint::new(1.5, -2.0)]).unwrap();
        assert_eq!(json, "[[1.5,-2.0]]");
        let back: Vec<GeoPoint> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![GeoPoint::new(1.5, -2.0)]);
    }

    #[test]
    fn test_point_validity() {
        assert!(GeoPoint::new(0.0, 0.0).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }
}
