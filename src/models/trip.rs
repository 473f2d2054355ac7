use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::location::{parse_f64_option, GeoPoint};
use crate::geo;

/// Remote-assigned trip identifier.
pub type TripId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripStatus {
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Completed")]
    Completed,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::InProgress => "In Progress",
            TripStatus::Completed => "Completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "In Progress" => Some(TripStatus::InProgress),
            "Completed" => Some(TripStatus::Completed),
            _ => None,
        }
    }
}

/// A row of the `trips` table. Every field is optional on the way in: a row
/// with missing or garbled columns still decodes, with the bad columns empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    #[serde(default)]
    pub id: Option<TripId>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default, deserialize_with = "parse_status_option")]
    pub status: Option<TripStatus>,
    #[serde(default)]
    pub start_label: Option<String>,
    #[serde(default)]
    pub end_label: Option<String>,
    #[serde(default)]
    pub distance: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default, deserialize_with = "parse_path")]
    pub path: Vec<GeoPoint>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub last_lat: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub last_lng: Option<f64>,
    #[serde(default, deserialize_with = "parse_timestamp_option")]
    pub created_at: Option<DateTime<Utc>>,
}

impl TripRecord {
    pub fn is_in_progress(&self) -> bool {
        self.status == Some(TripStatus::InProgress)
    }

    /// Distance recomputed from the stored path rather than the stored label.
    pub fn path_distance_km(&self) -> f64 {
        geo::path_distance_m(&self.path) / 1000.0
    }
}

/// Insert payload. Usually a freshly started trip; a trip that never reached
/// the backend while running is inserted already completed, with an end label.
#[derive(Debug, Clone, Serialize)]
pub struct NewTrip {
    pub owner: Option<String>,
    pub status: TripStatus,
    pub start_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_label: Option<String>,
    pub distance: String,
    pub duration: String,
    pub path: Vec<GeoPoint>,
    pub last_lat: f64,
    pub last_lng: f64,
}

/// Per-sample snapshot pushed while the trip is running.
#[derive(Debug, Clone, Serialize)]
pub struct LiveUpdate {
    pub path: Vec<GeoPoint>,
    pub last_lat: f64,
    pub last_lng: f64,
    pub distance: String,
    pub duration: String,
}

/// Closing write. `path` and `distance` are left out when the full path is
/// not known locally, so the stored path is never replaced by a shorter one.
#[derive(Debug, Clone, Serialize)]
pub struct FinalUpdate {
    pub status: TripStatus,
    pub end_label: String,
    pub duration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<GeoPoint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_lng: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TripUpdate {
    Live(LiveUpdate),
    Final(FinalUpdate),
}

fn parse_status_option<'de, D>(deserializer: D) -> Result<Option<TripStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(v.as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(TripStatus::parse))
}

fn parse_timestamp_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match v {
        Some(serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .map(|t| t.with_timezone(&Utc))
            .ok(),
        _ => None,
    })
}

/// Keeps every well-formed `[lat, lng, ...]` entry and drops the rest.
fn parse_path<'de, D>(deserializer: D) -> Result<Vec<GeoPoint>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    let Some(serde_json::Value::Array(entries)) = v else {
        return Ok(Vec::new());
    };

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let pair = entry.as_array()?;
            let lat = pair.first()?.as_f64()?;
            let lng = pair.get(1)?.as_f64()?;
            Some(GeoPoint::new(lat, lng))
        })
        .collect())
}
