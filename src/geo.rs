use chrono::{DateTime, Utc};

use crate::models::GeoPoint;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points in meters.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Sum of the legs between consecutive points. Zero for fewer than two points.
pub fn path_distance_m(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_m(w[0], w[1]))
        .fold(0.0, |total, leg| total + leg)
}

pub fn format_distance(meters: f64) -> String {
    format!("{:.2} km", meters / 1000.0)
}

/// Whole minutes elapsed since `start`, never negative.
pub fn elapsed_minutes(start: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    start
        .map(|s| (now - s).num_minutes().max(0))
        .unwrap_or(0)
}

pub fn format_duration(minutes: i64) -> String {
    format!("{} min", minutes)
}
