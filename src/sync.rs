//! Remote sync of the active trip.
//!
//! Failure policy: a failed call is logged and forgotten. The next sample
//! carries the full current snapshot, so it is the retry. There is no backoff,
//! no queue of failed writes and no ordering between overlapping uploads.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::geo::{elapsed_minutes, format_distance, format_duration, path_distance_m};
use crate::models::{
    FinalUpdate, GeoPoint, LiveUpdate, NewTrip, TripId, TripRecord, TripStatus, TripUpdate,
};
use crate::state::TripSnapshot;
use crate::store::{RemoteStore, StoreError};

/// What a stopped trip ended up as.
#[derive(Debug, Clone, PartialEq)]
pub struct TripSummary {
    pub trip_id: Option<TripId>,
    pub distance: String,
    pub duration: String,
    pub points: usize,
    pub synced: bool,
}

pub(crate) fn start_label(at: DateTime<Utc>) -> String {
    format!("Started at {}", at.format("%H:%M UTC"))
}

fn end_label(last: Option<GeoPoint>) -> String {
    match last {
        Some(p) => format!("Stopped at {:.5}, {:.5}", p.lat, p.lng),
        None => "Stopped".to_string(),
    }
}

#[derive(Clone)]
pub struct TripSync {
    store: Arc<dyn RemoteStore>,
}

impl TripSync {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, trip: &NewTrip) -> Result<TripId, StoreError> {
        let record = self.store.insert_trip(trip).await?;
        record.id.ok_or(StoreError::Missing("insert trips"))
    }

    pub async fn update(&self, id: TripId, update: &TripUpdate) -> Result<(), StoreError> {
        self.store.update_trip(id, update).await
    }

    pub async fn fetch(&self, id: TripId) -> Result<Option<TripRecord>, StoreError> {
        self.store.fetch_trip(id).await
    }

    /// Best-effort live upload, meant to be spawned per sample.
    pub async fn push_live(&self, id: TripId, update: LiveUpdate) {
        let (distance, duration) = (update.distance.clone(), update.duration.clone());
        match self.update(id, &TripUpdate::Live(update)).await {
            Ok(()) => info!("Uploaded trip {}: {} | {}", id, distance, duration),
            Err(e) => error!("Upload failed for trip {}: {}", id, e),
        }
    }

    /// Marks the trip completed.
    ///
    /// When the local path is empty or incomplete (state lost in a crash), the
    /// stored path is fetched and the local points are appended to it. If that
    /// fetch fails too, the path is left out of the write entirely so the
    /// remote copy is never shortened.
    pub async fn finalize(
        &self,
        id: TripId,
        snapshot: &TripSnapshot,
        now: DateTime<Utc>,
    ) -> TripSummary {
        let duration = format_duration(elapsed_minutes(snapshot.started_at, now));

        let path = if snapshot.path.is_empty() || snapshot.path_incomplete {
            match self.fetch(id).await {
                Ok(Some(remote)) => {
                    info!(
                        "Completing trip {} from {} stored and {} local points",
                        id,
                        remote.path.len(),
                        snapshot.path.len()
                    );
                    let mut full = remote.path;
                    full.extend_from_slice(&snapshot.path);
                    Some(full)
                }
                Ok(None) => {
                    warn!("Trip {} not found remotely, finalizing without path", id);
                    None
                }
                Err(e) => {
                    warn!("Could not fetch stored path for trip {}: {}", id, e);
                    None
                }
            }
        } else {
            Some(snapshot.path.clone())
        };

        let distance = path.as_deref().map(|p| format_distance(path_distance_m(p)));
        let points = path.as_ref().map_or(0, Vec::len);
        let last = snapshot
            .last_position
            .or_else(|| path.as_ref().and_then(|p| p.last().copied()));

        let update = FinalUpdate {
            status: TripStatus::Completed,
            end_label: end_label(last),
            duration: duration.clone(),
            distance: distance.clone(),
            path,
            last_lat: last.map(|p| p.lat),
            last_lng: last.map(|p| p.lng),
        };

        let synced = match self.update(id, &TripUpdate::Final(update)).await {
            Ok(()) => {
                info!("Trip {} completed", id);
                true
            }
            Err(e) => {
                error!("Final update failed for trip {}: {}", id, e);
                false
            }
        };

        TripSummary {
            trip_id: Some(id),
            distance: distance.unwrap_or_else(|| format_distance(0.0)),
            duration,
            points,
            synced,
        }
    }

    /// Inserts a trip that never reached the backend while it ran, already
    /// marked completed. Used once on stop.
    pub async fn upload_completed(
        &self,
        owner: Option<String>,
        snapshot: &TripSnapshot,
        now: DateTime<Utc>,
    ) -> TripSummary {
        let distance = format_distance(path_distance_m(&snapshot.path));
        let duration = format_duration(elapsed_minutes(snapshot.started_at, now));
        let last = snapshot.last_position.or_else(|| snapshot.path.last().copied());

        let trip = NewTrip {
            owner,
            status: TripStatus::Completed,
            start_label: start_label(snapshot.started_at.unwrap_or(now)),
            end_label: Some(end_label(last)),
            distance: distance.clone(),
            duration: duration.clone(),
            path: snapshot.path.clone(),
            last_lat: last.map_or(0.0, |p| p.lat),
            last_lng: last.map_or(0.0, |p| p.lng),
        };

        let trip_id = match self.create(&trip).await {
            Ok(id) => {
                info!("Uploaded completed trip {} on stop", id);
                Some(id)
            }
            Err(e) => {
                error!("Could not upload trip on stop: {}", e);
                None
            }
        };

        TripSummary {
            trip_id,
            distance,
            duration,
            points: snapshot.path.len(),
            synced: trip_id.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GeoPoint;
    use crate::store::MemoryStore;

    fn in_progress(path: Vec<GeoPoint>) -> TripRecord {
        TripRecord {
            owner: Some("555".to_string()),
            status: Some(TripStatus::InProgress),
            path,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_finalize_uses_local_path() {
        let store = Arc::new(MemoryStore::new());
        let id = store.put_trip(in_progress(vec![GeoPoint::new(0.0, 0.0)]));
        let sync = TripSync::new(store.clone());

        let snapshot = TripSnapshot {
            path: vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0)],
            last_position: Some(GeoPoint::new(0.0, 1.0)),
            trip_id: Some(id),
            started_at: Some(Utc::now()),
            active: true,
            path_incomplete: false,
        };
        let summary = sync.finalize(id, &snapshot, Utc::now()).await;
        assert_eq!(summary.distance, "111.19 km");
        assert_eq!(summary.duration, "0 min");
        assert!(summary.synced);

        let trip = store.trip(id).unwrap();
        assert_eq!(trip.status, Some(TripStatus::Completed));
        assert_eq!(trip.path.len(), 2);
        assert_eq!(trip.end_label.as_deref(), Some("Stopped at 0.00000, 1.00000"));
    }

    #[tokio::test]
    async fn test_finalize_with_empty_local_path_keeps_remote_path() {
        let store = Arc::new(MemoryStore::new());
        let remote = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 0.5),
            GeoPoint::new(0.0, 1.0),
        ];
        let id = store.put_trip(in_progress(remote.clone()));
        let sync = TripSync::new(store.clone());

        let snapshot = TripSnapshot {
            trip_id: Some(id),
            active: true,
            ..Default::default()
        };
        let summary = sync.finalize(id, &snapshot, Utc::now()).await;
        assert_eq!(summary.points, 3);
        assert_eq!(summary.distance, "111.19 km");

        let trip = store.trip(id).unwrap();
        assert_eq!(trip.path, remote);
        assert_eq!(trip.status, Some(TripStatus::Completed));
    }

    #[tokio::test]
    async fn test_finalize_appends_to_stored_path_when_incomplete() {
        let store = Arc::new(MemoryStore::new());
        let stored = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 0.5)];
        let id = store.put_trip(in_progress(stored));
        let sync = TripSync::new(store.clone());

        let snapshot = TripSnapshot {
            path: vec![GeoPoint::new(0.0, 1.0)],
            last_position: Some(GeoPoint::new(0.0, 1.0)),
            trip_id: Some(id),
            active: true,
            path_incomplete: true,
            ..Default::default()
        };
        let summary = sync.finalize(id, &snapshot, Utc::now()).await;
        assert_eq!(summary.points, 3);
        assert_eq!(summary.distance, "111.19 km");
        assert_eq!(store.trip(id).unwrap().path.len(), 3);
    }

    #[tokio::test]
    async fn test_finalize_leaves_path_alone_when_fetch_fails() {
        let store = Arc::new(MemoryStore::new());
        let stored = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 0.5)];
        let id = store.put_trip(in_progress(stored.clone()));
        let sync = TripSync::new(store.clone());

        store.set_offline(true);
        let snapshot = TripSnapshot {
            path: vec![GeoPoint::new(0.0, 1.0)],
            trip_id: Some(id),
            active: true,
            path_incomplete: true,
            ..Default::default()
        };
        let summary = sync.finalize(id, &snapshot, Utc::now()).await;
        store.set_offline(false);

        assert!(!summary.synced);
        assert_eq!(summary.distance, "0.00 km");
        assert_eq!(store.trip(id).unwrap().path, stored);
    }

    #[tokio::test]
    async fn test_upload_completed_inserts_finished_trip() {
        let store = Arc::new(MemoryStore::new());
        let sync = TripSync::new(store.clone());
        let snapshot = TripSnapshot {
            path: vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0)],
            last_position: Some(GeoPoint::new(0.0, 1.0)),
            started_at: Some(Utc::now()),
            active: true,
            ..Default::default()
        };

        let summary = sync
            .upload_completed(Some("555".to_string()), &snapshot, Utc::now())
            .await;
        assert!(summary.synced);
        let trip = store.trip(summary.trip_id.unwrap()).unwrap();
        assert_eq!(trip.status, Some(TripStatus::Completed));
        assert_eq!(trip.owner.as_deref(), Some("555"));
        assert_eq!(trip.distance.as_deref(), Some("111.19 km"));
        assert_eq!(trip.end_label.as_deref(), Some("Stopped at 0.00000, 1.00000"));

        store.set_offline(true);
        let failed = sync.upload_completed(None, &snapshot, Utc::now()).await;
        assert_eq!(failed.trip_id, None);
        assert!(!failed.synced);
    }

    #[tokio::test]
    async fn test_failed_live_push_is_swallowed() {
        let store = Arc::new(MemoryStore::new());
        let id = store.put_trip(in_progress(Vec::new()));
        let sync = TripSync::new(store.clone());

        store.set_offline(true);
        sync.push_live(
            id,
            LiveUpdate {
                path: vec![GeoPoint::new(1.0, 1.0)],
                last_lat: 1.0,
                last_lng: 1.0,
                distance: "0.00 km".to_string(),
                duration: "0 min".to_string(),
            },
        )
        .await;
        store.set_offline(false);

        assert!(store.trip(id).unwrap().path.is_empty());
    }
}
