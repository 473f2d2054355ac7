//! The tracking state machine.
//!
//! `Idle --start--> Active --stop--> Idle`. While active, one task owns the
//! sample stream and drives state updates and remote sync for each fix.

mod guard;
mod sample_processor;

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::geo::{elapsed_minutes, format_distance, format_duration, path_distance_m};
use crate::location::{LocationRequest, LocationSource, SourceError};
use crate::prefs::Prefs;
use crate::state::TripStateStore;
use crate::store::RemoteStore;
use crate::sync::{TripSummary, TripSync};

pub use guard::{ForegroundGuard, PermissionGate, StaticPermission};

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("a trip is already being tracked")]
    AlreadyActive,

    #[error("no trip is being tracked")]
    NotActive,

    #[error("location source failed: {0}")]
    Source(#[from] SourceError),
}

/// Everything the tracking pipeline shares, built once at start-up.
pub struct TrackingContext {
    pub state: TripStateStore,
    pub prefs: Prefs,
    pub sync: TripSync,
    pub request: LocationRequest,
}

impl TrackingContext {
    pub fn new(prefs: Prefs, store: Arc<dyn RemoteStore>, request: LocationRequest) -> Self {
        Self {
            state: TripStateStore::new(prefs.clone()),
            prefs,
            sync: TripSync::new(store),
            request,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Active,
}

struct ActiveSession {
    source: Box<dyn LocationSource>,
    stop_tx: oneshot::Sender<()>,
    handle: Option<JoinHandle<()>>,
    _guard: ForegroundGuard,
}

pub struct Tracker {
    ctx: Arc<TrackingContext>,
    permissions: Box<dyn PermissionGate>,
    session: Option<ActiveSession>,
}

impl Tracker {
    pub fn new(ctx: Arc<TrackingContext>, permissions: Box<dyn PermissionGate>) -> Self {
        Self {
            ctx,
            permissions,
            session: None,
        }
    }

    pub fn state(&self) -> TrackerState {
        if self.session.is_some() {
            TrackerState::Active
        } else {
            TrackerState::Idle
        }
    }

    /// Starts tracking with a fresh source. Returns `true` when a trip restored
    /// from local storage was resumed rather than a new one opened.
    pub fn start(&mut self, mut source: Box<dyn LocationSource>) -> Result<bool, TrackError> {
        if self.session.is_some() {
            return Err(TrackError::AlreadyActive);
        }
        if !self.permissions.request_location() {
            warn!("Location permission denied, staying idle");
            return Err(TrackError::PermissionDenied);
        }

        let samples = source.start(&self.ctx.request)?;
        let resumed = self.ctx.state.start(Utc::now());
        match (resumed, self.ctx.state.active_trip_id()) {
            (true, Some(id)) => info!("Resuming trip {}", id),
            (true, None) => info!("Resuming a trip that never reached the backend"),
            _ => info!("Starting a new trip"),
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(sample_processor::run(self.ctx.clone(), samples, stop_rx));

        self.session = Some(ActiveSession {
            source,
            stop_tx,
            handle: Some(handle),
            _guard: ForegroundGuard::acquire(),
        });
        Ok(resumed)
    }

    /// Resolves once the source has delivered its last sample. The trip stays
    /// active until [`Tracker::stop`]. Pending forever while idle.
    pub async fn source_finished(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return std::future::pending().await;
        };
        if let Some(handle) = session.handle.as_mut() {
            if let Err(e) = handle.await {
                error!("Tracking loop failed: {}", e);
            }
        }
        session.handle = None;
    }

    /// Stops sampling, waits for in-flight uploads, writes the final record and
    /// returns to idle. A trip that never reached the backend is inserted as
    /// completed; if that fails too it stays open locally and the next start
    /// resumes it.
    pub async fn stop(&mut self) -> Result<TripSummary, TrackError> {
        let ActiveSession {
            mut source,
            stop_tx,
            handle,
            _guard,
        } = self.session.take().ok_or(TrackError::NotActive)?;

        source.stop();
        let _ = stop_tx.send(());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Tracking loop failed: {}", e);
            }
        }

        let snapshot = self.ctx.state.snapshot();
        let now = Utc::now();
        let summary = match snapshot.trip_id {
            Some(id) => self.ctx.sync.finalize(id, &snapshot, now).await,
            None if snapshot.path.is_empty() => TripSummary {
                trip_id: None,
                distance: format_distance(path_distance_m(&snapshot.path)),
                duration: format_duration(elapsed_minutes(snapshot.started_at, now)),
                points: 0,
                synced: false,
            },
            // Every create failed while running; this is the last chance.
            None => {
                let owner = self.ctx.prefs.current_user().map(|u| u.phone);
                self.ctx.sync.upload_completed(owner, &snapshot, now).await
            }
        };

        if summary.trip_id.is_none() && !snapshot.path.is_empty() {
            warn!(
                "Trip could not be uploaded; {} points stay local until the next start",
                snapshot.path.len()
            );
        } else {
            self.ctx.state.stop();
        }
        info!("Trip stopped: {} | {}", summary.distance, summary.duration);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::ChannelSource;
    use crate::models::{GeoPoint, LocationSample, TripId, TripRecord, TripStatus, UserProfile};
    use crate::store::MemoryStore;

    fn setup(prefs: Prefs) -> (Arc<MemoryStore>, Arc<TrackingContext>) {
        let store = Arc::new(MemoryStore::new());
        let request = LocationRequest {
            min_distance_m: 5.0,
            ..LocationRequest::default()
        };
        let ctx = Arc::new(TrackingContext::new(prefs, store.clone(), request));
        (store, ctx)
    }

    fn fix(lat: f64, lng: f64) -> LocationSample {
        LocationSample::new(lat, lng, Utc::now())
    }

    #[tokio::test]
    async fn test_start_then_stop_without_samples() {
        let (store, ctx) = setup(Prefs::in_memory());
        let mut tracker = Tracker::new(ctx.clone(), Box::new(StaticPermission(true)));
        let (source, _sender) = ChannelSource::new(8);

        assert!(!tracker.start(Box::new(source)).unwrap());
        assert_eq!(tracker.state(), TrackerState::Active);

        let summary = tracker.stop().await.unwrap();
        assert_eq!(summary.distance, "0.00 km");
        assert_eq!(summary.duration, "0 min");
        assert_eq!(summary.trip_id, None);
        assert_eq!(store.trip_count(), 0);
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert!(!ctx.state.is_active());
    }

    #[tokio::test]
    async fn test_permission_denied_stays_idle() {
        let (_store, ctx) = setup(Prefs::in_memory());
        let mut tracker = Tracker::new(ctx.clone(), Box::new(StaticPermission(false)));
        let (source, _sender) = ChannelSource::new(8);

        assert!(matches!(
            tracker.start(Box::new(source)),
            Err(TrackError::PermissionDenied)
        ));
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert!(!ctx.state.is_active());
        assert!(matches!(tracker.stop().await, Err(TrackError::NotActive)));
    }

    #[tokio::test]
    async fn test_samples_create_then_update_remote_trip() {
        let prefs = Prefs::in_memory();
        prefs.save_user(&UserProfile::new("Asha", "555", "a@example.com"));
        let (store, ctx) = setup(prefs.clone());
        let mut tracker = Tracker::new(ctx.clone(), Box::new(StaticPermission(true)));
        let (source, sender) = ChannelSource::new(8);
        tracker.start(Box::new(source)).unwrap();

        assert!(sender.push(fix(0.0, 0.0)));
        assert!(sender.push(fix(0.0, 0.5)));
        // Within 5 m of the previous fix: skipped.
        assert!(sender.push(fix(0.0, 0.500001)));
        assert!(sender.push(fix(0.0, 1.0)));

        let summary = tracker.stop().await.unwrap();
        assert_eq!(summary.points, 3);
        assert_eq!(summary.distance, "111.19 km");
        assert!(summary.synced);

        let id = summary.trip_id.unwrap();
        let trip = store.trip(id).unwrap();
        assert_eq!(trip.owner.as_deref(), Some("555"));
        assert_eq!(trip.status, Some(TripStatus::Completed));
        assert_eq!(
            trip.path,
            vec![
                GeoPoint::new(0.0, 0.0),
                GeoPoint::new(0.0, 0.5),
                GeoPoint::new(0.0, 1.0)
            ]
        );
        assert_eq!(trip.distance.as_deref(), Some("111.19 km"));
        assert_eq!(trip.last_lng, Some(1.0));
        assert_eq!(store.trip_count(), 1);

        // Local state is cleared once the trip is finalized.
        assert!(ctx.state.current_path().is_empty());
        assert_eq!(prefs.active_trip_id(), None);
        assert_eq!(prefs.path_log(), "");
    }

    #[tokio::test]
    async fn test_failed_create_is_retried_on_next_fix() {
        let (store, ctx) = setup(Prefs::in_memory());
        store.set_offline(true);
        let mut tracker = Tracker::new(ctx.clone(), Box::new(StaticPermission(true)));
        let (source, sender) = ChannelSource::new(8);
        tracker.start(Box::new(source)).unwrap();

        sender.push(fix(10.0, 10.0));
        // Let the loop record the first fix while the backend is down.
        while ctx.state.current_path().is_empty() {
            tokio::task::yield_now().await;
        }
        store.set_offline(false);
        sender.push(fix(10.0, 10.1));

        let summary = tracker.stop().await.unwrap();
        let trip = store.trip(summary.trip_id.unwrap()).unwrap();
        assert_eq!(trip.path.len(), 2);
        assert_eq!(store.trip_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_after_restart_does_not_shrink_remote_path() {
        let prefs = Prefs::in_memory();
        let (store, _) = setup(prefs.clone());
        let remote_path = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0)];
        let id = store.put_trip(TripRecord {
            status: Some(TripStatus::InProgress),
            path: remote_path.clone(),
            ..Default::default()
        });

        // Process died with the trip running and its local log lost.
        prefs.set_trip_active(true);
        prefs.set_active_trip_id(Some(id));
        let ctx = Arc::new(TrackingContext::new(
            prefs,
            store.clone(),
            LocationRequest::default(),
        ));
        assert!(ctx.state.current_path().is_empty());

        let mut tracker = Tracker::new(ctx, Box::new(StaticPermission(true)));
        let (source, _sender) = ChannelSource::new(8);
        assert!(tracker.start(Box::new(source)).unwrap());

        let summary = tracker.stop().await.unwrap();
        assert_eq!(summary.trip_id, Some(id));
        assert_eq!(summary.points, 2);

        let trip = store.trip(id).unwrap();
        assert_eq!(trip.path, remote_path);
        assert_eq!(trip.status, Some(TripStatus::Completed));
    }

    fn resume_from_lost_log(prefs: &Prefs, store: &Arc<MemoryStore>, stored: Vec<GeoPoint>) -> TripId {
        let id = store.put_trip(TripRecord {
            status: Some(TripStatus::InProgress),
            path: stored,
            ..Default::default()
        });
        prefs.set_trip_active(true);
        prefs.set_active_trip_id(Some(id));
        id
    }

    #[tokio::test]
    async fn test_resumed_trip_with_lost_log_keeps_growing_remote_path() {
        let prefs = Prefs::in_memory();
        let (store, _) = setup(prefs.clone());
        let stored = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 0.25),
            GeoPoint::new(0.0, 0.5),
        ];
        let id = resume_from_lost_log(&prefs, &store, stored.clone());

        let ctx = Arc::new(TrackingContext::new(
            prefs,
            store.clone(),
            LocationRequest::default(),
        ));
        let mut tracker = Tracker::new(ctx, Box::new(StaticPermission(true)));
        let (source, sender) = ChannelSource::new(8);
        assert!(tracker.start(Box::new(source)).unwrap());
        assert!(sender.push(fix(0.0, 1.0)));

        let summary = tracker.stop().await.unwrap();
        assert_eq!(summary.trip_id, Some(id));
        assert_eq!(summary.points, 4);
        assert_eq!(summary.distance, "111.19 km");

        let trip = store.trip(id).unwrap();
        assert_eq!(trip.status, Some(TripStatus::Completed));
        assert_eq!(trip.path.len(), 4);
        assert_eq!(trip.path[..3], stored[..]);
        assert_eq!(trip.path[3], GeoPoint::new(0.0, 1.0));
    }

    #[tokio::test]
    async fn test_resumed_trip_holds_uploads_until_stored_path_loads() {
        let prefs = Prefs::in_memory();
        let (store, _) = setup(prefs.clone());
        let stored = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 0.25),
            GeoPoint::new(0.0, 0.5),
        ];
        let id = resume_from_lost_log(&prefs, &store, stored.clone());

        let ctx = Arc::new(TrackingContext::new(
            prefs,
            store.clone(),
            LocationRequest::default(),
        ));
        let mut tracker = Tracker::new(ctx.clone(), Box::new(StaticPermission(true)));
        let (source, sender) = ChannelSource::new(8);
        tracker.start(Box::new(source)).unwrap();

        store.set_offline(true);
        sender.push(fix(0.0, 1.0));
        while ctx.state.current_path().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(ctx.state.path_incomplete());
        assert_eq!(store.trip(id).unwrap().path, stored);

        store.set_offline(false);
        sender.push(fix(0.0, 1.5));
        let summary = tracker.stop().await.unwrap();
        assert_eq!(summary.points, 5);

        let trip = store.trip(id).unwrap();
        assert_eq!(trip.path.len(), 5);
        assert_eq!(trip.path[..3], stored[..]);
        assert_eq!(trip.status, Some(TripStatus::Completed));
    }

    #[tokio::test]
    async fn test_trip_created_on_stop_when_backend_was_down() {
        let prefs = Prefs::in_memory();
        prefs.save_user(&UserProfile::new("Asha", "555", "a@example.com"));
        let (store, ctx) = setup(prefs.clone());
        let mut tracker = Tracker::new(ctx.clone(), Box::new(StaticPermission(true)));
        let (source, sender) = ChannelSource::new(8);
        tracker.start(Box::new(source)).unwrap();

        store.set_offline(true);
        sender.push(fix(0.0, 0.0));
        sender.push(fix(0.0, 1.0));
        while ctx.state.current_path().len() < 2 {
            tokio::task::yield_now().await;
        }
        store.set_offline(false);

        let summary = tracker.stop().await.unwrap();
        assert!(summary.synced);
        assert_eq!(summary.distance, "111.19 km");
        let trip = store.trip(summary.trip_id.unwrap()).unwrap();
        assert_eq!(trip.status, Some(TripStatus::Completed));
        assert_eq!(trip.owner.as_deref(), Some("555"));
        assert_eq!(trip.path.len(), 2);
        assert_eq!(store.trip_count(), 1);
        assert!(!ctx.state.is_active());
        assert_eq!(prefs.path_log(), "");
    }

    #[tokio::test]
    async fn test_trip_kept_locally_when_backend_stays_down() {
        let prefs = Prefs::in_memory();
        let (store, ctx) = setup(prefs.clone());
        let mut tracker = Tracker::new(ctx.clone(), Box::new(StaticPermission(true)));
        let (source, sender) = ChannelSource::new(8);
        tracker.start(Box::new(source)).unwrap();

        store.set_offline(true);
        sender.push(fix(0.0, 0.0));
        sender.push(fix(0.0, 1.0));
        let summary = tracker.stop().await.unwrap();
        assert_eq!(summary.trip_id, None);
        assert!(!summary.synced);
        assert_eq!(summary.points, 2);
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert!(prefs.trip_active());
        assert_eq!(prefs.path_log(), "0,0;0,1;");

        // Next run, backend reachable again.
        store.set_offline(false);
        let ctx = Arc::new(TrackingContext::new(
            prefs.clone(),
            store.clone(),
            LocationRequest::default(),
        ));
        let mut tracker = Tracker::new(ctx, Box::new(StaticPermission(true)));
        let (source, sender) = ChannelSource::new(8);
        assert!(tracker.start(Box::new(source)).unwrap());
        sender.push(fix(0.0, 1.5));

        let summary = tracker.stop().await.unwrap();
        let trip = store.trip(summary.trip_id.unwrap()).unwrap();
        assert_eq!(trip.path.len(), 3);
        assert_eq!(trip.status, Some(TripStatus::Completed));
        assert_eq!(store.trip_count(), 1);
        assert!(!prefs.trip_active());
    }

    #[tokio::test]
    async fn test_cannot_start_twice() {
        let (_store, ctx) = setup(Prefs::in_memory());
        let mut tracker = Tracker::new(ctx, Box::new(StaticPermission(true)));
        let (first, _a) = ChannelSource::new(8);
        let (second, _b) = ChannelSource::new(8);

        tracker.start(Box::new(first)).unwrap();
        assert!(matches!(
            tracker.start(Box::new(second)),
            Err(TrackError::AlreadyActive)
        ));
        tracker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_source_end_leaves_trip_active() {
        let (_store, ctx) = setup(Prefs::in_memory());
        let mut tracker = Tracker::new(ctx.clone(), Box::new(StaticPermission(true)));
        let (source, sender) = ChannelSource::new(8);
        tracker.start(Box::new(source)).unwrap();

        sender.push(fix(1.0, 1.0));
        drop(sender);
        tracker.source_finished().await;

        assert_eq!(tracker.state(), TrackerState::Active);
        assert_eq!(ctx.state.current_path().len(), 1);
        let summary = tracker.stop().await.unwrap();
        assert_eq!(summary.points, 1);
    }
}
