//! In-memory trip state, written through to local preferences.
//!
//! The tracking loop is the only writer. Readers (status output, the final
//! sync on stop) take copies through [`TripStateStore::snapshot`].

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::models::{GeoPoint, TripId};
use crate::prefs::{parse_path_log, Prefs};

#[derive(Debug, Default, Clone)]
struct TripState {
    active: bool,
    path: Vec<GeoPoint>,
    last_position: Option<GeoPoint>,
    trip_id: Option<TripId>,
    started_at: Option<DateTime<Utc>>,
    // The remote trip holds points that the local buffer lacks.
    path_incomplete: bool,
}

/// Consistent copy of the trip state at one instant.
#[derive(Debug, Clone, Default)]
pub struct TripSnapshot {
    pub active: bool,
    pub path: Vec<GeoPoint>,
    pub last_position: Option<GeoPoint>,
    pub trip_id: Option<TripId>,
    pub started_at: Option<DateTime<Utc>>,
    /// `path` only holds the points recorded since the stored path was lost.
    /// It must be appended to the remote path, never written in its place.
    pub path_incomplete: bool,
}

#[derive(Debug)]
pub struct TripStateStore {
    inner: Mutex<TripState>,
    prefs: Prefs,
}

impl TripStateStore {
    /// Builds the store and immediately restores whatever the preferences hold.
    pub fn new(prefs: Prefs) -> Self {
        let store = Self {
            inner: Mutex::new(TripState::default()),
            prefs,
        };
        store.restore();
        store
    }

    fn lock(&self) -> MutexGuard<'_, TripState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reloads the trip from local storage. The path log is only trusted when a
    /// trip was running or a trip id was persisted alongside it. A trip id with
    /// no logged points means the log was lost, so the stored path must be
    /// loaded before anything is written back. Returns the number of restored
    /// points.
    pub fn restore(&self) -> usize {
        let active = self.prefs.trip_active();
        let trip_id = self.prefs.active_trip_id();
        let path = if active || trip_id.is_some() {
            parse_path_log(&self.prefs.path_log())
        } else {
            Vec::new()
        };

        let mut state = self.lock();
        state.active = active;
        state.trip_id = trip_id;
        state.started_at = self.prefs.trip_started_at();
        state.last_position = path.last().copied();
        state.path_incomplete = trip_id.is_some() && path.is_empty();
        state.path = path;

        if let Some(id) = trip_id {
            info!(
                "Restored trip {} with {} points (active: {})",
                id,
                state.path.len(),
                active
            );
        }
        state.path.len()
    }

    /// Marks the trip active. A restored trip that has a remote id or logged
    /// points is resumed with its path; anything else starts from an empty
    /// buffer. Returns `true` when an existing trip was resumed.
    pub fn start(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        let resumed = state.active && (state.trip_id.is_some() || !state.path.is_empty());

        if !resumed {
            state.path.clear();
            state.trip_id = None;
            state.path_incomplete = false;
            state.started_at = Some(now);
            self.prefs.clear_path_log();
            self.prefs.set_active_trip_id(None);
            self.prefs.set_trip_started_at(Some(now));
        } else if state.started_at.is_none() {
            state.started_at = Some(now);
            self.prefs.set_trip_started_at(Some(now));
        }

        state.active = true;
        self.prefs.set_trip_active(true);
        resumed
    }

    /// Ends the trip and drops its buffer. The last position is kept for display.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.active = false;
        state.path.clear();
        state.trip_id = None;
        state.started_at = None;
        state.path_incomplete = false;

        self.prefs.set_trip_active(false);
        self.prefs.set_active_trip_id(None);
        self.prefs.set_trip_started_at(None);
        self.prefs.clear_path_log();
    }

    /// Appends a point when a trip is active, mirroring it to the path log.
    pub fn add_point(&self, lat: f64, lng: f64) -> bool {
        let mut state = self.lock();
        if !state.active {
            debug!("Dropping point {},{}: no active trip", lat, lng);
            return false;
        }
        let point = GeoPoint::new(lat, lng);
        state.path.push(point);
        self.prefs.append_path_log(point);
        true
    }

    /// Puts the stored remote path in front of the points recorded since the
    /// restart and rewrites the path log to match. No-op unless the path is
    /// marked incomplete.
    pub fn seed_path(&self, stored: &[GeoPoint]) {
        let mut state = self.lock();
        if !state.path_incomplete {
            return;
        }
        let mut path = stored.to_vec();
        path.append(&mut state.path);
        state.path = path;
        state.path_incomplete = false;
        self.prefs.replace_path_log(&state.path);
        info!("Loaded {} stored points", stored.len());
    }

    /// Takes over a trip the backend still shows as running, so the next start
    /// resumes it. Refused while another trip is open locally.
    pub fn adopt_remote_trip(&self, id: TripId, started_at: Option<DateTime<Utc>>) -> bool {
        let mut state = self.lock();
        if state.active || state.trip_id.is_some() {
            return state.trip_id == Some(id);
        }

        state.active = true;
        state.trip_id = Some(id);
        state.path.clear();
        state.path_incomplete = true;
        state.started_at = started_at;

        self.prefs.clear_path_log();
        self.prefs.set_trip_active(true);
        self.prefs.set_active_trip_id(Some(id));
        self.prefs.set_trip_started_at(started_at);
        info!("Marked remote trip {} as the active trip", id);
        true
    }

    pub fn set_position(&self, lat: f64, lng: f64) {
        self.lock().last_position = Some(GeoPoint::new(lat, lng));
    }

    pub fn set_active_trip_id(&self, id: TripId) {
        self.lock().trip_id = Some(id);
        self.prefs.set_active_trip_id(Some(id));
    }

    pub fn current_path(&self) -> Vec<GeoPoint> {
        self.lock().path.clone()
    }

    pub fn last_point(&self) -> Option<GeoPoint> {
        self.lock().path.last().copied()
    }

    pub fn last_position(&self) -> Option<GeoPoint> {
        self.lock().last_position
    }

    pub fn active_trip_id(&self) -> Option<TripId> {
        self.lock().trip_id
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock().started_at
    }

    pub fn path_incomplete(&self) -> bool {
        self.lock().path_incomplete
    }

    pub fn snapshot(&self) -> TripSnapshot {
        let state = self.lock();
        TripSnapshot {
            active: state.active,
            path: state.path.clone(),
            last_position: state.last_position,
            trip_id: state.trip_id,
            started_at: state.started_at,
            path_incomplete: state.path_incomplete,
        }
    }

    /// Forgets everything in memory. Used on logout, after the preferences
    /// themselves have been wiped.
    pub fn clear(&self) {
        *self.lock() = TripState::default();
    }
}
