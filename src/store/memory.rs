use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::{RemoteStore, StoreError};
use crate::models::{
    NewTrip, ProfileUpdate, TripId, TripRecord, TripStatus, TripUpdate, UserProfile, UserTarget,
    Zone,
};

#[derive(Debug, Default)]
struct Tables {
    trips: BTreeMap<TripId, TripRecord>,
    users: BTreeMap<i64, UserProfile>,
    zones: Vec<Zone>,
    targets: BTreeMap<i64, UserTarget>,
    next_trip_id: TripId,
    next_user_id: i64,
}

/// Both tables held in process, with the same update rules as the real backends.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Api {
                status: 503,
                message: "backend unreachable".to_string(),
            });
        }
        Ok(self.tables.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Makes every call fail until switched back.
    #[cfg(test)]
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Inserts a row as-is, keeping its id, as if written by another session.
    #[cfg(test)]
    pub fn put_trip(&self, trip: TripRecord) -> TripId {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let id = trip.id.unwrap_or(tables.next_trip_id + 1);
        tables.next_trip_id = tables.next_trip_id.max(id);
        tables.trips.insert(id, TripRecord { id: Some(id), ..trip });
        id
    }

    #[cfg(test)]
    pub fn trip(&self, id: TripId) -> Option<TripRecord> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .trips
            .get(&id)
            .cloned()
    }

    #[cfg(test)]
    pub fn put_zone(&self, zone: Zone) {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .zones
            .push(zone);
    }

    #[cfg(test)]
    pub fn put_target(&self, user_id: i64, target: UserTarget) {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .targets
            .insert(user_id, target);
    }

    #[cfg(test)]
    pub fn trip_count(&self) -> usize {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .trips
            .len()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn insert_trip(&self, trip: &NewTrip) -> Result<TripRecord, StoreError> {
        let mut tables = self.tables()?;
        tables.next_trip_id += 1;
        let id = tables.next_trip_id;
        let record = TripRecord {
            id: Some(id),
            owner: trip.owner.clone(),
            status: Some(trip.status),
            start_label: Some(trip.start_label.clone()),
            end_label: trip.end_label.clone(),
            distance: Some(trip.distance.clone()),
            duration: Some(trip.duration.clone()),
            path: trip.path.clone(),
            last_lat: Some(trip.last_lat),
            last_lng: Some(trip.last_lng),
            created_at: Some(Utc::now()),
        };
        tables.trips.insert(id, record.clone());
        Ok(record)
    }

    async fn update_trip(&self, id: TripId, update: &TripUpdate) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let Some(trip) = tables.trips.get_mut(&id) else {
            return Ok(());
        };

        match update {
            TripUpdate::Live(live) => {
                if trip.status != Some(TripStatus::InProgress) {
                    return Ok(());
                }
                trip.path = live.path.clone();
                trip.last_lat = Some(live.last_lat);
                trip.last_lng = Some(live.last_lng);
                trip.distance = Some(live.distance.clone());
                trip.duration = Some(live.duration.clone());
            }
            TripUpdate::Final(fin) => {
                trip.status = Some(fin.status);
                trip.end_label = Some(fin.end_label.clone());
                trip.duration = Some(fin.duration.clone());
                if let Some(distance) = &fin.distance {
                    trip.distance = Some(distance.clone());
                }
                if let Some(path) = &fin.path {
                    trip.path = path.clone();
                }
                if fin.last_lat.is_some() {
                    trip.last_lat = fin.last_lat;
                }
                if fin.last_lng.is_some() {
                    trip.last_lng = fin.last_lng;
                }
            }
        }
        Ok(())
    }

    async fn fetch_trip(&self, id: TripId) -> Result<Option<TripRecord>, StoreError> {
        Ok(self.tables()?.trips.get(&id).cloned())
    }

    async fn list_trips(&self, owner: &str) -> Result<Vec<TripRecord>, StoreError> {
        let tables = self.tables()?;
        let mut trips: Vec<TripRecord> = tables
            .trips
            .values()
            .filter(|t| t.owner.as_deref() == Some(owner))
            .cloned()
            .collect();
        trips.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(trips)
    }

    async fn find_user(
        &self,
        phone: &str,
        credential: Option<&str>,
    ) -> Result<Option<UserProfile>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .users
            .values()
            .find(|u| {
                u.phone == phone
                    && credential.map_or(true, |c| u.credential.as_deref() == Some(c))
            })
            .cloned())
    }

    async fn insert_user(&self, user: &UserProfile) -> Result<UserProfile, StoreError> {
        let mut tables = self.tables()?;
        if tables.users.values().any(|u| u.phone == user.phone) {
            return Err(StoreError::Api {
                status: 409,
                message: format!("phone {} already registered", user.phone),
            });
        }
        tables.next_user_id += 1;
        let id = tables.next_user_id;
        let stored = UserProfile {
            id: Some(id),
            ..user.clone()
        };
        tables.users.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_user(&self, id: i64, update: &ProfileUpdate) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        if let Some(user) = tables.users.get_mut(&id) {
            update.apply(user);
        }
        Ok(())
    }

    async fn list_zones(&self) -> Result<Vec<Zone>, StoreError> {
        Ok(self.tables()?.zones.clone())
    }

    async fn find_target(&self, user_id: i64) -> Result<Option<UserTarget>, StoreError> {
        Ok(self.tables()?.targets.get(&user_id).cloned())
    }
}
