//! Direct Postgres access to the same tables the REST backend serves.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Decode, Postgres, Row, Type};

use super::{RemoteStore, StoreError};
use crate::db::{queries, DbPool};
use crate::models::zone::polygon_from_value;
use crate::models::{
    GeoPoint, NewTrip, ProfileUpdate, TripId, TripRecord, TripStatus, TripUpdate, UserProfile,
    UserTarget, Zone,
};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

// Columns that fail to decode are read as absent, like the REST rows.
fn opt<T>(row: &PgRow, column: &str) -> Option<T>
where
    T: for<'r> Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get::<Option<T>, _>(column).ok().flatten()
}

fn trip_from_row(row: &PgRow) -> TripRecord {
    let status: Option<String> = opt(row, "status");
    let path: Option<Json<Vec<GeoPoint>>> = opt(row, "path");

    TripRecord {
        id: row.try_get("id").ok(),
        owner: opt(row, "owner"),
        status: status.as_deref().and_then(TripStatus::parse),
        start_label: opt(row, "start_label"),
        end_label: opt(row, "end_label"),
        distance: opt(row, "distance"),
        duration: opt(row, "duration"),
        path: path.map(|p| p.0).unwrap_or_default(),
        last_lat: opt(row, "last_lat"),
        last_lng: opt(row, "last_lng"),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").ok(),
    }
}

fn user_from_row(row: &PgRow) -> UserProfile {
    UserProfile {
        id: row.try_get("id").ok(),
        name: row.try_get("name").unwrap_or_default(),
        phone: row.try_get("phone").unwrap_or_default(),
        email: row.try_get("email").unwrap_or_default(),
        credential: opt(row, "credential"),
    }
}

fn zone_from_row(row: &PgRow) -> Zone {
    let polygon: Option<Json<serde_json::Value>> = opt(row, "polygon");
    Zone {
        id: row.try_get("id").ok(),
        polygon: polygon.map(|p| polygon_from_value(&p.0)).unwrap_or_default(),
        target_km: opt(row, "target_km"),
        assigned_user: opt(row, "assigned_user"),
    }
}

#[async_trait]
impl RemoteStore for PgStore {
    async fn insert_trip(&self, trip: &NewTrip) -> Result<TripRecord, StoreError> {
        let row = sqlx::query(queries::INSERT_TRIP)
            .bind(&trip.owner)
            .bind(trip.status.as_str())
            .bind(&trip.start_label)
            .bind(&trip.end_label)
            .bind(&trip.distance)
            .bind(&trip.duration)
            .bind(Json(&trip.path))
            .bind(trip.last_lat)
            .bind(trip.last_lng)
            .fetch_one(&self.pool)
            .await?;
        Ok(trip_from_row(&row))
    }

    async fn update_trip(&self, id: TripId, update: &TripUpdate) -> Result<(), StoreError> {
        match update {
            TripUpdate::Live(live) => {
                sqlx::query(queries::UPDATE_TRIP_LIVE)
                    .bind(id)
                    .bind(Json(&live.path))
                    .bind(live.last_lat)
                    .bind(live.last_lng)
                    .bind(&live.distance)
                    .bind(&live.duration)
                    .execute(&self.pool)
                    .await?;
            }
            TripUpdate::Final(fin) => {
                sqlx::query(queries::UPDATE_TRIP_FINAL)
                    .bind(id)
                    .bind(fin.status.as_str())
                    .bind(&fin.end_label)
                    .bind(&fin.duration)
                    .bind(&fin.distance)
                    .bind(fin.path.as_ref().map(Json))
                    .bind(fin.last_lat)
                    .bind(fin.last_lng)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn fetch_trip(&self, id: TripId) -> Result<Option<TripRecord>, StoreError> {
        let row = sqlx::query(queries::SELECT_TRIP)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(trip_from_row))
    }

    async fn list_trips(&self, owner: &str) -> Result<Vec<TripRecord>, StoreError> {
        let rows = sqlx::query(queries::SELECT_TRIPS_BY_OWNER)
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(trip_from_row).collect())
    }

    async fn find_user(
        &self,
        phone: &str,
        credential: Option<&str>,
    ) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query(queries::SELECT_USER_BY_PHONE)
            .bind(phone)
            .bind(credential)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn insert_user(&self, user: &UserProfile) -> Result<UserProfile, StoreError> {
        let row = sqlx::query(queries::INSERT_USER)
            .bind(&user.name)
            .bind(&user.phone)
            .bind(&user.email)
            .bind(&user.credential)
            .fetch_one(&self.pool)
            .await?;
        Ok(user_from_row(&row))
    }

    async fn update_user(&self, id: i64, update: &ProfileUpdate) -> Result<(), StoreError> {
        sqlx::query(queries::UPDATE_USER)
            .bind(id)
            .bind(&update.name)
            .bind(&update.email)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_zones(&self) -> Result<Vec<Zone>, StoreError> {
        let rows = sqlx::query(queries::SELECT_ZONES)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(zone_from_row).collect())
    }

    async fn find_target(&self, user_id: i64) -> Result<Option<UserTarget>, StoreError> {
        let row = sqlx::query(queries::SELECT_USER_TARGET)
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(|row| UserTarget {
            lat: opt(row, "lat"),
            lng: opt(row, "lng"),
        }))
    }
}
