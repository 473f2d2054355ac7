//! Remote tabular store holding the `trips` and `users` tables, plus the
//! read-only `zones` and `user_targets` goal tables.

pub mod memory;
pub mod postgres;
pub mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::config::{AppConfig, Backend};
use crate::models::{
    NewTrip, ProfileUpdate, TripId, TripRecord, TripUpdate, UserProfile, UserTarget, Zone,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use rest::RestStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} returned no row")]
    Missing(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Filter/insert/update access to the backend. Only equality filters are
/// used; there are no transactions and the last write wins.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn insert_trip(&self, trip: &NewTrip) -> Result<TripRecord, StoreError>;

    /// Live updates only touch trips that are still in progress.
    async fn update_trip(&self, id: TripId, update: &TripUpdate) -> Result<(), StoreError>;

    async fn fetch_trip(&self, id: TripId) -> Result<Option<TripRecord>, StoreError>;

    /// All trips of one owner, newest first.
    async fn list_trips(&self, owner: &str) -> Result<Vec<TripRecord>, StoreError>;

    async fn find_user(
        &self,
        phone: &str,
        credential: Option<&str>,
    ) -> Result<Option<UserProfile>, StoreError>;

    async fn insert_user(&self, user: &UserProfile) -> Result<UserProfile, StoreError>;

    async fn update_user(&self, id: i64, update: &ProfileUpdate) -> Result<(), StoreError>;

    /// Every goal zone; callers pick the one assigned to their user.
    async fn list_zones(&self) -> Result<Vec<Zone>, StoreError>;

    async fn find_target(&self, user_id: i64) -> Result<Option<UserTarget>, StoreError>;
}

pub async fn connect(config: &AppConfig) -> anyhow::Result<Arc<dyn RemoteStore>> {
    let store: Arc<dyn RemoteStore> = match config.backend {
        Backend::Rest => {
            info!("Using REST backend at {}", config.rest_url);
            Arc::new(RestStore::new(&config.rest_url, &config.rest_key)?)
        }
        Backend::Postgres => {
            let pool = crate::db::init_pool(&config.database_url).await?;
            crate::db::ensure_schema(&pool).await?;
            info!("Connected to database");
            Arc::new(PgStore::new(pool))
        }
        Backend::Memory => {
            info!("Using in-memory backend; nothing will outlive this process");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}
