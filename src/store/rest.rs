//! PostgREST-style client (`/rest/v1/<table>` with `column=eq.value` filters),
//! the interface hosted backends such as Supabase expose.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::{RemoteStore, StoreError};
use crate::models::{
    NewTrip, ProfileUpdate, TripId, TripRecord, TripStatus, TripUpdate, UserProfile, UserTarget,
    Zone,
};

const TRIPS: &str = "trips";
const USERS: &str = "users";
const ZONES: &str = "zones";
const USER_TARGETS: &str = "user_targets";

#[derive(Debug, Clone)]
pub struct RestStore {
    http: reqwest::Client,
    base_url: String,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, StoreError> {
        if base_url.trim().is_empty() {
            return Err(StoreError::Config("backend URL is empty".into()));
        }

        let mut headers = HeaderMap::new();
        if !api_key.is_empty() {
            let key = HeaderValue::from_str(api_key)
                .map_err(|_| StoreError::Config("invalid API key format".into()))?;
            let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|_| StoreError::Config("invalid API key format".into()))?;
            headers.insert("apikey", key);
            headers.insert(AUTHORIZATION, bearer);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            status.canonical_reason().unwrap_or("Unknown").to_string()
        } else {
            body
        };
        Err(StoreError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let resp = self
            .http
            .get(self.table_url(table))
            .query(&[("select", "*")])
            .query(filters)
            .send()
            .await?;
        let rows: Vec<Value> = Self::check_status(resp).await?.json().await?;
        Ok(decode_rows(table, rows))
    }

    async fn insert<B: serde::Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &'static str,
        body: &B,
    ) -> Result<T, StoreError> {
        let resp = self
            .http
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        let rows: Vec<Value> = Self::check_status(resp).await?.json().await?;
        decode_rows(table, rows)
            .into_iter()
            .next()
            .ok_or(StoreError::Missing(table))
    }

    async fn patch<B: serde::Serialize + ?Sized>(
        &self,
        table: &str,
        filters: &[(&str, String)],
        body: &B,
    ) -> Result<(), StoreError> {
        let resp = self
            .http
            .patch(self.table_url(table))
            .header("Prefer", "return=minimal")
            .query(filters)
            .json(body)
            .send()
            .await?;
        Self::check_status(resp).await?;
        Ok(())
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

/// Rows that do not decode are treated as absent.
fn decode_rows<T: DeserializeOwned>(table: &str, rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("Skipping malformed {} row: {}", table, e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn insert_trip(&self, trip: &NewTrip) -> Result<TripRecord, StoreError> {
        self.insert(TRIPS, trip).await
    }

    async fn update_trip(&self, id: TripId, update: &TripUpdate) -> Result<(), StoreError> {
        let mut filters = vec![("id", eq(id))];
        if matches!(update, TripUpdate::Live(_)) {
            filters.push(("status", eq(TripStatus::InProgress.as_str())));
        }
        debug!("PATCH {} id={}", TRIPS, id);
        self.patch(TRIPS, &filters, update).await
    }

    async fn fetch_trip(&self, id: TripId) -> Result<Option<TripRecord>, StoreError> {
        let rows: Vec<TripRecord> = self.select(TRIPS, &[("id", eq(id))]).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_trips(&self, owner: &str) -> Result<Vec<TripRecord>, StoreError> {
        self.select(
            TRIPS,
            &[
                ("owner", eq(owner)),
                ("order", "created_at.desc".to_string()),
            ],
        )
        .await
    }

    async fn find_user(
        &self,
        phone: &str,
        credential: Option<&str>,
    ) -> Result<Option<UserProfile>, StoreError> {
        let mut filters = vec![("phone", eq(phone)), ("limit", "1".to_string())];
        if let Some(credential) = credential {
            filters.push(("credential", eq(credential)));
        }
        let rows: Vec<UserProfile> = self.select(USERS, &filters).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_user(&self, user: &UserProfile) -> Result<UserProfile, StoreError> {
        self.insert(USERS, user).await
    }

    async fn update_user(&self, id: i64, update: &ProfileUpdate) -> Result<(), StoreError> {
        self.patch(USERS, &[("id", eq(id))], update).await
    }

    async fn list_zones(&self) -> Result<Vec<Zone>, StoreError> {
        self.select(ZONES, &[]).await
    }

    async fn find_target(&self, user_id: i64) -> Result<Option<UserTarget>, StoreError> {
        let rows: Vec<UserTarget> = self
            .select(
                USER_TARGETS,
                &[("user_id", eq(user_id)), ("limit", "1".to_string())],
            )
            .await?;
        Ok(rows.into_iter().next())
    }
}
