use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::location::{Accuracy, LocationRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Rest,
    Postgres,
    Memory,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rest" | "supabase" => Ok(Backend::Rest),
            "postgres" | "pg" => Ok(Backend::Postgres),
            "memory" => Ok(Backend::Memory),
            other => Err(anyhow!("unknown BACKEND '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: Backend,
    pub rest_url: String,
    pub rest_key: String,
    pub database_url: String,
    pub prefs_path: String,
    pub location_permission: bool,
    pub location_interval_ms: u64,
    pub location_min_distance_m: f64,
    pub location_accuracy: Accuracy,
    pub channel_capacity: usize,
    pub history_utc_offset_minutes: i32,
    pub log_level: String,
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let backend = env::var("BACKEND")
            .unwrap_or_else(|_| "rest".to_string())
            .parse()?;
        let rest_url = env::var("SUPABASE_URL").unwrap_or_else(|_| "http://localhost:54321".to_string());
        let rest_key = env::var("SUPABASE_KEY").unwrap_or_default();

        let db_host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
        let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
        let db_name = env::var("DB_DATABASE").unwrap_or_else(|_| "trackmate".to_string());
        let db_user = env::var("DB_USER").unwrap_or_else(|_| "trackmate".to_string());
        let db_pwd = env::var("DB_PWD").unwrap_or_else(|_| "trackmate".to_string());

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let prefs_path =
            env::var("PREFS_PATH").unwrap_or_else(|_| ".trackmate/prefs.json".to_string());

        let location_permission = !matches!(
            env::var("LOCATION_PERMISSION")
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
                .as_str(),
            "denied" | "false" | "0"
        );
        let location_interval_ms = parsed("LOCATION_INTERVAL_MS", 10_000);
        let location_min_distance_m = parsed("LOCATION_MIN_DISTANCE_M", 5.0);
        let location_accuracy = parsed("LOCATION_ACCURACY", Accuracy::High);
        let channel_capacity = parsed("CHANNEL_CAPACITY", 64);
        let history_utc_offset_minutes = parsed("HISTORY_UTC_OFFSET_MINUTES", 330);

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            backend,
            rest_url,
            rest_key,
            database_url,
            prefs_path,
            location_permission,
            location_interval_ms,
            location_min_distance_m,
            location_accuracy,
            channel_capacity,
            history_utc_offset_minutes,
            log_level,
        })
    }

    pub fn location_request(&self) -> LocationRequest {
        LocationRequest {
            interval: Duration::from_millis(self.location_interval_ms),
            min_distance_m: self.location_min_distance_m,
            accuracy: self.location_accuracy,
            capacity: self.channel_capacity,
        }
    }
}
