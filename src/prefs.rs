//! Local key-value persistence.
//!
//! Values are stored as strings, the same way a platform preference store
//! would hold them. Read failures never surface: a missing or corrupt file
//! yields defaults, and a failed write is logged and dropped.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use crate::models::{GeoPoint, TripId, UserProfile};

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait KeyValueStore: Debug + Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), PrefsError>;
    fn remove(&self, key: &str) -> Result<(), PrefsError>;
    fn clear(&self) -> Result<(), PrefsError>;

    /// Appends to a string value, creating it when absent.
    fn append(&self, key: &str, suffix: &str) -> Result<(), PrefsError> {
        let mut value = self.get(key).unwrap_or_default();
        value.push_str(suffix);
        self.set(key, &value)
    }
}

pub mod keys {
    pub const IS_LOGGED_IN: &str = "is_logged_in";
    pub const USER_ID: &str = "user_id";
    pub const USER_NAME: &str = "user_name";
    pub const USER_PHONE: &str = "user_phone";
    pub const USER_EMAIL: &str = "user_email";
    pub const TRIP_ACTIVE: &str = "trip_active";
    pub const ACTIVE_TRIP_ID: &str = "active_trip_id";
    pub const TRIP_STARTED_AT: &str = "trip_started_at";
    pub const PATH_LOG: &str = "path_log";
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PrefsError> {
        lock(&self.values).remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), PrefsError> {
        lock(&self.values).clear();
        Ok(())
    }

    fn append(&self, key: &str, suffix: &str) -> Result<(), PrefsError> {
        lock(&self.values)
            .entry(key.to_string())
            .or_default()
            .push_str(suffix);
        Ok(())
    }
}

/// Preferences kept in a single JSON object on disk, rewritten on every change.
///
/// Values grown through [`KeyValueStore::append`] are kept out of that object:
/// each lives in `<name>.logs/<key>.log`, opened in append mode, so a long
/// path log costs one small write per entry.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
    logs: Mutex<BTreeMap<String, String>>,
}

impl FilePreferences {
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("Ignoring corrupt preferences file {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Could not read preferences file {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };

        let logs = load_logs(&path.with_extension("logs"));

        Self {
            path,
            values: Mutex::new(values),
            logs: Mutex::new(logs),
        }
    }

    fn logs_dir(&self) -> PathBuf {
        self.path.with_extension("logs")
    }

    fn log_file(&self, key: &str) -> PathBuf {
        self.logs_dir().join(format!("{}.log", key))
    }

    fn drop_log(&self, key: &str) -> Result<(), PrefsError> {
        if lock(&self.logs).remove(key).is_some() {
            match std::fs::remove_file(self.log_file(key)) {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }

    fn flush(&self, values: &BTreeMap<String, String>) -> Result<(), PrefsError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn load_logs(dir: &Path) -> BTreeMap<String, String> {
    let mut logs = BTreeMap::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return logs,
        Err(e) => {
            warn!("Could not read preference logs in {}: {}", dir.display(), e);
            return logs;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                logs.insert(key.to_string(), text);
            }
            Err(e) => warn!("Ignoring unreadable preference log {}: {}", path.display(), e),
        }
    }
    logs
}

impl KeyValueStore for FilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        let plain = lock(&self.values).get(key).cloned();
        plain.or_else(|| lock(&self.logs).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        {
            let mut values = lock(&self.values);
            values.insert(key.to_string(), value.to_string());
            self.flush(&values)?;
        }
        self.drop_log(key)
    }

    fn remove(&self, key: &str) -> Result<(), PrefsError> {
        {
            let mut values = lock(&self.values);
            if values.remove(key).is_some() {
                self.flush(&values)?;
            }
        }
        self.drop_log(key)
    }

    fn clear(&self) -> Result<(), PrefsError> {
        {
            let mut values = lock(&self.values);
            values.clear();
            self.flush(&values)?;
        }
        lock(&self.logs).clear();
        match std::fs::remove_dir_all(self.logs_dir()) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn append(&self, key: &str, suffix: &str) -> Result<(), PrefsError> {
        let mut values = lock(&self.values);
        let mut logs = lock(&self.logs);

        // A plain value moves into the log on its first append.
        let carried = values.remove(key);
        if carried.is_some() {
            self.flush(&values)?;
        }

        std::fs::create_dir_all(self.logs_dir())?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_file(key))?;
        if let Some(prefix) = &carried {
            file.write_all(prefix.as_bytes())?;
        }
        file.write_all(suffix.as_bytes())?;

        let entry = logs.entry(key.to_string()).or_default();
        if let Some(prefix) = carried {
            entry.push_str(&prefix);
        }
        entry.push_str(suffix);
        Ok(())
    }
}

/// Typed view over a [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct Prefs {
    store: Arc<dyn KeyValueStore>,
}

impl Prefs {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPreferences::new()))
    }

    fn put(&self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            warn!("Failed to persist preference {}: {}", key, e);
        }
    }

    fn drop_key(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            warn!("Failed to remove preference {}: {}", key, e);
        }
    }

    fn get_bool(&self, key: &str) -> bool {
        self.store.get(key).as_deref() == Some("true")
    }

    // --- user ---

    pub fn save_user(&self, user: &UserProfile) {
        self.put(keys::IS_LOGGED_IN, "true");
        match user.id {
            Some(id) => self.put(keys::USER_ID, &id.to_string()),
            None => self.drop_key(keys::USER_ID),
        }
        self.put(keys::USER_NAME, &user.name);
        self.put(keys::USER_PHONE, &user.phone);
        self.put(keys::USER_EMAIL, &user.email);
    }

    pub fn is_logged_in(&self) -> bool {
        self.get_bool(keys::IS_LOGGED_IN)
    }

    /// The saved identity, or `None` when logged out or the phone is missing.
    pub fn current_user(&self) -> Option<UserProfile> {
        if !self.is_logged_in() {
            return None;
        }
        let phone = self.store.get(keys::USER_PHONE).filter(|p| !p.is_empty())?;
        Some(UserProfile {
            id: self
                .store
                .get(keys::USER_ID)
                .and_then(|v| v.parse().ok()),
            name: self.store.get(keys::USER_NAME).unwrap_or_default(),
            phone,
            email: self.store.get(keys::USER_EMAIL).unwrap_or_default(),
            credential: None,
        })
    }

    pub fn clear_all(&self) {
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear preferences: {}", e);
        }
    }

    // --- trip ---

    pub fn trip_active(&self) -> bool {
        self.get_bool(keys::TRIP_ACTIVE)
    }

    pub fn set_trip_active(&self, active: bool) {
        self.put(keys::TRIP_ACTIVE, if active { "true" } else { "false" });
    }

    pub fn active_trip_id(&self) -> Option<TripId> {
        self.store
            .get(keys::ACTIVE_TRIP_ID)
            .and_then(|v| v.parse().ok())
    }

    pub fn set_active_trip_id(&self, id: Option<TripId>) {
        match id {
            Some(id) => self.put(keys::ACTIVE_TRIP_ID, &id.to_string()),
            None => self.drop_key(keys::ACTIVE_TRIP_ID),
        }
    }

    pub fn trip_started_at(&self) -> Option<DateTime<Utc>> {
        self.store
            .get(keys::TRIP_STARTED_AT)
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn set_trip_started_at(&self, at: Option<DateTime<Utc>>) {
        match at {
            Some(at) => self.put(keys::TRIP_STARTED_AT, &at.to_rfc3339()),
            None => self.drop_key(keys::TRIP_STARTED_AT),
        }
    }

    pub fn path_log(&self) -> String {
        self.store.get(keys::PATH_LOG).unwrap_or_default()
    }

    pub fn append_path_log(&self, point: GeoPoint) {
        if let Err(e) = self.store.append(keys::PATH_LOG, &format_path_entry(point)) {
            warn!("Failed to append to path log: {}", e);
        }
    }

    /// Rewrites the log to hold exactly `points`.
    pub fn replace_path_log(&self, points: &[GeoPoint]) {
        self.clear_path_log();
        let log: String = points.iter().copied().map(format_path_entry).collect();
        if log.is_empty() {
            return;
        }
        if let Err(e) = self.store.append(keys::PATH_LOG, &log) {
            warn!("Failed to rewrite path log: {}", e);
        }
    }

    pub fn clear_path_log(&self) {
        self.drop_key(keys::PATH_LOG);
    }
}

/// One `lat,lng;` entry of the path log.
pub fn format_path_entry(point: GeoPoint) -> String {
    format!("{},{};", point.lat, point.lng)
}

/// Parses a `lat,lng;lat,lng;...` log, skipping entries that do not parse.
pub fn parse_path_log(log: &str) -> Vec<GeoPoint> {
    log.split(';')
        .filter_map(|entry| {
            let (lat, lng) = entry.trim().split_once(',')?;
            let point = GeoPoint::new(lat.trim().parse().ok()?, lng.trim().parse().ok()?);
            point.is_valid().then_some(point)
        })
        .collect()
}
