//! Trip tracking pipeline: location fixes feed an in-memory trip that is
//! mirrored to local preferences and synced to a remote tabular backend.

pub mod account;
pub mod config;
pub mod db;
pub mod geo;
pub mod history;
pub mod location;
pub mod models;
pub mod prefs;
pub mod state;
pub mod store;
pub mod sync;
pub mod tracker;
