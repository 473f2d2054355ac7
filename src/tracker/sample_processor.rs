use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::TrackingContext;
use crate::geo::{elapsed_minutes, format_distance, format_duration, haversine_m, path_distance_m};
use crate::models::{LiveUpdate, LocationSample, NewTrip, TripStatus};
use crate::sync::start_label;

/// Consumes samples until the source ends or `stop` fires. Samples already
/// queued when `stop` fires are still recorded, and in-flight uploads are
/// awaited before returning.
pub(crate) async fn run(
    ctx: Arc<TrackingContext>,
    mut samples: mpsc::Receiver<LocationSample>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut uploads = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => {
                while let Ok(sample) = samples.try_recv() {
                    process_sample(&ctx, sample, &mut uploads).await;
                }
                break;
            }
            Some(done) = uploads.join_next(), if !uploads.is_empty() => {
                if let Err(e) = done {
                    error!("Upload task failed: {}", e);
                }
            }
            sample = samples.recv() => match sample {
                Some(sample) => process_sample(&ctx, sample, &mut uploads).await,
                None => {
                    info!("Location source finished");
                    break;
                }
            },
        }
    }

    while let Some(done) = uploads.join_next().await {
        if let Err(e) = done {
            error!("Upload task failed: {}", e);
        }
    }
}

pub(crate) async fn process_sample(
    ctx: &TrackingContext,
    sample: LocationSample,
    uploads: &mut JoinSet<()>,
) {
    let point = sample.point();
    if !point.is_valid() {
        warn!("Ignoring invalid fix {},{}", sample.lat, sample.lng);
        return;
    }

    if ctx.state.path_incomplete() {
        load_stored_path(ctx).await;
    }

    if let Some(last) = ctx.state.last_point() {
        let moved = haversine_m(last, point);
        if moved < ctx.request.min_distance_m {
            debug!("Fix moved {:.1} m, below threshold", moved);
            return;
        }
    }

    debug!("New location: {}, {}", sample.lat, sample.lng);
    ctx.state.set_position(sample.lat, sample.lng);
    if !ctx.state.add_point(sample.lat, sample.lng) {
        return;
    }

    let snapshot = ctx.state.snapshot();
    let now = Utc::now();
    let distance = format_distance(path_distance_m(&snapshot.path));
    let duration = format_duration(elapsed_minutes(snapshot.started_at, now));

    match snapshot.trip_id {
        // Creation is awaited so a burst of fixes cannot open several trips.
        None => {
            let trip = NewTrip {
                owner: ctx.prefs.current_user().map(|u| u.phone),
                status: TripStatus::InProgress,
                start_label: start_label(snapshot.started_at.unwrap_or(now)),
                end_label: None,
                distance,
                duration,
                path: snapshot.path,
                last_lat: sample.lat,
                last_lng: sample.lng,
            };
            match ctx.sync.create(&trip).await {
                Ok(id) => {
                    info!("Started remote trip {}", id);
                    ctx.state.set_active_trip_id(id);
                }
                Err(e) => error!("Failed to create trip, will retry on next fix: {}", e),
            }
        }
        // A live write carries the whole path; without the stored part it
        // would shorten the remote copy.
        Some(id) if snapshot.path_incomplete => {
            warn!("Stored path of trip {} not loaded yet, holding upload", id);
        }
        Some(id) => {
            let update = LiveUpdate {
                path: snapshot.path,
                last_lat: sample.lat,
                last_lng: sample.lng,
                distance,
                duration,
            };
            let sync = ctx.sync.clone();
            uploads.spawn(async move { sync.push_live(id, update).await });
        }
    }
}

/// Pulls the stored path of a resumed trip whose local log was lost. On
/// failure the path stays incomplete and the next fix tries again.
async fn load_stored_path(ctx: &TrackingContext) {
    let Some(id) = ctx.state.active_trip_id() else {
        return;
    };
    match ctx.sync.fetch(id).await {
        Ok(Some(trip)) => ctx.state.seed_path(&trip.path),
        Ok(None) => {
            warn!("Trip {} not found remotely, continuing with local points", id);
            ctx.state.seed_path(&[]);
        }
        Err(e) => warn!("Could not load stored path of trip {}: {}", id, e),
    }
}
