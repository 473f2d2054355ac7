//! Date-scoped trip history and the daily distance goal.

use chrono::{Duration, FixedOffset, NaiveDate};

use crate::models::{GeoPoint, TripId, TripRecord};
use crate::state::TripStateStore;
use crate::store::{RemoteStore, StoreError};

#[derive(Debug, Clone)]
pub struct DailyHistory {
    pub date: NaiveDate,
    /// Newest first.
    pub trips: Vec<TripRecord>,
    /// Sum of the path distances of `trips`.
    pub total_km: f64,
    /// A trip still marked in progress, if the owner has one.
    pub active_trip: Option<TripRecord>,
}

/// Progress towards the distance goal of the zone assigned to a user.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyGoal {
    pub zone_id: Option<i64>,
    pub target_km: f64,
    pub covered_km: f64,
    /// Rounded and clamped to `0..=100`.
    pub percent: u8,
    pub polygon: Vec<GeoPoint>,
    pub target: Option<GeoPoint>,
}

/// The owner's trips created on `date` in the given offset. Rows without a
/// readable `created_at` are left out.
pub async fn trips_for_date(
    store: &dyn RemoteStore,
    owner: &str,
    date: NaiveDate,
    offset: FixedOffset,
) -> Result<DailyHistory, StoreError> {
    let all = store.list_trips(owner).await?;
    let active_trip = all.iter().find(|t| t.is_in_progress()).cloned();

    let trips: Vec<TripRecord> = all
        .into_iter()
        .filter(|t| {
            t.created_at
                .map(|at| at.with_timezone(&offset).date_naive() == date)
                .unwrap_or(false)
        })
        .collect();
    let total_km = trips.iter().map(TripRecord::path_distance_km).sum();

    Ok(DailyHistory {
        date,
        trips,
        total_km,
        active_trip,
    })
}

/// Today's history doubles as a recovery point: a trip the backend still
/// shows as running becomes the local active trip, so the next start resumes
/// it. Returns the adopted id.
pub fn adopt_active_trip(
    day: &DailyHistory,
    today: NaiveDate,
    state: &TripStateStore,
) -> Option<TripId> {
    if day.date != today {
        return None;
    }
    let trip = day.active_trip.as_ref()?;
    let id = trip.id?;
    state.adopt_remote_trip(id, trip.created_at).then_some(id)
}

pub fn goal_percent(covered_km: f64, target_km: f64) -> u8 {
    if target_km <= 0.0 || !covered_km.is_finite() {
        return 0;
    }
    (covered_km / target_km * 100.0).round().clamp(0.0, 100.0) as u8
}

/// The goal of the zone assigned to `user_id`, or `None` when there is no
/// such zone or its target is not positive.
pub async fn daily_goal(
    store: &dyn RemoteStore,
    user_id: i64,
    covered_km: f64,
) -> Result<Option<DailyGoal>, StoreError> {
    let zones = store.list_zones().await?;
    let Some(zone) = zones.into_iter().find(|z| z.is_assigned_to(user_id)) else {
        return Ok(None);
    };
    let target_km = zone.target_km.unwrap_or(0.0);
    if target_km.is_nan() || target_km <= 0.0 {
        return Ok(None);
    }
    let target = store.find_target(user_id).await?.and_then(|t| t.point());

    Ok(Some(DailyGoal {
        zone_id: zone.id,
        target_km,
        covered_km,
        percent: goal_percent(covered_km, target_km),
        polygon: zone.polygon,
        target,
    }))
}

pub fn date_title(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_string()
    } else if date == today - Duration::days(1) {
        "Yesterday".to_string()
    } else if date == today + Duration::days(1) {
        "Tomorrow".to_string()
    } else {
        date.format("%b %d, %Y").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TripStatus, UserTarget, Zone};
    use crate::prefs::Prefs;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(330 * 60).unwrap()
    }

    fn trip(owner: &str, created: (i32, u32, u32, u32, u32), status: TripStatus) -> TripRecord {
        let (y, mo, d, h, mi) = created;
        TripRecord {
            owner: Some(owner.to_string()),
            status: Some(status),
            path: vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0)],
            created_at: Some(Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_trips_filtered_by_local_date() {
        let store = MemoryStore::new();
        // 2025-03-04 20:00 UTC is 2025-03-05 01:30 in +05:30.
        store.put_trip(trip("555", (2025, 3, 4, 20, 0), TripStatus::Completed));
        store.put_trip(trip("555", (2025, 3, 5, 9, 0), TripStatus::InProgress));
        store.put_trip(trip("555", (2025, 3, 4, 10, 0), TripStatus::Completed));
        store.put_trip(trip("777", (2025, 3, 5, 9, 0), TripStatus::Completed));
        store.put_trip(TripRecord {
            owner: Some("555".to_string()),
            ..Default::default()
        });

        let date = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        let day = trips_for_date(&store, "555", date, ist()).await.unwrap();

        assert_eq!(day.trips.len(), 2);
        assert!(day.trips[0].created_at > day.trips[1].created_at);
        assert!((day.total_km - 2.0 * 111.19).abs() < 0.02);
        assert_eq!(day.active_trip.and_then(|t| t.id), day.trips[0].id);
    }

    #[tokio::test]
    async fn test_todays_running_trip_is_adopted() {
        let store = MemoryStore::new();
        let id = store.put_trip(trip("555", (2025, 3, 5, 9, 0), TripStatus::InProgress));
        let today = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        let prefs = Prefs::in_memory();
        let state = TripStateStore::new(prefs.clone());

        let yesterday = trips_for_date(&store, "555", today - Duration::days(1), ist())
            .await
            .unwrap();
        assert_eq!(adopt_active_trip(&yesterday, today, &state), None);
        assert!(!state.is_active());

        let day = trips_for_date(&store, "555", today, ist()).await.unwrap();
        assert_eq!(adopt_active_trip(&day, today, &state), Some(id));
        assert!(state.is_active());
        assert_eq!(prefs.active_trip_id(), Some(id));
        assert!(state.path_incomplete());
    }

    #[test]
    fn test_goal_percent_is_clamped() {
        assert_eq!(goal_percent(0.0, 10.0), 0);
        assert_eq!(goal_percent(2.55, 10.0), 26);
        assert_eq!(goal_percent(10.0, 10.0), 100);
        assert_eq!(goal_percent(25.0, 10.0), 100);
        assert_eq!(goal_percent(-3.0, 10.0), 0);
        assert_eq!(goal_percent(5.0, 0.0), 0);
        assert_eq!(goal_percent(f64::NAN, 10.0), 0);
    }

    #[tokio::test]
    async fn test_daily_goal_uses_assigned_zone() {
        let store = MemoryStore::new();
        store.put_zone(Zone {
            id: Some(1),
            target_km: Some(50.0),
            assigned_user: Some("User 8".to_string()),
            ..Default::default()
        });
        store.put_zone(Zone {
            id: Some(2),
            polygon: vec![GeoPoint::new(1.0, 1.0), GeoPoint::new(1.0, 2.0)],
            target_km: Some(20.0),
            assigned_user: Some("User 7".to_string()),
        });
        store.put_target(
            7,
            UserTarget {
                lat: Some(1.5),
                lng: Some(1.5),
            },
        );

        let goal = daily_goal(&store, 7, 5.0).await.unwrap().unwrap();
        assert_eq!(goal.zone_id, Some(2));
        assert_eq!(goal.percent, 25);
        assert_eq!(goal.polygon.len(), 2);
        assert_eq!(goal.target, Some(GeoPoint::new(1.5, 1.5)));

        assert!(daily_goal(&store, 9, 5.0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zone_without_target_has_no_goal() {
        let store = MemoryStore::new();
        store.put_zone(Zone {
            assigned_user: Some("7".to_string()),
            target_km: Some(0.0),
            ..Default::default()
        });
        assert!(daily_goal(&store, 7, 5.0).await.unwrap().is_none());
    }

    #[test]
    fn test_date_title() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        assert_eq!(date_title(today, today), "Today");
        assert_eq!(date_title(today - Duration::days(1), today), "Yesterday");
        assert_eq!(date_title(today + Duration::days(1), today), "Tomorrow");
        assert_eq!(
            date_title(NaiveDate::from_ymd_opt(2025, 1, 9).unwrap(), today),
            "Jan 09, 2025"
        );
    }
}
