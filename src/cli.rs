use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{FixedOffset, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use trackmate_sync::account::Account;
use trackmate_sync::config::AppConfig;
use trackmate_sync::history::{adopt_active_trip, daily_goal, date_title, trips_for_date};
use trackmate_sync::location::ReplaySource;
use trackmate_sync::models::{ProfileUpdate, UserProfile};
use trackmate_sync::store::RemoteStore;
use trackmate_sync::tracker::{StaticPermission, Tracker, TrackingContext};

#[derive(Debug, Parser)]
#[command(name = "trackmate", about = "Record trips and sync them to the backend")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in with an existing account
    Login {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        credential: Option<String>,
    },
    /// Create an account, or log in if the phone is already registered
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        credential: Option<String>,
    },
    /// Show or edit the profile
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Track a trip from a recorded track until it ends or Ctrl-C
    Track {
        #[arg(long)]
        replay: PathBuf,
        /// Overrides LOCATION_INTERVAL_MS
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// List trips for a day (defaults to today)
    History {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show login and trip state
    Status,
    /// Forget the user and any unfinished local trip
    Logout,
}

pub struct App {
    pub config: AppConfig,
    pub store: Arc<dyn RemoteStore>,
    pub ctx: Arc<TrackingContext>,
}

impl App {
    fn account(&self) -> Account {
        Account::new(self.store.clone(), self.ctx.prefs.clone())
    }

    fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.config.history_utc_offset_minutes * 60)
            .context("HISTORY_UTC_OFFSET_MINUTES is out of range")
    }

    pub async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Login { phone, credential } => {
                let user = self.account().login(&phone, credential.as_deref()).await?;
                println!("Welcome back, {}", user.name);
            }
            Command::Register {
                name,
                phone,
                email,
                credential,
            } => {
                let user = UserProfile::new(&name, &phone, &email).with_credential(credential);
                let user = self.account().register(user).await?;
                println!("Logged in as {} ({})", user.name, user.phone);
            }
            Command::Profile { name, email } => {
                let user = self
                    .account()
                    .update_profile(ProfileUpdate { name, email })
                    .await?;
                println!("Name:  {}\nPhone: {}\nEmail: {}", user.name, user.phone, user.email);
            }
            Command::Track {
                replay,
                interval_ms,
            } => self.track(replay, interval_ms).await?,
            Command::History { date } => self.history(date).await?,
            Command::Status => self.status(),
            Command::Logout => {
                self.account().logout(&self.ctx.state);
                println!("Logged out");
            }
        }
        Ok(())
    }

    async fn track(&self, replay: PathBuf, interval_ms: Option<u64>) -> Result<()> {
        if !self.ctx.prefs.is_logged_in() {
            bail!("log in before tracking");
        }

        let source = ReplaySource::from_file(&replay)
            .with_context(|| format!("reading {}", replay.display()))?;

        let ctx = match interval_ms {
            Some(ms) => {
                let mut request = self.ctx.request.clone();
                request.interval = std::time::Duration::from_millis(ms);
                Arc::new(TrackingContext::new(
                    self.ctx.prefs.clone(),
                    self.store.clone(),
                    request,
                ))
            }
            None => self.ctx.clone(),
        };

        let mut tracker = Tracker::new(
            ctx,
            Box::new(StaticPermission(self.config.location_permission)),
        );
        if tracker.start(Box::new(source))? {
            println!("Resumed the unfinished trip");
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping trip"),
            _ = tracker.source_finished() => {}
        }

        let summary = tracker.stop().await?;
        println!(
            "Trip {}: {} in {} ({} points{})",
            summary
                .trip_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            summary.distance,
            summary.duration,
            summary.points,
            if summary.synced { "" } else { ", not synced" }
        );
        Ok(())
    }

    async fn history(&self, date: Option<NaiveDate>) -> Result<()> {
        let user = self.account().current_user().context("not logged in")?;
        let offset = self.offset()?;
        let today = Utc::now().with_timezone(&offset).date_naive();
        let date = date.unwrap_or(today);

        let day = trips_for_date(self.store.as_ref(), &user.phone, date, offset).await?;

        println!("{} ({})", date_title(date, today), date);
        if day.trips.is_empty() {
            println!("No trips found.");
        }
        for trip in &day.trips {
            let when = trip
                .created_at
                .map(|t| t.with_timezone(&offset).format("%H:%M").to_string())
                .unwrap_or_else(|| "Unknown".to_string());
            let label = trip
                .start_label
                .clone()
                .unwrap_or_else(|| format!("Trip at {}", when));
            if trip.is_in_progress() {
                println!("  [Active] {}  Live now", label);
            } else {
                println!(
                    "  [Done]   {}  {:.2} km, {}",
                    label,
                    trip.path_distance_km(),
                    trip.duration.as_deref().unwrap_or("0 min")
                );
            }
        }
        println!("Total: {:.2} km", day.total_km);

        if let Some(user_id) = user.id {
            match daily_goal(self.store.as_ref(), user_id, day.total_km).await {
                Ok(Some(goal)) => {
                    println!(
                        "Goal:  {}% ({:.2} / {} km)",
                        goal.percent,
                        goal.covered_km,
                        goal.target_km.trunc()
                    );
                    if let Some(t) = goal.target {
                        println!("Target: {:.5}, {:.5}", t.lat, t.lng);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Could not load the daily goal: {}", e),
            }
        }

        if let Some(id) = adopt_active_trip(&day, today, &self.ctx.state) {
            println!("Trip {} is still in progress; `trackmate track` resumes it", id);
        } else if let Some(id) = day.active_trip.as_ref().and_then(|t| t.id) {
            println!("Trip {} is still in progress", id);
        }
        Ok(())
    }

    fn status(&self) {
        match self.ctx.prefs.current_user() {
            Some(user) => println!("User:  {} ({})", user.name, user.phone),
            None => println!("User:  not logged in"),
        }
        let snapshot = self.ctx.state.snapshot();
        if snapshot.active {
            println!(
                "Trip:  active (id {}, {} points recorded locally)",
                snapshot
                    .trip_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "pending".to_string()),
                snapshot.path.len()
            );
        } else {
            println!("Trip:  idle");
        }
        if let Some(p) = snapshot.last_position {
            println!("Last:  {:.5}, {:.5}", p.lat, p.lng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_history_date() {
        let cli = Cli::try_parse_from(["trackmate", "history", "--date", "2025-03-05"]).unwrap();
        match cli.command {
            Command::History { date } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2025, 3, 5));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Cli::try_parse_from(["trackmate", "history", "--date", "05/03/2025"]).is_err());
    }
}
