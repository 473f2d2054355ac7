mod cli;

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use trackmate_sync::config::AppConfig;
use trackmate_sync::prefs::{FilePreferences, Prefs};
use trackmate_sync::store;
use trackmate_sync::tracker::TrackingContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting TrackMate sync...");

    // Local state survives restarts through the preferences file
    let prefs = Prefs::new(Arc::new(FilePreferences::open(&config.prefs_path)));
    let store = store::connect(&config).await?;
    let ctx = Arc::new(TrackingContext::new(
        prefs,
        store.clone(),
        config.location_request(),
    ));

    let app = cli::App { config, store, ctx };
    app.run(cli.command).await
}
