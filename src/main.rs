use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod config;
mod db;
mod events;
mod fpl;
mod scheduler;
mod scoring;
mod state;

use config::Config;
use db::Database;
use fpl::{FplApi, FplClient};
use scheduler::Scheduler;
use state::UpstreamHealth;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    for stored in db.recent_events(5)?.iter().rev() {
        info!(
            "resuming after logged event: gw{} {} {:+}",
            stored.gameweek,
            stored.event.subjects.join(", "),
            stored.event.points_delta
        );
    }

    let api: Arc<dyn FplApi> = Arc::new(FplClient::new(&config.api_url)?);
    let health = UpstreamHealth::new();
    info!(
        "Scoring {} manager(s) against {}",
        config.entry_ids.len(),
        config.api_url
    );

    let scheduler = Scheduler::new(
        api,
        db,
        health,
        config.entry_ids.clone(),
        Duration::from_secs(config.live_poll_secs),
        Duration::from_secs(config.prematch_poll_secs),
        config.max_event_log,
    );

    // Runs forever; the scheduler plans its own timers from fixture data.
    scheduler.run().await;

    Ok(())
}
