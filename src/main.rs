//! Schema Tracker — Binary Entrypoint
//! Loads configuration, opens the tracking repository, and runs the polling
//! daemon until externally stopped.

use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use schema_tracker::config::TrackerConfig;
use schema_tracker::daemon::Daemon;
use schema_tracker::fetch::http::HttpFetcher;
use schema_tracker::store::git::GitStore;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("schema_tracker=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = TrackerConfig::load_default().context("loading tracker config")?;
    tracing::info!(
        sources = cfg.sources.len(),
        interval_secs = cfg.poll_interval_secs,
        "schema tracker starting"
    );

    // Setup failures are the only fatal ones; everything past this point is
    // per-cycle and soft.
    let store = GitStore::open(&cfg.tracker_dir, &cfg.author_name, &cfg.author_email)
        .await
        .context("opening tracking repository")?;
    let fetcher = HttpFetcher::new(
        &cfg.user_agent,
        cfg.connect_timeout(),
        cfg.request_timeout(),
    )
    .context("building http client")?;

    Daemon::new(cfg, Arc::new(fetcher), Arc::new(store))
        .run()
        .await
}
