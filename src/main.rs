//! faabook, the FAAB sportsbook server.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens and migrates the ledger store, serves the HTTP API and keeps the
//! current week's lines fresh until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use faabook::api;
use faabook::config::AppConfig;
use faabook::engine::book::Sportsbook;
use faabook::odds::source::JsonProjectionSource;
use faabook::storage::LedgerStore;
use faabook::types::BookError;

const DEFAULT_CONFIG_PATH: &str = "faabook.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("FAABOOK_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = if std::path::Path::new(&config_path).exists() {
        AppConfig::load(&config_path)?
    } else {
        let mut cfg = AppConfig::default();
        cfg.apply_env_overrides();
        cfg
    };

    init_logging();

    info!(
        name = %cfg.book.name,
        config = %config_path,
        week = cfg.book.current_week,
        starting_balance = cfg.book.starting_balance,
        "faabook starting up"
    );

    // -- Storage ---------------------------------------------------------

    let store = LedgerStore::open(&cfg.storage)
        .await
        .context("Failed to open ledger store")?;
    store.migrate().await.context("Failed to migrate ledger store")?;

    let book = Arc::new(Sportsbook::from_config(store, &cfg)?);

    // -- API -------------------------------------------------------------

    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let api_task = if cfg.api.enabled {
        let state = book.clone();
        let port = cfg.api.port;
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = stop_rx.changed().await;
            };
            if let Err(e) = api::serve(state, port, shutdown).await {
                error!(error = %e, "API server failed");
            }
        }))
    } else {
        info!("API disabled");
        None
    };

    // -- Line refresh loop -----------------------------------------------

    let source = cfg.lines.source_dir.as_deref().map(JsonProjectionSource::new);
    if source.is_none() {
        info!("No projection source configured; lines are published via the API only");
    }

    let refresh_every = Duration::from_secs(cfg.lines.refresh_interval_secs.max(1));
    let mut interval = tokio::time::interval(refresh_every);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = refresh_every.as_secs(),
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Some(source) = &source {
                    refresh(&book, source, cfg.book.current_week).await;
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // -- Shutdown --------------------------------------------------------

    let _ = stop_tx.send(true);
    if let Some(task) = api_task {
        if let Err(e) = task.await {
            warn!(error = %e, "API task ended abnormally");
        }
    }
    book.close().await;
    info!("faabook shut down cleanly.");

    Ok(())
}

/// Republish `week`'s lines from the projection files.
async fn refresh(book: &Sportsbook, source: &JsonProjectionSource, week: u32) {
    match book.refresh_lines(source, week).await {
        Ok(lines) => info!(week, count = lines.len(), "Lines refreshed"),
        Err(BookError::LinesLocked { .. }) => debug!(week, "Lines locked, refresh skipped"),
        Err(e) => error!(week, dir = %source.dir().display(), error = %e, "Line refresh failed"),
    }
}

/// Initialise the tracing subscriber.
///
/// Uses JSON format when `FAABOOK_LOG_JSON` is set, otherwise
/// human-readable. Log level controlled by `RUST_LOG` (default `faabook=info`).
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("faabook=info"));

    if std::env::var("FAABOOK_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
