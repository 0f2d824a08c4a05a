//! HTTP API: an Axum server over the sportsbook.
//!
//! Exposes participant sync, line publication, wager placement and
//! settlement, balances, ledgers and the ledger audit as JSON endpoints.
//! CORS is open so a league front end can call it directly.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::{delete, get, post},
    Router,
};
use std::future::Future;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use routes::AppState;

/// Serve the API until `shutdown` resolves.
pub async fn serve<F>(state: AppState, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "API server starting on http://localhost:{port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    info!("API server stopped");
    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/participants", post(routes::sync_participant))
        .route("/api/participants/:id", delete(routes::deactivate_participant))
        .route("/api/participants/:id/balance", get(routes::get_balance))
        .route("/api/participants/:id/ledger", get(routes::get_ledger))
        .route("/api/participants/:id/wagers", get(routes::get_wagers))
        .route(
            "/api/weeks/:week/lines",
            get(routes::get_lines).post(routes::generate_lines),
        )
        .route("/api/wagers", post(routes::place_wager))
        .route("/api/wagers/:id/settle", post(routes::settle_wager))
        .route("/api/matchups/:id/settle", post(routes::settle_matchup))
        .route("/api/audit", get(routes::audit))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
