//! Health and status routes.
//!
//! Routes:
//! - GET /health - Liveness probe
//! - GET /status - Uptime, queue depth, store health

use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::db;
use crate::{AppState, Result};

static STARTUP_TIME: OnceLock<Instant> = OnceLock::new();

/// Record the process start time for uptime reporting. Called once from
/// main before the server starts.
pub fn init_startup_time() {
    STARTUP_TIME.get_or_init(Instant::now);
}

/// Build status routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    db::health_check(&state.db).await?;

    let open_jobs = db::count_open_jobs(&state.db).await?;
    let uptime_secs = STARTUP_TIME
        .get()
        .map(|t| t.elapsed().as_secs())
        .unwrap_or(0);

    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime_secs,
        "open_jobs": open_jobs,
    })))
}
