//! API routes for Braid.
//!
//! This module combines all API routes into a single router. The acting
//! principal arrives as an `x-user-id` header on every request that
//! writes or lists owned records; the core only ever sees it as an
//! explicit parameter.

mod graph;
mod sessions;
mod status;

pub use status::init_startup_time;

use axum::http::HeaderMap;
use axum::Router;

use crate::{AppState, Error, Result};

/// Build the complete API router.
///
/// Route structure:
/// - /sessions/* - Chat sessions: create, fork, history, appends
/// - /memories/*, /edges - Raw graph access
/// - /health, /status - Health checks (public)
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(status::routes())
        .nest("/sessions", sessions::routes())
        .merge(graph::routes())
}

/// Resolve the acting principal from request headers.
pub(crate) fn actor(headers: &HeaderMap) -> Result<String> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(Error::Unauthenticated)
}
