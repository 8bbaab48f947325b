/**
 * HTTP API - Read-only surface of the live collections
 *
 * ROUTES :
 * - GET /health    : uptime, MQTT status, size and loading flag per collection
 * - GET /incidents : { items: [Incident], loading }
 * - GET /units     : { items: [Unit], loading }
 * - GET /logs      : { items: ["[HH:MM:SS] msg"], loading }
 * - GET /stats     : counters for the stat panels
 *
 * SECURITY :
 * Header x-api-key must match SHIELD_API_KEY on every route except /health.
 */

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{routing::get, Json, Router};
use shield_sync::health::{DashboardHealth, HealthTracker};
use shield_sync::models::{Incident, LogEntry, Unit};
use shield_sync::stats::{compute_stats, DashboardStats};
use shield_sync::{LiveFeeds, Snapshot};
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub feeds: Arc<LiveFeeds>,
    pub health: HealthTracker,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/incidents", get(get_incidents))
        .route("/units", get(get_units))
        .route("/logs", get(get_logs))
        .route("/stats", get(get_stats))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    let path = req.uri().path();

    if path.starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("SHIELD_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        warn!("[http] SHIELD_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    if !api_key_matches(req.headers(), &expected) {
        warn!("[http] rejected request to {} (bad api key)", path);
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

fn api_key_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| !expected.is_empty() && v == expected)
        .unwrap_or(false)
}

// GET /health
async fn get_health(State(app): State<AppState>) -> Json<DashboardHealth> {
    Json(app.health.get_health(app.feeds.health()))
}

// GET /incidents
async fn get_incidents(State(app): State<AppState>) -> Json<Snapshot<Incident>> {
    Json(app.feeds.incidents.snapshot())
}

// GET /units
async fn get_units(State(app): State<AppState>) -> Json<Snapshot<Unit>> {
    Json(app.feeds.units.snapshot())
}

// GET /logs
async fn get_logs(State(app): State<AppState>) -> Json<Snapshot<LogEntry>> {
    Json(app.feeds.logs.snapshot())
}

// GET /stats
async fn get_stats(State(app): State<AppState>) -> Json<DashboardStats> {
    let incidents = app.feeds.incidents.items();
    let units = app.feeds.units.items();
    Json(compute_stats(&incidents, &units))
}
