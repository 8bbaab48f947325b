/**
 * SHIELD DASHBOARD - Backend entry point of the Community Shield dashboard
 *
 * ROLE : boots config, the shared MQTT session, the three live collections
 * and the read-only HTTP surface the dashboard views poll.
 *
 * The MQTT session is opened once here and injected into every collection.
 */

mod http;

use crate::http::AppState;
use anyhow::{Context, Result};
use shield_sync::health::HealthTracker;
use shield_sync::{load_config, LiveFeeds, MqttSource};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;

    // one session for everything
    let health = HealthTracker::new();
    let source = MqttSource::shared(&cfg.mqtt, health.clone());

    let feeds = Arc::new(LiveFeeds::start(source, &cfg.sync));

    let app = http::build_router(AppState { feeds: feeds.clone(), health });

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    info!("[dashboard] listening on http://{}", cfg.http.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // router dropped with the server: we are the last owner
    if let Ok(feeds) = Arc::try_unwrap(feeds) {
        feeds.shutdown().await;
    }
    info!("[dashboard] stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("[dashboard] shutdown requested");
    }
}
