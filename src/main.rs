//! realtime-link entry point.
//!
//! Connects to the backend with the token from `LINK_TOKEN`, logs lifecycle
//! and domain events, and serves the status endpoints until Ctrl-C.

use anyhow::Context;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use realtime_link::api;
use realtime_link::app_state::AppState;
use realtime_link::config::LinkConfig;
use realtime_link::domain::InboundEvent;
use realtime_link::link::ConnectionManager;

/// Events the binary logs for operators.
const LOGGED_EVENTS: [&str; 10] = [
    "connected",
    "connection_error",
    "reconnecting",
    "reconnect_failed",
    "disconnected",
    "payment_verified",
    "payment_success",
    "new_notification",
    "user_status_update",
    "socket_error",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = LinkConfig::from_env();
    let token = std::env::var("LINK_TOKEN").context("LINK_TOKEN must be set")?;
    let status_addr = config.status_addr;

    // Build the manager and observe its events
    let manager = ConnectionManager::new(config);
    for event in LOGGED_EVENTS {
        manager.on(event, log_event)?;
    }
    if let Err(err) = manager.connect(&token) {
        if err.is_configuration() {
            anyhow::bail!("{err}; set BACKEND_URL to the realtime server address");
        }
        return Err(anyhow::Error::new(err).context("connection preconditions failed"));
    }

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState {
            manager: manager.clone(),
        });

    // Start server
    let listener = tokio::net::TcpListener::bind(status_addr)
        .await
        .with_context(|| format!("binding status server to {status_addr}"))?;
    tracing::info!(addr = %status_addr, "status server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.disconnect();
    tracing::info!("shutdown complete");
    Ok(())
}

fn log_event(event: &InboundEvent) {
    match serde_json::to_string(event) {
        Ok(json) => tracing::info!(event = event.name(), payload = %json, "realtime event"),
        Err(err) => tracing::warn!(event = event.name(), error = %err, "unserializable event"),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}
