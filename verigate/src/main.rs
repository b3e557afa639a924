//! Verigate Web Server - verification upload and interaction endpoints.
//!
//! This binary runs the HTTP service:
//! - Accepts multipart uploads from the external web form
//! - Verifies and handles signed chat-platform interactions
//! - Issues verification tokens to operators

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use verigate::web::{cors_layer, health, interactions, issue_token, upload, AppState};
use verigate::{Config, TokenStore, WebhookRelay};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        public_key_configured = config.discord_public_key.is_some(),
        issuance_configured = config.issue_api_key.is_some(),
        upload_max_bytes = config.upload_max_bytes,
        allowed_origins = ?config.allowed_origins,
        "config_loaded"
    );

    // Connect the token store
    let store = TokenStore::connect(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to the token store")?;

    // Create the webhook relay client
    let relay = WebhookRelay::new(config.request_timeout_ms);

    // Create application state
    let state = AppState::new(config.clone(), store, relay);

    // Leave headroom over the file cap for the boundary and token field
    let body_limit = config.upload_max_bytes + 64 * 1024;

    // Build the router
    let app = Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/interactions", post(interactions))
        .route("/tokens", post(issue_token))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
