//! Verigate Sweeper - stale token maintenance loop.
//!
//! This binary:
//! 1. Periodically consumes token rows that expired without a submission
//! 2. Notifies each row's webhook that the token went unused
//!
//! Notification failures are logged and skipped; the rows are already
//! consumed, so a missed message costs nothing but visibility.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::{signal, time};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

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

    info!("sweeper_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        sweep_interval_seconds = config.sweep_interval_seconds,
        "config_loaded"
    );

    // Connect the token store and relay
    let store = TokenStore::connect(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to the token store")?;
    let relay = WebhookRelay::new(config.request_timeout_ms);

    run(config, store, relay).await?;

    Ok(())
}

/// Run the sweep loop until a shutdown signal arrives.
async fn run(config: Config, store: TokenStore, relay: WebhookRelay) -> Result<()> {
    let mut interval = time::interval(Duration::from_secs(config.sweep_interval_seconds));

    // Create shutdown signal future
    let shutdown = async {
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
    };

    tokio::pin!(shutdown);

    info!("sweeper_ready");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("sweeper_stopping");
                break;
            }
            _ = interval.tick() => {
                sweep_once(&store, &relay).await;
            }
        }
    }

    info!("sweeper_shutdown_complete");
    Ok(())
}

/// Expire stale tokens and notify their webhooks.
async fn sweep_once(store: &TokenStore, relay: &WebhookRelay) {
    let rows = match store.expire_stale(Utc::now()).await {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "sweep_expire_failed");
            return;
        }
    };

    if rows.is_empty() {
        info!("sweep_nothing_stale");
        return;
    }

    let mut notified = 0usize;
    for row in &rows {
        match relay.notify_expired(&row.webhook_url, row.token_prefix()).await {
            Ok(()) => notified += 1,
            Err(e) => {
                warn!(
                    token_prefix = row.token_prefix(),
                    error = %e,
                    "sweep_notify_failed"
                );
            }
        }
    }

    info!(
        expired_count = rows.len(),
        notified_count = notified,
        "sweep_complete"
    );
}
