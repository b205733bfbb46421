//! # murmur-server
//!
//! HTTP backend for the Murmur chat system.
//!
//! This binary provides:
//! - **Message store** (SQLite) with per-store monotonic ordering
//! - **Delivery/seen reconciliation** as idempotent receipt-set unions
//! - **Conversation feeds** and list summaries, recomputed on every fetch
//! - **REST API** (axum) for clients plus identity-provider webhooks
//! - **Web push fan-out** with pruning of dead endpoints

mod api;
mod auth;
mod config;
mod error;
mod push;

use std::sync::{Arc, Mutex};

use tracing::info;
use tracing_subscriber::EnvFilter;

use murmur_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::push::HttpPushTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,murmur_server=debug")),
        )
        .init();

    info!("Starting Murmur server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        addr = %config.http_addr,
        webhooks_enabled = config.webhook_token.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Open the message store
    // -----------------------------------------------------------------------
    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    if let Some(path) = db.path() {
        info!(path = %path.display(), "Message store open");
    }

    // -----------------------------------------------------------------------
    // 4. Application state for the HTTP API
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    let app_state = AppState {
        db: Arc::new(Mutex::new(db)),
        push: Arc::new(HttpPushTransport::new()),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
