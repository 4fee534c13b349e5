//! # freewifi-server
//!
//! HTTP front for the crowdsourced WiFi network directory.
//!
//! This binary provides:
//! - **Form submission** of new networks with validation and UI-shaped outcomes
//! - **Live network lists** streamed as Server-Sent Events
//! - **Status and health** endpoints for diagnostics
//!
//! Records live in the hosted InstantDB app named by `APP_ID`; set
//! `STORE_BACKEND=memory` for a throwaway in-process store.

mod api;
mod config;
mod error;

use std::sync::Arc;

use freewifi_shared::NETWORKS;
use freewifi_store::{InstantStore, MemoryStore, RemoteStore, StoreClient};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::{BackendKind, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,freewifi_server=debug,freewifi_store=debug")
        }))
        .init();

    info!("Starting freewifi server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store
    // -----------------------------------------------------------------------
    let backend: Arc<dyn RemoteStore> = match config.backend {
        BackendKind::Instant => Arc::new(
            InstantStore::new(config.instant_config())?
                .with_schema(&NETWORKS)
                .with_feed_capacity(config.feed_capacity),
        ),
        BackendKind::Memory => {
            warn!("Using the in-memory store: networks are lost on restart");
            Arc::new(
                MemoryStore::new()
                    .with_schema(&NETWORKS)
                    .with_feed_capacity(config.feed_capacity),
            )
        }
    };
    let store = Arc::new(StoreClient::connect(backend, config.store_config()));

    let app_state = AppState {
        store: store.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server until it fails or Ctrl+C arrives
    // -----------------------------------------------------------------------
    let result = tokio::select! {
        result = api::serve(app_state, config.http_addr) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    // Ends every live subscription and releases the store.
    store.close().await;

    if let Err(e) = &result {
        tracing::error!(error = %e, "HTTP server failed");
    }
    result
}
