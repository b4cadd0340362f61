//! `chainstate serve` command: start the chain-state HTTP server.
//!
//! Reads TOML configuration, opens the storage backend, builds the chain
//! registry, then starts an Axum HTTP server with graceful shutdown support.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use dotenvy::dotenv;
use tower_http::cors;

use crate::chain::build_chain_registry;
use crate::config::load_config;
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::routes;
use crate::signal::SigDown;
use crate::storage::{Fixtures, MemoryStore, Storage};
use crate::stream::StreamingQuery;

#[cfg(feature = "telemetry")]
use crate::telemetry::Telemetry;

/// How long open listings get to flush their final item on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Execute the `serve` command.
///
/// # Errors
///
/// Returns an error if configuration loading, registry construction, or
/// server binding fails.
#[allow(clippy::cognitive_complexity)]
pub async fn run(config_path: &Path) -> Result<(), Error> {
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider())
        .map_err(|_| Error::Server("failed to install the rustls crypto provider".into()))?;

    dotenv().ok();

    #[cfg(feature = "telemetry")]
    let (_telemetry_guard, telemetry_layer) = {
        let telemetry =
            Telemetry::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")).register();
        let layer = telemetry.http_tracing();
        (telemetry, layer)
    };
    #[cfg(not(feature = "telemetry"))]
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = load_config(config_path)?;

    let fixtures = match &config.storage().fixtures {
        Some(path) => {
            tracing::info!(path = %path.display(), "seeding in-memory store");
            Fixtures::load(path)?
        }
        None => {
            tracing::warn!("no storage fixtures configured, starting with an empty store");
            Fixtures::default()
        }
    };
    let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new(fixtures));

    let registry = build_chain_registry(config.chains(), &storage)?;
    if registry.chains().is_empty() {
        tracing::warn!("no chains configured, every chain request will be rejected");
    }

    let sig_down = SigDown::try_new()
        .map_err(|e| Error::server_with("failed to register signal handlers", e))?;
    let streaming = StreamingQuery::new(config.stream_buffer(), sig_down.cancellation_token())
        .with_tracker(sig_down.tracker());
    let dispatcher = Dispatcher::new(Arc::new(registry), streaming);

    let http_endpoints = routes::router(Arc::new(dispatcher), config.api_root());
    #[cfg(feature = "telemetry")]
    let http_endpoints = http_endpoints.layer(telemetry_layer);
    let http_endpoints = http_endpoints.layer(
        cors::CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(cors::Any),
    );

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))
        .map_err(|e| Error::server_with(format!("failed to bind {addr}"), e))?;
    tracing::info!(
        "Starting server at http://{}{}",
        addr,
        config.api_root().trim_end_matches('/')
    );

    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await
        .map_err(|e| Error::server_with("server error", e))?;

    sig_down.drain(SHUTDOWN_GRACE).await;
    tracing::info!("Server stopped");
    Ok(())
}
