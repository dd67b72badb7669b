//! Market Stream Relay Binary
//!
//! Starts the per-client WebSocket relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `MARKET_DATA_API_KEY`: Provider API key
//! - `MARKET_DATA_WS_URL`: Provider streaming base URL
//!
//! ## Optional
//! - `MARKET_DATA_NEWS_STREAM_URL`: News stream URL (default: `{ws_url}/news`)
//! - `MARKET_DATA_QUOTES_STREAM_URL`: Market data stream URL (default: `{ws_url}/quotes`)
//! - `RELAY_HOST` / `RELAY_PORT`: Listen address (default: 0.0.0.0:8080)
//! - `RELAY_RECONNECT_DELAY_INITIAL_MS`: Backoff start (default: 2000)
//! - `RELAY_RECONNECT_DELAY_MAX_MS`: Backoff ceiling (default: 10000)
//! - `RELAY_MAX_RECONNECT_ATTEMPTS`: 0 = unlimited (default: 0)
//! - `RELAY_PING_INTERVAL_SECS`: Upstream ping period (default: 15)
//! - `RELAY_STALENESS_THRESHOLD_SECS`: Stale-drop age (default: 10)
//! - `RELAY_HANDSHAKE_TIMEOUT_SECS`: 0 = no timeout (default: 0)
//! - `RELAY_MIRROR_UPSTREAM_CLOSE`: Close clients on upstream close (default: true)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-stream-relay)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_stream_relay::infrastructure::telemetry;
use market_stream_relay::{RelayConfig, RelayServer, StreamConnector, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Stream Relay");

    let _metrics_handle = init_metrics().context("failed to install Prometheus recorder")?;

    let config = RelayConfig::from_env().context("invalid relay configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let connector = Arc::new(StreamConnector::from_config(&config));
    let server = RelayServer::new(config.relay.clone(), connector, shutdown_token.clone());

    let mut server_task = tokio::spawn(server.run());

    tracing::info!("Relay ready");

    tokio::select! {
        () = await_shutdown() => {}
        result = &mut server_task => {
            shutdown_token.cancel();
            result.context("relay server task panicked")??;
            return Ok(());
        }
    }

    shutdown_token.cancel();
    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, server_task).await {
        Ok(result) => result.context("relay server task panicked")??,
        Err(_) => tracing::warn!("Relay server did not stop within the shutdown timeout"),
    }

    tracing::info!("Relay stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        bind_addr = %config.relay.bind_addr(),
        mirror_upstream_close = config.relay.mirror_upstream_close,
        reconnect_initial_ms = config.websocket.reconnect_delay_initial.as_millis(),
        reconnect_max_ms = config.websocket.reconnect_delay_max.as_millis(),
        max_reconnect_attempts = config.websocket.max_reconnect_attempts,
        "Configuration loaded"
    );
    tracing::debug!(
        news_stream_url = %config.provider.news_stream_url,
        quotes_stream_url = %config.provider.quotes_stream_url,
        base_url = config.provider.base_url.as_deref().unwrap_or("-"),
        "Provider endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
