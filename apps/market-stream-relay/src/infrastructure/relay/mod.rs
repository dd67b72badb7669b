//! Relay Server
//!
//! Accepts client WebSocket connections at `/{tool}` and pairs each with its
//! own upstream link. Sessions share nothing.
//!
//! # Routes
//!
//! - `GET /{tool}` + upgrade - One relay session (`connect_news_feed`,
//!   `connect_market_data`)
//! - `GET /health`, `GET /metrics` - See [`health`](crate::infrastructure::health)

pub mod session;

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::UpstreamConnector;
use crate::infrastructure::config::RelaySettings;
use crate::infrastructure::health::health_routes;

pub use session::{SessionRejection, client_close_code, error_payload, open_upstream};

/// State shared by the route handlers.
#[derive(Clone)]
pub(crate) struct RelayState {
    connector: Arc<dyn UpstreamConnector>,
    settings: Arc<RelaySettings>,
    cancel: CancellationToken,
}

/// The relay's HTTP/WebSocket server.
pub struct RelayServer {
    settings: RelaySettings,
    connector: Arc<dyn UpstreamConnector>,
    cancel: CancellationToken,
}

impl RelayServer {
    /// Create a new relay server.
    #[must_use]
    pub fn new(
        settings: RelaySettings,
        connector: Arc<dyn UpstreamConnector>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            connector,
            cancel,
        }
    }

    /// The router serving all relay routes.
    pub fn router(&self) -> Router {
        let state = RelayState {
            connector: Arc::clone(&self.connector),
            settings: Arc::new(self.settings.clone()),
            cancel: self.cancel.clone(),
        };

        health_routes()
            .route("/{tool}", get(upgrade_handler))
            .with_state(state)
    }

    /// Bind `host:port` and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `RelayServerError` if binding fails or the server stops with
    /// a fatal error.
    pub async fn run(self) -> Result<(), RelayServerError> {
        let addr = self.settings.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayServerError::BindFailed(addr.clone(), e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on a pre-bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `RelayServerError::ServerFailed` on a fatal server error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), RelayServerError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| RelayServerError::ServerFailed(e.to_string()))?;
        tracing::info!(addr = %local_addr, "Relay server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(self.cancel.clone().cancelled_owned())
            .await
            .map_err(|e| RelayServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Relay server stopped");
        Ok(())
    }
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    Path(tool): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<RelayState>,
) -> Response {
    ws.on_upgrade(move |socket| session::run(socket, tool, query, state))
}

// =============================================================================
// Errors
// =============================================================================

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind {0}: {1}")]
    BindFailed(String, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
