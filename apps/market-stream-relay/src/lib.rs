#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Market Stream Relay - Per-Client WebSocket Relay
//!
//! A WebSocket service that lets clients open a provider stream (news feed
//! or market data) by tool name. Each client connection gets its own
//! authenticated upstream link, kept alive across reconnects, and receives
//! the provider's fresh payloads verbatim.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Stream kinds, descriptors and state machines
//!   - `stream`: Tool-name registry and per-kind timings
//!   - `subscription`: Subscription descriptors and query decoding
//!   - `connection`: Upstream link lifecycle
//!   - `session`: Relay session lifecycle
//!
//! - **Application**: Port definitions
//!   - `ports`: The upstream connector the relay depends on
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: Provider WebSocket client with backoff and heartbeat
//!   - `relay`: Client-facing WebSocket server
//!   - `config`: Environment configuration
//!   - `health`: Health check and metrics endpoint
//!
//! # Data Flow
//!
//! ```text
//! Client A ──ws──► /connect_news_feed   ──► upstream link A ──► provider /news
//! Client B ──ws──► /connect_market_data ──► upstream link B ──► provider /quotes
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::ConnectionState;
pub use domain::stream::StreamKind;
pub use domain::subscription::{
    InstrumentKind, InstrumentSubscription, NewsFilter, StreamParams, SubscriptionDescriptor,
    SubscriptionError,
};

// Ports
pub use application::ports::UpstreamConnector;

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, ProviderSettings, RelayConfig, RelaySettings, WebSocketSettings,
};

// Upstream client
pub use infrastructure::upstream::{
    ClientFrame, CloseInfo, ConnectionHandle, Credentials, StreamConnector, UpstreamClient,
    UpstreamClientConfig, UpstreamError, UpstreamEvent,
};

// Relay server
pub use infrastructure::relay::{RelayServer, RelayServerError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
