//! Upstream Stream Client
//!
//! WebSocket client for the provider's news and market data streams.
//!
//! # Components
//!
//! - `auth`: Credentials and handshake frames
//! - `codec`: Inbound frame classification and message timestamps
//! - `reconnect`: Capped exponential backoff
//! - `heartbeat`: Application-level ping and gap detection
//! - `client`: Link driver and connection handle
//! - `connector`: Per-kind clients behind the connector port

pub mod auth;
pub mod client;
pub mod codec;
pub mod connector;
pub mod heartbeat;
pub mod reconnect;

pub use auth::{AuthError, Credentials, Handshake};
pub use client::{
    ClientFrame, CloseInfo, ConnectionHandle, UpstreamClient, UpstreamClientConfig, UpstreamError,
    UpstreamEvent,
};
pub use connector::StreamConnector;
pub use heartbeat::HeartbeatConfig;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
