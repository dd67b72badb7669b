//! Upstream Connection Lifecycle
//!
//! Explicit state machine for one upstream link:
//!
//! ```text
//! Idle ──Dial──► Connecting ──HandshakeSent──► Open
//!                    ▲   │                       │
//!         RetryElapsed   └──TransportLost──┐     │ TransportLost
//!                    │                     ▼     ▼
//!                    └──────────────── Reconnecting
//!
//! any ──Stop──► Closed (absorbing)
//! ```
//!
//! The backoff delay is kept by the reconnect policy, not here, so both can
//! be tested without timers.

use std::fmt;

/// Lifecycle state of an upstream link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Created, no dial attempted yet.
    #[default]
    Idle,
    /// Dialing or writing the handshake.
    Connecting,
    /// Handshake written, frames flowing.
    Open,
    /// Transport lost, waiting out the backoff delay.
    Reconnecting,
    /// Stopped for good.
    Closed,
}

/// Inputs that drive [`ConnectionState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A dial attempt starts.
    Dial,
    /// Auth and subscribe frames were written.
    HandshakeSent,
    /// The transport failed or the provider closed it.
    TransportLost,
    /// The backoff delay elapsed.
    RetryElapsed,
    /// Explicit shutdown or retry budget exhausted.
    Stop,
}

impl ConnectionState {
    /// Apply an event. Events that are not valid in the current state leave
    /// it unchanged.
    #[must_use]
    pub const fn on(self, event: LinkEvent) -> Self {
        match (self, event) {
            (Self::Closed, _) | (_, LinkEvent::Stop) => Self::Closed,
            (Self::Idle | Self::Reconnecting, LinkEvent::Dial)
            | (Self::Reconnecting, LinkEvent::RetryElapsed) => Self::Connecting,
            (Self::Connecting, LinkEvent::HandshakeSent) => Self::Open,
            (Self::Connecting | Self::Open, LinkEvent::TransportLost) => Self::Reconnecting,
            (state, _) => state,
        }
    }

    /// Whether frames can be written upstream.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether the link has stopped for good.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Lowercase name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
