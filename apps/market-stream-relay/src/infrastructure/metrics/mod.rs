//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Sessions**: Active relay sessions and rejections by reason
//! - **Messages**: Forwarded and dropped frames by stream kind
//! - **Upstream**: Reconnects, transport errors and gap warnings
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the relay port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::stream::StreamKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first.
///
/// # Errors
///
/// Returns `BuildError` if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_gauge!(
        "market_relay_sessions_active",
        "Number of relay sessions currently piping"
    );
    describe_counter!(
        "market_relay_sessions_rejected_total",
        "Client sessions rejected before piping, by reason"
    );

    describe_counter!(
        "market_relay_messages_forwarded_total",
        "Frames forwarded between client and upstream"
    );
    describe_counter!(
        "market_relay_messages_dropped_total",
        "Frames dropped as stale, malformed, or due to backpressure"
    );

    describe_counter!(
        "market_relay_upstream_reconnects_total",
        "Upstream reconnection attempts"
    );
    describe_counter!(
        "market_relay_upstream_errors_total",
        "Upstream dial and transport errors"
    );
    describe_counter!(
        "market_relay_gap_warnings_total",
        "Gap checks that found the upstream silent past the threshold"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Direction of a forwarded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Upstream to client.
    ToClient,
    /// Client to upstream.
    ToUpstream,
}

impl Direction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::ToClient => "to_client",
            Self::ToUpstream => "to_upstream",
        }
    }
}

/// Why a frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Older than the staleness threshold.
    Stale,
    /// Not valid JSON.
    Malformed,
    /// Outbound buffer full.
    Backpressure,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::Malformed => "malformed",
            Self::Backpressure => "backpressure",
        }
    }
}

/// Why a session was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Path named no known tool.
    UnknownTool,
    /// Query parameters did not form a valid descriptor.
    InvalidParams,
    /// The connector refused to open a link.
    UpstreamFailed,
}

impl RejectReason {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownTool => "unknown_tool",
            Self::InvalidParams => "invalid_params",
            Self::UpstreamFailed => "upstream_failed",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a session entering the piping state.
pub fn session_opened() {
    gauge!("market_relay_sessions_active").increment(1.0);
}

/// Record a piping session ending.
pub fn session_closed() {
    gauge!("market_relay_sessions_active").decrement(1.0);
}

/// Record a rejected session.
pub fn record_session_rejected(reason: RejectReason) {
    counter!(
        "market_relay_sessions_rejected_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a forwarded frame.
pub fn record_message_forwarded(kind: StreamKind, direction: Direction) {
    counter!(
        "market_relay_messages_forwarded_total",
        "kind" => kind.as_str(),
        "direction" => direction.as_str()
    )
    .increment(1);
}

/// Record a dropped frame.
pub fn record_message_dropped(kind: StreamKind, reason: DropReason) {
    counter!(
        "market_relay_messages_dropped_total",
        "kind" => kind.as_str(),
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect(kind: StreamKind) {
    counter!(
        "market_relay_upstream_reconnects_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record an upstream dial or transport error.
pub fn record_upstream_error(kind: StreamKind) {
    counter!(
        "market_relay_upstream_errors_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a detected upstream gap.
pub fn record_gap_warning(kind: StreamKind) {
    counter!(
        "market_relay_gap_warnings_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_values() {
        assert_eq!(Direction::ToClient.as_str(), "to_client");
        assert_eq!(Direction::ToUpstream.as_str(), "to_upstream");
        assert_eq!(DropReason::Stale.as_str(), "stale");
        assert_eq!(DropReason::Malformed.as_str(), "malformed");
        assert_eq!(DropReason::Backpressure.as_str(), "backpressure");
        assert_eq!(RejectReason::UnknownTool.as_str(), "unknown_tool");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_message_dropped(StreamKind::NewsFeed, DropReason::Stale);
        record_reconnect(StreamKind::MarketData);
        session_opened();
        session_closed();
    }
}
