//! Heartbeat and Gap Detection
//!
//! Sends an application-level `ping` on a fixed interval and periodically
//! compares the time since the last inbound frame to a gap threshold.
//! A detected gap is reported but never forces a reconnect; reconnection is
//! driven by transport close and error events only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::stream::StreamKind;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between `ping` frames.
    pub ping_interval: Duration,
    /// Interval between gap checks.
    pub gap_check_interval: Duration,
    /// Silence longer than this is reported as a gap.
    pub gap_threshold: Duration,
}

impl HeartbeatConfig {
    /// Defaults for a stream kind with the given ping interval.
    #[must_use]
    pub const fn for_kind(kind: StreamKind, ping_interval: Duration) -> Self {
        Self {
            ping_interval,
            gap_check_interval: kind.default_gap_check_interval(),
            gap_threshold: kind.default_gap_threshold(),
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Request to send a `ping` frame.
    SendPing,
    /// No inbound frame for longer than the gap threshold.
    GapDetected {
        /// Time since the last inbound frame.
        silence: Duration,
    },
}

/// Last-message bookkeeping shared by the link driver and heartbeat manager.
#[derive(Debug)]
pub struct LivenessState {
    last_message: RwLock<Instant>,
    last_message_at: RwLock<Option<DateTime<Utc>>>,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessState {
    /// Create new liveness state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_message: RwLock::new(Instant::now()),
            last_message_at: RwLock::new(None),
        }
    }

    /// Record an inbound frame of any kind.
    pub fn record_message(&self) {
        *self.last_message.write() = Instant::now();
        *self.last_message_at.write() = Some(Utc::now());
    }

    /// Time since the last inbound frame (or since the last reset).
    #[must_use]
    pub fn time_since_message(&self) -> Duration {
        self.last_message.read().elapsed()
    }

    /// Wall-clock time of the last inbound frame.
    #[must_use]
    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        *self.last_message_at.read()
    }

    /// The current silence if it exceeds `threshold`.
    #[must_use]
    pub fn gap(&self, threshold: Duration) -> Option<Duration> {
        let silence = self.time_since_message();
        (silence > threshold).then_some(silence)
    }

    /// Restart the silence clock for a new connection.
    pub fn reset(&self) {
        *self.last_message.write() = Instant::now();
    }
}

/// Heartbeat manager driving ping and gap-check timers for one connection.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<LivenessState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<LivenessState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled or the event receiver is dropped.
    pub async fn run(self) {
        let start = tokio::time::Instant::now();
        let mut ping = tokio::time::interval_at(
            start + self.config.ping_interval,
            self.config.ping_interval,
        );
        let mut gap_check = tokio::time::interval_at(
            start + self.config.gap_check_interval,
            self.config.gap_check_interval,
        );
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        gap_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = ping.tick() => HeartbeatEvent::SendPing,
                _ = gap_check.tick() => match self.state.gap(self.config.gap_threshold) {
                    Some(silence) => HeartbeatEvent::GapDetected { silence },
                    None => continue,
                },
            };

            if self.event_tx.send(event).await.is_err() {
                tracing::debug!("Event channel closed, stopping heartbeat");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ping_ms: u64, check_ms: u64, gap_ms: u64) -> HeartbeatConfig {
        HeartbeatConfig {
            ping_interval: Duration::from_millis(ping_ms),
            gap_check_interval: Duration::from_millis(check_ms),
            gap_threshold: Duration::from_millis(gap_ms),
        }
    }

    #[test]
    fn kind_defaults() {
        let news = HeartbeatConfig::for_kind(StreamKind::NewsFeed, Duration::from_secs(15));
        assert_eq!(news.gap_check_interval, Duration::from_secs(5));
        assert_eq!(news.gap_threshold, Duration::from_secs(30));

        let market = HeartbeatConfig::for_kind(StreamKind::MarketData, Duration::from_secs(15));
        assert_eq!(market.gap_check_interval, Duration::from_secs(2));
        assert_eq!(market.gap_threshold, Duration::from_secs(15));
    }

    #[test]
    fn state_initial_values() {
        let state = LivenessState::new();
        assert!(state.last_message_at().is_none());
        assert!(state.time_since_message() < Duration::from_millis(100));
        assert!(state.gap(Duration::from_secs(1)).is_none());
    }

    #[test]
    fn record_message_sets_wall_clock() {
        let state = LivenessState::new();
        state.record_message();
        assert!(state.last_message_at().is_some());
    }

    #[test]
    fn gap_reported_after_threshold() {
        let state = LivenessState::new();
        *state.last_message.write() = Instant::now()
            .checked_sub(Duration::from_millis(200))
            .unwrap();

        let silence = state.gap(Duration::from_millis(100)).unwrap();
        assert!(silence >= Duration::from_millis(200));

        state.reset();
        assert!(state.gap(Duration::from_millis(100)).is_none());
    }

    #[tokio::test]
    async fn manager_sends_ping_events() {
        let state = Arc::new(LivenessState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let manager = HeartbeatManager::new(config(50, 1_000, 10_000), state, event_tx, cancel.clone());
        let handle = tokio::spawn(manager.run());

        let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .expect("should receive event")
            .expect("channel should not close");
        assert_eq!(event, HeartbeatEvent::SendPing);

        cancel.cancel();
        handle.await.expect("task should complete");
    }

    #[tokio::test]
    async fn manager_reports_gap_without_stopping() {
        let state = Arc::new(LivenessState::new());
        *state.last_message.write() = Instant::now()
            .checked_sub(Duration::from_millis(500))
            .unwrap();

        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let manager = HeartbeatManager::new(config(10_000, 20, 100), state, event_tx, cancel.clone());
        let handle = tokio::spawn(manager.run());

        let mut gaps = 0;
        while gaps < 2 {
            let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
                .await
                .expect("should receive gap event")
                .expect("channel should not close");
            if matches!(event, HeartbeatEvent::GapDetected { .. }) {
                gaps += 1;
            }
        }

        assert!(!handle.is_finished(), "gap detection must not stop the manager");
        cancel.cancel();
        handle.await.expect("task should complete");
    }

    #[tokio::test]
    async fn no_gap_while_messages_flow() {
        let state = Arc::new(LivenessState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let manager = HeartbeatManager::new(
            config(10_000, 10, 1_000),
            Arc::clone(&state),
            event_tx,
            cancel.clone(),
        );
        let handle = tokio::spawn(manager.run());

        let result = tokio::time::timeout(Duration::from_millis(150), event_rx.recv()).await;
        assert!(result.is_err(), "no event expected before the gap threshold");

        cancel.cancel();
        handle.await.expect("task should complete");
    }

    #[tokio::test]
    async fn manager_cancellation() {
        let state = Arc::new(LivenessState::new());
        let (event_tx, _event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let manager = HeartbeatManager::new(config(10_000, 10_000, 10_000), state, event_tx, cancel.clone());
        let handle = tokio::spawn(manager.run());

        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "manager should shut down on cancellation");
    }
}
