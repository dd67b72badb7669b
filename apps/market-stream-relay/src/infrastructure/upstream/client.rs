//! Upstream Stream Client
//!
//! Maintains one logical subscription to a provider stream across however
//! many physical reconnects are needed.
//!
//! # Lifecycle
//!
//! [`UpstreamClient::connect`] validates its input, spawns a link driver task
//! and resolves once the handshake frames of the first successful dial have
//! been written. The driver then:
//!
//! - forwards fresh JSON payloads as [`UpstreamEvent::Message`], verbatim
//! - answers and swallows `ping`/`pong` liveness frames
//! - drops unparseable and stale payloads
//! - on transport loss, waits out the backoff delay and dials again,
//!   replaying the same handshake frames
//!
//! The driver stops when the [`ConnectionHandle`] is closed or dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::auth::{AuthError, Credentials, Handshake};
use super::codec::{self, CodecError, InboundFrame};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, LivenessState};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::domain::connection::{ConnectionState, LinkEvent};
use crate::domain::stream::StreamKind;
use crate::domain::subscription::{SubscriptionDescriptor, SubscriptionError};
use crate::infrastructure::metrics::{self, DropReason};

/// Close code reported when the transport fails without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported when the provider's close frame carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Upper bound on writing our close frame during shutdown.
const CLOSE_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors returned by [`UpstreamClient::connect`].
///
/// All variants except `HandshakeTimeout` and `GaveUp` are raised before any
/// socket is created.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The subscription descriptor is malformed.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(#[from] SubscriptionError),

    /// The descriptor targets a different stream kind than this client.
    #[error("stream kind mismatch: client serves {expected}, descriptor is {actual}")]
    KindMismatch {
        /// Kind this client connects to.
        expected: StreamKind,
        /// Kind of the descriptor.
        actual: StreamKind,
    },

    /// Credentials could not be turned into a handshake.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(#[from] AuthError),

    /// The configured stream URL is not a WebSocket URL.
    #[error("invalid upstream URL {url}: {reason}")]
    InvalidUrl {
        /// Configured URL.
        url: String,
        /// Parse failure.
        reason: String,
    },

    /// The first handshake did not complete within the configured timeout.
    #[error("upstream handshake not completed within {0:?}")]
    HandshakeTimeout(Duration),

    /// The link stopped (retry budget exhausted) before any handshake.
    #[error("upstream link stopped before the handshake completed")]
    GaveUp,
}

// =============================================================================
// Events and Frames
// =============================================================================

/// Close status observed on the upstream transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason text.
    pub reason: String,
}

impl CloseInfo {
    /// Transport failure without a close handshake.
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: reason.into(),
        }
    }
}

impl From<Option<CloseFrame>> for CloseInfo {
    fn from(frame: Option<CloseFrame>) -> Self {
        frame.map_or(
            Self {
                code: NO_STATUS_RECEIVED,
                reason: String::new(),
            },
            |frame| Self {
                code: u16::from(frame.code),
                reason: frame.reason.as_str().to_string(),
            },
        )
    }
}

/// Events surfaced by a [`ConnectionHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// A fresh data payload, exactly as received.
    Message(String),
    /// The open transport failed.
    Error(String),
    /// The open transport closed. A reconnect follows unless stopped.
    Closed(CloseInfo),
    /// Waiting before the next dial.
    Reconnecting {
        /// Attempt number since the last successful handshake.
        attempt: u32,
        /// Delay before the dial.
        delay: Duration,
    },
    /// A reconnect attempt completed its handshake.
    Reconnected {
        /// Attempt that succeeded.
        attempt: u32,
    },
}

/// A frame from the relay client to forward upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl ClientFrame {
    fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text.into()),
            Self::Binary(data) => Message::Binary(data.into()),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for one stream kind's client.
#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    /// Stream kind served.
    pub kind: StreamKind,
    /// Provider WebSocket URL.
    pub url: String,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Payloads older than this are dropped.
    pub staleness_threshold: Duration,
    /// Optional bound on the first handshake.
    pub handshake_timeout: Option<Duration>,
    /// Buffered events per handle.
    pub event_capacity: usize,
    /// Buffered client frames per handle.
    pub outbound_capacity: usize,
}

impl UpstreamClientConfig {
    /// Create a configuration with default timings.
    #[must_use]
    pub fn new(kind: StreamKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::for_kind(kind, Duration::from_secs(15)),
            staleness_threshold: Duration::from_secs(10),
            handshake_timeout: None,
            event_capacity: 1024,
            outbound_capacity: 256,
        }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub fn from_websocket_settings(
        kind: StreamKind,
        url: impl Into<String>,
        settings: &crate::WebSocketSettings,
    ) -> Self {
        Self {
            reconnect: ReconnectConfig::from_websocket_settings(settings),
            heartbeat: HeartbeatConfig::for_kind(kind, settings.ping_interval),
            staleness_threshold: settings.staleness_threshold,
            handshake_timeout: settings.handshake_timeout,
            ..Self::new(kind, url)
        }
    }
}

// =============================================================================
// Shared Link State
// =============================================================================

/// State observable through the handle while the driver owns the socket.
#[derive(Debug)]
struct LinkShared {
    state: RwLock<ConnectionState>,
    current_delay: RwLock<Duration>,
    liveness: Arc<LivenessState>,
}

impl LinkShared {
    fn new(initial_delay: Duration) -> Self {
        Self {
            state: RwLock::new(ConnectionState::Idle),
            current_delay: RwLock::new(initial_delay),
            liveness: Arc::new(LivenessState::new()),
        }
    }

    fn apply(&self, event: LinkEvent) -> ConnectionState {
        let mut state = self.state.write();
        *state = state.on(event);
        *state
    }

    fn set_current_delay(&self, delay: Duration) {
        *self.current_delay.write() = delay;
    }
}

// =============================================================================
// Upstream Client
// =============================================================================

/// Factory for upstream links of one stream kind.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    config: UpstreamClientConfig,
}

impl UpstreamClient {
    /// Create a new client.
    #[must_use]
    pub const fn new(config: UpstreamClientConfig) -> Self {
        Self { config }
    }

    /// Client configuration.
    #[must_use]
    pub const fn config(&self) -> &UpstreamClientConfig {
        &self.config
    }

    /// Open an upstream link for a descriptor.
    ///
    /// Resolves once the auth and subscribe frames have been written; the
    /// provider's acknowledgment is not awaited. Network failures after this
    /// call starts are retried by the link driver, never returned.
    ///
    /// # Errors
    ///
    /// Malformed descriptor, credential or URL input is rejected before any
    /// socket is created. `HandshakeTimeout` is returned only when a timeout
    /// is configured, `GaveUp` only when a finite retry budget runs out first.
    pub async fn connect(
        &self,
        descriptor: SubscriptionDescriptor,
        credentials: &Credentials,
    ) -> Result<ConnectionHandle, UpstreamError> {
        descriptor.validate()?;
        if descriptor.kind() != self.config.kind {
            return Err(UpstreamError::KindMismatch {
                expected: self.config.kind,
                actual: descriptor.kind(),
            });
        }
        self.validate_url()?;
        let handshake = Handshake::for_descriptor(&descriptor, credentials)?;

        let (event_tx, event_rx) = mpsc::channel(self.config.event_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_capacity);
        let (ready_tx, ready_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let shared = Arc::new(LinkShared::new(self.config.reconnect.initial_delay));

        let driver = LinkDriver {
            config: self.config.clone(),
            handshake,
            shared: Arc::clone(&shared),
            events: event_tx,
            outbound: outbound_rx,
            cancel: cancel.clone(),
            ready: Some(ready_tx),
        };
        let task = tokio::spawn(driver.run());

        let handle = ConnectionHandle {
            kind: self.config.kind,
            events: event_rx,
            outbound: outbound_tx,
            shared,
            cancel,
            task: Some(task),
        };

        let ready = match self.config.handshake_timeout {
            Some(limit) => {
                if let Ok(ready) = tokio::time::timeout(limit, ready_rx).await {
                    ready
                } else {
                    tracing::warn!(
                        kind = %self.config.kind,
                        timeout_ms = limit.as_millis(),
                        "Upstream handshake timed out"
                    );
                    handle.close();
                    return Err(UpstreamError::HandshakeTimeout(limit));
                }
            }
            None => ready_rx.await,
        };

        ready.map(|()| handle).map_err(|_| UpstreamError::GaveUp)
    }

    fn validate_url(&self) -> Result<(), UpstreamError> {
        let invalid = |reason: String| UpstreamError::InvalidUrl {
            url: self.config.url.clone(),
            reason,
        };

        let request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| invalid(e.to_string()))?;

        match request.uri().scheme_str() {
            Some("ws" | "wss") => Ok(()),
            other => Err(invalid(format!(
                "expected ws or wss scheme, got {}",
                other.unwrap_or("none")
            ))),
        }
    }
}

// =============================================================================
// Connection Handle
// =============================================================================

/// The live object representing one upstream link.
///
/// Owned by exactly one relay session. Dropping the handle stops the link.
pub struct ConnectionHandle {
    kind: StreamKind,
    events: mpsc::Receiver<UpstreamEvent>,
    outbound: mpsc::Sender<ClientFrame>,
    shared: Arc<LinkShared>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Next upstream event. `None` once the driver has stopped.
    pub async fn recv(&mut self) -> Option<UpstreamEvent> {
        self.events.recv().await
    }

    /// Queue a frame for the provider.
    ///
    /// Returns `false` if the frame was dropped: the outbound buffer is full
    /// or the link has stopped.
    pub fn send(&self, frame: ClientFrame) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(kind = %self.kind, "Outbound buffer full, dropping client frame");
                metrics::record_message_dropped(self.kind, DropReason::Backpressure);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Stream kind of this link.
    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Wall-clock time of the last inbound frame.
    #[must_use]
    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        self.shared.liveness.last_message_at()
    }

    /// Delay the next reconnect attempt will wait.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        *self.shared.current_delay.read()
    }

    /// Stop the link: no further reconnects, timers released, and a normal
    /// close frame sent if the transport is open. Safe in any state.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Close and wait for the driver task to finish.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "Upstream link task failed");
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("current_delay", &self.current_delay())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Link Driver
// =============================================================================

enum LinkExit {
    /// Handle closed or dropped.
    Stopped,
    /// Transport lost; back off and dial again.
    Lost,
}

struct LinkDriver {
    config: UpstreamClientConfig,
    handshake: Handshake,
    shared: Arc<LinkShared>,
    events: mpsc::Sender<UpstreamEvent>,
    outbound: mpsc::Receiver<ClientFrame>,
    cancel: CancellationToken,
    ready: Option<oneshot::Sender<()>>,
}

impl LinkDriver {
    async fn run(mut self) {
        let kind = self.config.kind;
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.shared.apply(LinkEvent::Dial);
            if matches!(self.connect_and_run(&mut policy).await, LinkExit::Stopped) {
                break;
            }
            self.shared.apply(LinkEvent::TransportLost);

            let Some(delay) = policy.next_delay() else {
                tracing::error!(
                    kind = %kind,
                    attempts = policy.attempt_count(),
                    "Upstream reconnect attempts exhausted"
                );
                break;
            };
            let attempt = policy.attempt_count();
            self.shared.set_current_delay(delay);
            metrics::record_reconnect(kind);
            tracing::info!(
                kind = %kind,
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to upstream stream"
            );

            // Nobody drains events until the first handshake resolves `connect`.
            if self.ready.is_none()
                && !self.emit(UpstreamEvent::Reconnecting { attempt, delay }).await
            {
                break;
            }

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
            self.shared.apply(LinkEvent::RetryElapsed);
        }

        self.shared.apply(LinkEvent::Stop);
        tracing::debug!(kind = %kind, "Upstream link stopped");
    }

    /// Dial, write the handshake and pump frames until the link ends.
    async fn connect_and_run(&mut self, policy: &mut ReconnectPolicy) -> LinkExit {
        let kind = self.config.kind;
        tracing::info!(kind = %kind, url = %self.config.url, "Connecting to upstream stream");

        let dial = tokio::select! {
            () = self.cancel.cancelled() => return LinkExit::Stopped,
            result = tokio_tungstenite::connect_async(self.config.url.as_str()) => result,
        };
        let ws_stream = match dial {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "Upstream dial failed");
                metrics::record_upstream_error(kind);
                return LinkExit::Lost;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        for frame in self.handshake.frames() {
            if let Err(e) = write.send(Message::Text(frame.clone().into())).await {
                tracing::warn!(kind = %kind, error = %e, "Failed to send handshake frame");
                metrics::record_upstream_error(kind);
                return LinkExit::Lost;
            }
        }

        let attempt = policy.attempt_count();
        policy.reset();
        self.shared.set_current_delay(policy.current_delay());
        self.shared.apply(LinkEvent::HandshakeSent);
        self.shared.liveness.reset();

        if let Some(ready) = self.ready.take() {
            tracing::info!(kind = %kind, "Upstream handshake sent");
            let _ = ready.send(());
        } else {
            tracing::info!(kind = %kind, attempt, "Upstream reconnected");
            if !self.emit(UpstreamEvent::Reconnected { attempt }).await {
                return LinkExit::Stopped;
            }
        }

        let heartbeat_cancel = self.cancel.child_token();
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(8);
        let heartbeat = HeartbeatManager::new(
            self.config.heartbeat.clone(),
            Arc::clone(&self.shared.liveness),
            heartbeat_tx,
            heartbeat_cancel.clone(),
        );
        tokio::spawn(heartbeat.run());

        let exit = self.pump(&mut write, &mut read, &mut heartbeat_rx).await;
        heartbeat_cancel.cancel();
        exit
    }

    async fn pump(
        &mut self,
        write: &mut WsWrite,
        read: &mut WsRead,
        heartbeat_rx: &mut mpsc::Receiver<HeartbeatEvent>,
    ) -> LinkExit {
        let kind = self.config.kind;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnected".into(),
                    };
                    let _ = tokio::time::timeout(
                        CLOSE_WRITE_TIMEOUT,
                        write.send(Message::Close(Some(frame))),
                    )
                    .await;
                    return LinkExit::Stopped;
                }
                Some(event) = heartbeat_rx.recv() => match event {
                    HeartbeatEvent::SendPing => {
                        if let Err(e) = write.send(Message::Text("ping".into())).await {
                            return self.transport_failed(&e).await;
                        }
                    }
                    HeartbeatEvent::GapDetected { silence } => {
                        tracing::warn!(
                            kind = %kind,
                            silence_ms = silence.as_millis(),
                            threshold_ms = self.config.heartbeat.gap_threshold.as_millis(),
                            "No upstream messages within gap threshold"
                        );
                        metrics::record_gap_warning(kind);
                    }
                },
                frame = self.outbound.recv() => {
                    let Some(frame) = frame else {
                        return LinkExit::Stopped;
                    };
                    if let Err(e) = write.send(frame.into_message()).await {
                        return self.transport_failed(&e).await;
                    }
                    metrics::record_message_forwarded(kind, metrics::Direction::ToUpstream);
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(exit) = self.handle_inbound(codec::decode(text.as_str()), write).await {
                            return exit;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if let Some(exit) = self.handle_inbound(codec::decode_binary(&data), write).await {
                            return exit;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        self.shared.liveness.record_message();
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            return self.transport_failed(&e).await;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        self.shared.liveness.record_message();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let info = CloseInfo::from(frame);
                        tracing::info!(
                            kind = %kind,
                            code = info.code,
                            reason = %info.reason,
                            "Upstream sent close frame"
                        );
                        return if self.emit(UpstreamEvent::Closed(info)).await {
                            LinkExit::Lost
                        } else {
                            LinkExit::Stopped
                        };
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => return self.transport_failed(&e).await,
                    None => {
                        tracing::info!(kind = %kind, "Upstream stream ended");
                        let info = CloseInfo::abnormal("upstream stream ended");
                        return if self.emit(UpstreamEvent::Closed(info)).await {
                            LinkExit::Lost
                        } else {
                            LinkExit::Stopped
                        };
                    }
                },
            }
        }
    }

    /// Process one inbound payload. Returns `Some` when the link must end.
    async fn handle_inbound(
        &self,
        decoded: Result<InboundFrame, CodecError>,
        write: &mut WsWrite,
    ) -> Option<LinkExit> {
        let kind = self.config.kind;
        self.shared.liveness.record_message();

        match decoded {
            Ok(InboundFrame::Pong) => {
                tracing::trace!(kind = %kind, "Upstream pong");
                None
            }
            Ok(InboundFrame::Ping) => match write.send(Message::Text("pong".into())).await {
                Ok(()) => None,
                Err(e) => Some(self.transport_failed(&e).await),
            },
            Ok(InboundFrame::Data { raw, value }) => {
                if codec::is_stale(&value, Utc::now(), self.config.staleness_threshold) {
                    tracing::debug!(kind = %kind, "Dropping stale upstream message");
                    metrics::record_message_dropped(kind, DropReason::Stale);
                    return None;
                }
                metrics::record_message_forwarded(kind, metrics::Direction::ToClient);
                if self.emit(UpstreamEvent::Message(raw)).await {
                    None
                } else {
                    Some(LinkExit::Stopped)
                }
            }
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "Dropping unparseable upstream payload");
                metrics::record_message_dropped(kind, DropReason::Malformed);
                None
            }
        }
    }

    /// Report a failed open transport as an error followed by an abnormal close.
    async fn transport_failed(&self, error: &WsError) -> LinkExit {
        let kind = self.config.kind;
        tracing::warn!(kind = %kind, error = %error, "Upstream transport error");
        metrics::record_upstream_error(kind);

        let message = error.to_string();
        if self.emit(UpstreamEvent::Error(message.clone())).await
            && self.emit(UpstreamEvent::Closed(CloseInfo::abnormal(message))).await
        {
            LinkExit::Lost
        } else {
            LinkExit::Stopped
        }
    }

    /// Deliver an event. Returns `false` if the handle is gone or closing.
    async fn emit(&self, event: UpstreamEvent) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }
}
