//! Relay Session
//!
//! One client WebSocket paired with one upstream link, from upgrade to close.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::Instrument;

use super::RelayState;
use crate::application::ports::UpstreamConnector;
use crate::domain::session::RelaySession;
use crate::domain::stream::StreamKind;
use crate::domain::subscription::{StreamParams, SubscriptionDescriptor};
use crate::infrastructure::metrics::{self, RejectReason};
use crate::infrastructure::upstream::{ClientFrame, CloseInfo, ConnectionHandle, UpstreamEvent};

/// Close reasons are limited to 123 bytes by the protocol.
const MAX_CLOSE_REASON_BYTES: usize = 123;

/// Time allowed for the client to answer our close frame.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

type ClientSink = SplitSink<WebSocket, Message>;
type ClientStream = SplitStream<WebSocket>;

// =============================================================================
// Rejection
// =============================================================================

/// Why a session never reached the piping state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRejection {
    /// Metric label.
    pub reason: RejectReason,
    /// Text for the `{"error": ...}` payload.
    pub message: String,
    /// Close code sent after the payload.
    pub close_code: u16,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    error: &'a str,
}

/// `{"error":"<message>"}`.
#[must_use]
pub fn error_payload(message: &str) -> String {
    serde_json::to_string(&ErrorPayload { error: message })
        .unwrap_or_else(|_| r#"{"error":"internal error"}"#.to_string())
}

impl SessionRejection {
    fn unknown_tool(tool: &str) -> Self {
        Self {
            reason: RejectReason::UnknownTool,
            message: format!("Unknown tool: {tool}"),
            close_code: close_code::POLICY,
        }
    }

    fn internal(reason: RejectReason, message: String) -> Self {
        Self {
            reason,
            message,
            close_code: close_code::ERROR,
        }
    }

    /// The error frame sent before closing.
    #[must_use]
    pub fn payload(&self) -> String {
        error_payload(&self.message)
    }
}

/// Resolve a tool name and query into an open upstream link.
///
/// # Errors
///
/// Unknown tools are rejected with 1008; invalid parameters and connector
/// failures with 1011.
pub async fn open_upstream(
    connector: &dyn UpstreamConnector,
    tool: &str,
    query: &HashMap<String, String>,
) -> Result<ConnectionHandle, SessionRejection> {
    let kind =
        StreamKind::from_tool_name(tool).ok_or_else(|| SessionRejection::unknown_tool(tool))?;

    let descriptor = StreamParams::from_query(query)
        .and_then(|params| SubscriptionDescriptor::for_kind(kind, params))
        .map_err(|e| SessionRejection::internal(RejectReason::InvalidParams, e.to_string()))?;

    connector
        .connect(descriptor)
        .await
        .map_err(|e| SessionRejection::internal(RejectReason::UpstreamFailed, e.to_string()))
}

// =============================================================================
// Close Codes
// =============================================================================

/// Map an upstream close code onto one a server may send.
///
/// Reserved codes (1005, 1006, 1015) and anything outside the sendable
/// ranges become 1011.
#[must_use]
pub const fn client_close_code(upstream: u16) -> u16 {
    match upstream {
        1000..=1003 | 1007..=1014 | 3000..=4999 => upstream,
        _ => close_code::ERROR,
    }
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON_BYTES {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Utf8Bytes::from(truncate_reason(reason)),
    }))
}

// =============================================================================
// Session Driver
// =============================================================================

/// How a piping session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    ClientClosed,
    UpstreamClosed,
    UpstreamStopped,
    Shutdown,
}

/// Run one relay session on an upgraded socket.
pub(super) async fn run(
    socket: WebSocket,
    tool: String,
    query: HashMap<String, String>,
    state: RelayState,
) {
    let session = RelaySession::new(tool.as_str());
    let span = tracing::info_span!("relay_session", session_id = %session.id(), tool = %tool);
    drive(socket, session, query, state).instrument(span).await;
}

async fn drive(
    mut socket: WebSocket,
    mut session: RelaySession,
    query: HashMap<String, String>,
    state: RelayState,
) {
    tracing::info!("Relay client connected");

    let opened = tokio::select! {
        () = state.cancel.cancelled() => {
            session.close();
            return;
        }
        opened = open_upstream(state.connector.as_ref(), session.tool(), &query) => opened,
    };

    let mut handle = match opened {
        Ok(handle) => handle,
        Err(rejection) => {
            tracing::warn!(
                reason = rejection.reason.as_str(),
                error = %rejection.message,
                "Rejecting relay session"
            );
            metrics::record_session_rejected(rejection.reason);
            reject(&mut socket, &rejection).await;
            session.close();
            return;
        }
    };

    if let Err(e) = session.begin_piping() {
        tracing::warn!(error = %e, "Relay session cannot start piping");
        handle.close();
        return;
    }

    metrics::session_opened();
    tracing::info!(kind = %handle.kind(), "Relay session piping");

    let (mut sink, mut stream) = socket.split();
    let end = pipe(&mut handle, &mut sink, &mut stream, &state).await;

    handle.shutdown().await;
    session.close();
    metrics::session_closed();
    tracing::info!(
        end = ?end,
        age_ms = session.age().as_millis(),
        "Relay session closed"
    );
}

async fn reject(socket: &mut WebSocket, rejection: &SessionRejection) {
    let reason = match rejection.reason {
        RejectReason::UnknownTool => "unknown tool",
        RejectReason::InvalidParams => "invalid parameters",
        RejectReason::UpstreamFailed => "upstream connection failed",
    };

    if socket
        .send(Message::Text(rejection.payload().into()))
        .await
        .is_err()
    {
        return;
    }
    if socket
        .send(close_message(rejection.close_code, reason))
        .await
        .is_err()
    {
        return;
    }

    let _ = tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, async {
        while let Some(Ok(_)) = socket.recv().await {}
    })
    .await;
}

async fn pipe(
    handle: &mut ConnectionHandle,
    sink: &mut ClientSink,
    stream: &mut ClientStream,
    state: &RelayState,
) -> SessionEnd {
    let kind = handle.kind();

    loop {
        tokio::select! {
            () = state.cancel.cancelled() => {
                let _ = sink.send(close_message(close_code::AWAY, "relay shutting down")).await;
                return SessionEnd::Shutdown;
            }
            event = handle.recv() => match event {
                Some(UpstreamEvent::Message(raw)) => {
                    if sink.send(Message::Text(raw.into())).await.is_err() {
                        return SessionEnd::ClientClosed;
                    }
                }
                Some(UpstreamEvent::Error(message)) => {
                    if sink.send(Message::Text(error_payload(&message).into())).await.is_err() {
                        return SessionEnd::ClientClosed;
                    }
                }
                Some(UpstreamEvent::Closed(info)) => {
                    if state.settings.mirror_upstream_close {
                        mirror_close(sink, &info).await;
                        return SessionEnd::UpstreamClosed;
                    }
                    tracing::info!(
                        code = info.code,
                        "Upstream closed, client stays attached across reconnect"
                    );
                }
                Some(UpstreamEvent::Reconnecting { attempt, delay }) => {
                    tracing::debug!(
                        kind = %kind,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Upstream reconnect scheduled"
                    );
                }
                Some(UpstreamEvent::Reconnected { attempt }) => {
                    tracing::info!(kind = %kind, attempt, "Upstream link restored");
                }
                None => {
                    let _ = sink
                        .send(close_message(close_code::ERROR, "upstream unavailable"))
                        .await;
                    return SessionEnd::UpstreamStopped;
                }
            },
            msg = stream.next() => match client_input(msg) {
                ClientInput::Forward(frame) => {
                    handle.send(frame);
                }
                ClientInput::Ignore => {}
                ClientInput::Ended => return SessionEnd::ClientClosed,
            },
        }
    }
}

/// What one read from the client socket means for the session.
#[derive(Debug, PartialEq, Eq)]
enum ClientInput {
    Forward(ClientFrame),
    Ignore,
    Ended,
}

/// Only a close frame or the end of the stream ends the session. Socket
/// errors are logged and the read loop carries on.
fn client_input(msg: Option<Result<Message, axum::Error>>) -> ClientInput {
    match msg {
        Some(Ok(Message::Text(text))) => {
            ClientInput::Forward(ClientFrame::Text(text.as_str().to_string()))
        }
        Some(Ok(Message::Binary(data))) => ClientInput::Forward(ClientFrame::Binary(data.to_vec())),
        Some(Ok(Message::Ping(_) | Message::Pong(_))) => ClientInput::Ignore,
        Some(Ok(Message::Close(frame))) => {
            tracing::info!(
                code = frame.as_ref().map(|f| f.code),
                "Client closed connection"
            );
            ClientInput::Ended
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Client socket error");
            ClientInput::Ignore
        }
        None => ClientInput::Ended,
    }
}

async fn mirror_close(sink: &mut ClientSink, info: &CloseInfo) {
    let code = client_close_code(info.code);
    tracing::info!(
        upstream_code = info.code,
        client_code = code,
        reason = %info.reason,
        "Upstream closed, closing client"
    );
    let _ = sink.send(close_message(code, &info.reason)).await;
}
