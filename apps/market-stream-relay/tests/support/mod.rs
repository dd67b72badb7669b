//! Shared fixtures: a scripted fake provider and an in-process relay.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use market_stream_relay::{
    Credentials, RelayServer, RelaySettings, StreamConnector, StreamKind, UpstreamClientConfig,
    WebSocketSettings,
};

pub const API_KEY: &str = "test-key";
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);
pub const INITIAL_DELAY: Duration = Duration::from_millis(50);

pub type ProviderSocket = WebSocketStream<TcpStream>;
pub type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Fake Provider
// =============================================================================

/// Accepts WebSocket connections and hands each one to the test.
pub struct FakeProvider {
    addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<ProviderSocket>,
}

impl FakeProvider {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(tcp).await
                    && tx.send(ws).is_err()
                {
                    break;
                }
            }
        });

        Self { addr, accepted }
    }

    pub fn url(&self, path: &str) -> String {
        format!("ws://{}{path}", self.addr)
    }

    pub async fn next_connection(&mut self) -> ProviderSocket {
        timeout(STEP_TIMEOUT, self.accepted.recv())
            .await
            .expect("timed out waiting for upstream connection")
            .expect("provider listener stopped")
    }

    pub fn has_no_connection(&mut self) -> bool {
        self.accepted.try_recv().is_err()
    }
}

// =============================================================================
// Relay Harness
// =============================================================================

pub fn websocket_settings() -> WebSocketSettings {
    WebSocketSettings {
        reconnect_delay_initial: INITIAL_DELAY,
        reconnect_delay_max: Duration::from_millis(400),
        ..WebSocketSettings::default()
    }
}

pub fn client_config(provider: &FakeProvider, kind: StreamKind) -> UpstreamClientConfig {
    let path = match kind {
        StreamKind::NewsFeed => "/news",
        StreamKind::MarketData => "/quotes",
    };
    UpstreamClientConfig::from_websocket_settings(kind, provider.url(path), &websocket_settings())
}

/// A relay serving on an ephemeral port; stopped on drop.
pub struct RelayHarness {
    pub addr: SocketAddr,
    cancel: CancellationToken,
}

impl RelayHarness {
    pub async fn start(provider: &FakeProvider, mirror_upstream_close: bool) -> Self {
        let connector = StreamConnector::new(
            Credentials::new(API_KEY).unwrap(),
            client_config(provider, StreamKind::NewsFeed),
            client_config(provider, StreamKind::MarketData),
        );
        let settings = RelaySettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            mirror_upstream_close,
        };

        let cancel = CancellationToken::new();
        let server = RelayServer::new(settings, Arc::new(connector), cancel.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));

        Self { addr, cancel }
    }

    pub async fn connect(&self, path_and_query: &str) -> ClientSocket {
        let url = format!("ws://{}{path_and_query}", self.addr);
        let (ws, _) = timeout(STEP_TIMEOUT, tokio_tungstenite::connect_async(url))
            .await
            .expect("timed out connecting to relay")
            .expect("relay refused upgrade");
        ws
    }
}

impl Drop for RelayHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Frame Helpers
// =============================================================================

/// Percent-encode a query value.
pub fn encode_query(value: &str) -> String {
    value
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || b"-_.~".contains(&b) {
                char::from(b).to_string()
            } else {
                format!("%{b:02X}")
            }
        })
        .collect()
}

/// Next text frame, skipping control frames.
pub async fn next_text<S>(ws: &mut S) -> String
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let msg = timeout(STEP_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for text frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return text.as_str().to_string(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Read until a close frame, panicking if the stream ends without one.
pub async fn next_close<S>(ws: &mut S) -> Option<CloseFrame>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let msg = timeout(STEP_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for close frame");
        match msg {
            Some(Ok(Message::Close(frame))) => return frame,
            Some(Ok(_)) => {}
            Some(Err(e)) => panic!("stream failed before close frame: {e}"),
            None => panic!("stream ended without close frame"),
        }
    }
}

/// Read until a close frame, collecting text frames seen on the way.
pub async fn texts_until_close<S>(ws: &mut S) -> (Vec<String>, Option<CloseFrame>)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut texts = Vec::new();
    loop {
        let msg = timeout(STEP_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for close frame");
        match msg {
            Some(Ok(Message::Close(frame))) => return (texts, frame),
            Some(Ok(Message::Text(text))) => texts.push(text.as_str().to_string()),
            Some(Ok(_)) => {}
            Some(Err(e)) => panic!("stream failed before close frame: {e}"),
            None => panic!("stream ended without close frame"),
        }
    }
}

/// Read `count` handshake frames from a fresh upstream connection.
pub async fn handshake_frames(upstream: &mut ProviderSocket, count: usize) -> Vec<String> {
    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        frames.push(next_text(upstream).await);
    }
    frames
}
